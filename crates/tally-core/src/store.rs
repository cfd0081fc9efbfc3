//! Structural operations over the folder tree.
//!
//! Nothing here knows about elapsed time or persistence. Traversal is
//! pre-order: a folder's timers, then its subfolders, in array order.

use crate::model::{Timer, TimerFolder, TrackerConfig};
use crate::types::TimerId;

/// Splits a `/`-separated folder path into trimmed, non-empty segments.
fn path_segments(path: Option<&str>) -> Vec<&str> {
    path.map(|p| p.split('/').map(str::trim).filter(|s| !s.is_empty()).collect())
        .unwrap_or_default()
}

/// Canonical form of a folder path. The root bucket is `None`.
pub fn normalize_folder_path(path: Option<&str>) -> Option<String> {
    let segments = path_segments(path);
    if segments.is_empty() {
        None
    } else {
        Some(segments.join("/"))
    }
}

fn ensure_in<'a>(
    level: &'a mut Vec<TimerFolder>,
    head: &str,
    rest: &[&str],
) -> &'a mut TimerFolder {
    let index = match level.iter().position(|f| f.name == head) {
        Some(index) => index,
        None => {
            level.push(TimerFolder::new(head));
            level.len() - 1
        }
    };
    let folder = &mut level[index];
    match rest.split_first() {
        None => folder,
        Some((next, rest)) => ensure_in(&mut folder.subfolders, next, rest),
    }
}

fn find_folder_in<'a>(level: &'a [TimerFolder], segments: &[&str]) -> Option<&'a TimerFolder> {
    let (head, rest) = segments.split_first()?;
    let folder = level.iter().find(|f| f.name == *head)?;
    if rest.is_empty() {
        Some(folder)
    } else {
        find_folder_in(&folder.subfolders, rest)
    }
}

fn find_folder_in_mut<'a>(
    level: &'a mut [TimerFolder],
    segments: &[&str],
) -> Option<&'a mut TimerFolder> {
    let (head, rest) = segments.split_first()?;
    let folder = level.iter_mut().find(|f| f.name == *head)?;
    if rest.is_empty() {
        Some(folder)
    } else {
        find_folder_in_mut(&mut folder.subfolders, rest)
    }
}

fn find_in<'a>(
    folders: &'a [TimerFolder],
    pred: &mut dyn FnMut(&Timer) -> bool,
) -> Option<&'a Timer> {
    for folder in folders {
        if let Some(timer) = folder.timers.iter().find(|&t| pred(t)) {
            return Some(timer);
        }
        if let Some(found) = find_in(&folder.subfolders, pred) {
            return Some(found);
        }
    }
    None
}

fn find_in_mut<'a>(
    folders: &'a mut [TimerFolder],
    pred: &mut dyn FnMut(&Timer) -> bool,
) -> Option<&'a mut Timer> {
    for folder in folders {
        if let Some(index) = folder.timers.iter().position(|t| pred(t)) {
            return Some(&mut folder.timers[index]);
        }
        if let Some(found) = find_in_mut(&mut folder.subfolders, pred) {
            return Some(found);
        }
    }
    None
}

fn containing_mut<'a>(folders: &'a mut [TimerFolder], id: &TimerId) -> Option<&'a mut TimerFolder> {
    for folder in folders {
        if folder.timers.iter().any(|t| &t.id == id) {
            return Some(folder);
        }
        if let Some(found) = containing_mut(&mut folder.subfolders, id) {
            return Some(found);
        }
    }
    None
}

fn visit<'a>(folders: &'a [TimerFolder], f: &mut dyn FnMut(&'a Timer)) {
    for folder in folders {
        folder.timers.iter().for_each(&mut *f);
        visit(&folder.subfolders, f);
    }
}

fn visit_mut(folders: &mut [TimerFolder], f: &mut dyn FnMut(&mut Timer)) {
    for folder in folders {
        folder.timers.iter_mut().for_each(&mut *f);
        visit_mut(&mut folder.subfolders, f);
    }
}

fn remove_in(folders: &mut [TimerFolder], id: &TimerId) -> Option<Timer> {
    for folder in folders {
        if let Some(index) = folder.timers.iter().position(|t| &t.id == id) {
            return Some(folder.timers.remove(index));
        }
        if let Some(found) = remove_in(&mut folder.subfolders, id) {
            return Some(found);
        }
    }
    None
}

impl TrackerConfig {
    /// All timers in traversal order.
    pub fn timers(&self) -> Vec<&Timer> {
        let mut timers = Vec::new();
        visit(&self.folders, &mut |t| timers.push(t));
        timers
    }

    pub fn for_each_timer_mut(&mut self, mut f: impl FnMut(&mut Timer)) {
        visit_mut(&mut self.folders, &mut f);
    }

    pub fn find_timer(&self, id: &TimerId) -> Option<&Timer> {
        find_in(&self.folders, &mut |t| &t.id == id)
    }

    pub fn find_timer_mut(&mut self, id: &TimerId) -> Option<&mut Timer> {
        find_in_mut(&mut self.folders, &mut |t| &t.id == id)
    }

    /// First timer in traversal order matching `pred`.
    pub fn find_timer_by(&self, mut pred: impl FnMut(&Timer) -> bool) -> Option<&Timer> {
        find_in(&self.folders, &mut pred)
    }

    pub fn find_timer_by_mut(
        &mut self,
        mut pred: impl FnMut(&Timer) -> bool,
    ) -> Option<&mut Timer> {
        find_in_mut(&mut self.folders, &mut pred)
    }

    /// Looks up a folder by path. `None` or an empty path is the root bucket.
    pub fn find_folder(&self, path: Option<&str>) -> Option<&TimerFolder> {
        let segments = path_segments(path);
        if segments.is_empty() {
            return self.folders.iter().find(|f| f.name.is_empty());
        }
        find_folder_in(&self.folders, &segments)
    }

    /// Returns the folder at `path`, creating missing segments.
    pub fn ensure_folder(&mut self, path: Option<&str>) -> &mut TimerFolder {
        let segments = path_segments(path);
        match segments.split_first() {
            None => ensure_in(&mut self.folders, "", &[]),
            Some((head, rest)) => ensure_in(&mut self.folders, head, rest),
        }
    }

    /// Renames the folder at `path`. Returns false if it does not exist.
    ///
    /// The `folder_path` of every timer below it is rewritten to match.
    pub fn rename_folder(&mut self, path: &str, new_name: &str) -> bool {
        let segments = path_segments(Some(path));
        let new_name = new_name.trim();
        if segments.is_empty() || new_name.is_empty() || new_name.contains('/') {
            return false;
        }
        let Some(folder) = find_folder_in_mut(&mut self.folders, &segments) else {
            return false;
        };
        folder.name = new_name.to_string();

        let old_prefix = segments.join("/");
        let mut renamed = segments.clone();
        if let Some(last) = renamed.last_mut() {
            *last = new_name;
        }
        let new_prefix = renamed.join("/");
        self.for_each_timer_mut(|timer| {
            let Some(current) = timer.folder_path.as_deref() else {
                return;
            };
            if current == old_prefix {
                timer.folder_path = Some(new_prefix.clone());
            } else if let Some(rest) = current.strip_prefix(&format!("{old_prefix}/")) {
                timer.folder_path = Some(format!("{new_prefix}/{rest}"));
            }
        });
        true
    }

    /// Appends a timer to the folder named by its `folder_path`.
    pub fn insert_timer(&mut self, mut timer: Timer) {
        timer.folder_path = normalize_folder_path(timer.folder_path.as_deref());
        let folder = self.ensure_folder(timer.folder_path.as_deref());
        folder.timers.push(timer);
    }

    pub fn remove_timer(&mut self, id: &TimerId) -> Option<Timer> {
        remove_in(&mut self.folders, id)
    }

    /// Moves a timer to the end of another folder.
    pub fn move_timer_to_folder(&mut self, id: &TimerId, path: Option<&str>) -> bool {
        let Some(mut timer) = self.remove_timer(id) else {
            return false;
        };
        timer.folder_path = path.map(str::to_string);
        self.insert_timer(timer);
        true
    }

    /// Shifts a timer within its folder by `offset` places, clamped to the
    /// folder bounds. Returns true if the order changed.
    pub fn move_timer_by_offset(&mut self, id: &TimerId, offset: isize) -> bool {
        let Some(folder) = containing_mut(&mut self.folders, id) else {
            return false;
        };
        let Some(from) = folder.timers.iter().position(|t| &t.id == id) else {
            return false;
        };
        let last = folder.timers.len() - 1;
        let to = from.saturating_add_signed(offset).min(last);
        if to == from {
            return false;
        }
        let timer = folder.timers.remove(from);
        folder.timers.insert(to, timer);
        true
    }
}
