//! Git repository observer.
//!
//! Reads `HEAD` and the `HEAD` reflog straight from the git directory, so no
//! git binary is needed. New reflog lines are turned into [`VcsEvent`]s.

use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tally_core::VcsEvent;

/// Branch checked out according to the contents of `HEAD`.
///
/// Returns `None` for a detached head.
pub fn parse_head(contents: &str) -> Option<String> {
    contents
        .trim()
        .strip_prefix("ref: refs/heads/")
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}

/// One line of the reflog: `<old> <new> <who> <when> <tz>\t<action>: <message>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReflogEntry {
    pub action: String,
    pub message: String,
}

pub fn parse_reflog_line(line: &str) -> Option<ReflogEntry> {
    let (_, tail) = line.split_once('\t')?;
    let (action, message) = tail.split_once(": ").unwrap_or((tail, ""));
    Some(ReflogEntry {
        action: action.trim().to_string(),
        message: message.trim_end().to_string(),
    })
}

impl ReflogEntry {
    /// New commits, including initial and merge commits. Amends are not new
    /// work and are skipped.
    fn is_commit(&self) -> bool {
        matches!(self.action.as_str(), "commit" | "commit (initial)" | "commit (merge)")
    }

    /// Target of `checkout: moving from <a> to <b>`.
    fn checkout_target(&self) -> Option<&str> {
        if self.action != "checkout" {
            return None;
        }
        self.message.rsplit_once(" to ").map(|(_, to)| to.trim())
    }
}

/// A git working tree.
#[derive(Debug, Clone)]
pub struct GitRepo {
    git_dir: PathBuf,
}

impl GitRepo {
    /// Finds the repository containing `path`.
    ///
    /// Worktrees and submodules whose `.git` is a `gitdir:` file are followed.
    pub fn discover(path: &Path) -> Result<Self> {
        for dir in path.ancestors() {
            let dot_git = dir.join(".git");
            if dot_git.is_dir() {
                return Ok(Self { git_dir: dot_git });
            }
            if dot_git.is_file() {
                let contents = std::fs::read_to_string(&dot_git)
                    .with_context(|| format!("failed to read {}", dot_git.display()))?;
                let Some(target) = contents.trim().strip_prefix("gitdir:") else {
                    bail!("{} is not a gitdir file", dot_git.display());
                };
                return Ok(Self {
                    git_dir: dir.join(target.trim()),
                });
            }
        }
        bail!("no git repository found at {}", path.display())
    }

    pub fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    pub fn current_branch(&self) -> Result<Option<String>> {
        let head = self.git_dir.join("HEAD");
        let contents = std::fs::read_to_string(&head)
            .with_context(|| format!("failed to read {}", head.display()))?;
        Ok(parse_head(&contents))
    }

    fn has_branch(&self, name: &str) -> bool {
        if self.git_dir.join("refs/heads").join(name).is_file() {
            return true;
        }
        let suffix = format!(" refs/heads/{name}");
        std::fs::read_to_string(self.git_dir.join("packed-refs"))
            .is_ok_and(|packed| packed.lines().any(|line| line.ends_with(&suffix)))
    }

    fn reflog_path(&self) -> PathBuf {
        self.git_dir.join("logs").join("HEAD")
    }
}

/// Tracks `HEAD` and the reflog between polls.
#[derive(Debug)]
pub struct GitWatcher {
    repo: GitRepo,
    branch: Option<String>,
    reflog_offset: u64,
}

impl GitWatcher {
    /// Starts watching from the repository's present state. History already
    /// in the reflog is not replayed.
    pub fn new(repo: GitRepo) -> Result<Self> {
        let branch = repo.current_branch()?;
        let reflog_offset = std::fs::metadata(repo.reflog_path()).map_or(0, |m| m.len());
        Ok(Self {
            repo,
            branch,
            reflog_offset,
        })
    }

    pub fn branch(&self) -> Option<&str> {
        self.branch.as_deref()
    }

    /// Events since the previous poll, in the order they happened.
    pub fn poll(&mut self) -> Result<Vec<VcsEvent>> {
        let mut events = Vec::new();
        for entry in self.read_new_entries()? {
            if entry.is_commit() {
                events.push(VcsEvent::Commit(entry.message));
            } else if let Some(target) = entry.checkout_target() {
                if self.repo.has_branch(target) {
                    events.push(VcsEvent::BranchCheckout(target.to_string()));
                    self.branch = Some(target.to_string());
                }
            }
        }

        let branch = self.repo.current_branch()?;
        if branch != self.branch {
            if let Some(name) = &branch {
                events.push(VcsEvent::BranchCheckout(name.clone()));
            }
            self.branch = branch;
        }
        Ok(events)
    }

    fn read_new_entries(&mut self) -> Result<Vec<ReflogEntry>> {
        let path = self.repo.reflog_path();
        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).with_context(|| format!("failed to open {}", path.display())),
        };
        let len = file.metadata()?.len();
        if len < self.reflog_offset {
            tracing::debug!(path = %path.display(), "reflog shrank; rereading from start");
            self.reflog_offset = 0;
        }
        file.seek(SeekFrom::Start(self.reflog_offset))?;

        let mut entries = Vec::new();
        let mut reader = BufReader::new(file);
        let mut line = String::new();
        loop {
            line.clear();
            let read = reader.read_line(&mut line)?;
            // A line without its newline is still being written.
            if read == 0 || !line.ends_with('\n') {
                break;
            }
            self.reflog_offset += read as u64;
            if let Some(entry) = parse_reflog_line(&line) {
                entries.push(entry);
            }
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::fs::OpenOptions;
    use std::io::Write;

    const ZERO: &str = "0000000000000000000000000000000000000000";
    const SHA: &str = "1111111111111111111111111111111111111111";

    struct Fixture {
        _dir: tempfile::TempDir,
        git_dir: PathBuf,
        root: PathBuf,
    }

    impl Fixture {
        fn new(branch: &str) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let root = dir.path().to_path_buf();
            let git_dir = root.join(".git");
            std::fs::create_dir_all(git_dir.join("logs")).unwrap();
            std::fs::create_dir_all(git_dir.join("refs/heads")).unwrap();
            let fixture = Self {
                _dir: dir,
                git_dir,
                root,
            };
            fixture.add_branch(branch);
            fixture.set_head(branch);
            fixture
        }

        fn add_branch(&self, name: &str) {
            let path = self.git_dir.join("refs/heads").join(name);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, format!("{SHA}\n")).unwrap();
        }

        fn set_head(&self, branch: &str) {
            let head = format!("ref: refs/heads/{branch}\n");
            std::fs::write(self.git_dir.join("HEAD"), head).unwrap();
        }

        fn log(&self, action: &str) {
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.git_dir.join("logs/HEAD"))
                .unwrap();
            writeln!(
                file,
                "{ZERO} {SHA} Dev <dev@example.com> 1700000000 +0000\t{action}"
            )
            .unwrap();
        }
    }

    #[test]
    fn parse_head_reads_branch_or_detached() {
        assert_eq!(parse_head("ref: refs/heads/main\n"), Some("main".to_string()));
        assert_eq!(parse_head("ref: refs/heads/feature/x"), Some("feature/x".to_string()));
        assert_eq!(parse_head(SHA), None);
    }

    #[test]
    fn parse_reflog_line_splits_action() {
        let line = format!(
            "{ZERO} {SHA} Dev <d@e> 1700000000 +0000\tcommit (initial): First: with colon\n"
        );
        let entry = parse_reflog_line(&line).unwrap();
        assert_eq!(entry.action, "commit (initial)");
        assert_eq!(entry.message, "First: with colon");
        assert!(entry.is_commit());
        assert!(parse_reflog_line("garbage").is_none());
    }

    #[test]
    fn discover_walks_up_from_subdirectory() {
        let fixture = Fixture::new("main");
        let nested = fixture.root.join("src/deep");
        std::fs::create_dir_all(&nested).unwrap();
        let repo = GitRepo::discover(&nested).unwrap();
        assert_eq!(repo.git_dir(), fixture.git_dir);
        assert_eq!(repo.current_branch().unwrap(), Some("main".to_string()));
    }

    #[test]
    fn watcher_skips_history_and_reports_new_events() {
        let fixture = Fixture::new("main");
        fixture.log("commit (initial): Old work");
        let mut watcher = GitWatcher::new(GitRepo::discover(&fixture.root).unwrap()).unwrap();
        assert_eq!(watcher.branch(), Some("main"));
        assert!(watcher.poll().unwrap().is_empty());

        fixture.add_branch("feature/x");
        fixture.log("checkout: moving from main to feature/x");
        fixture.set_head("feature/x");
        fixture.log("commit: Add parser");
        fixture.log("commit (amend): Add parser");

        assert_eq!(
            watcher.poll().unwrap(),
            vec![
                VcsEvent::BranchCheckout("feature/x".to_string()),
                VcsEvent::Commit("Add parser".to_string()),
            ]
        );
        assert!(watcher.poll().unwrap().is_empty());
    }

    #[test]
    fn commit_before_checkout_keeps_order() {
        let fixture = Fixture::new("main");
        let mut watcher = GitWatcher::new(GitRepo::discover(&fixture.root).unwrap()).unwrap();

        fixture.log("commit: On main");
        fixture.add_branch("dev");
        fixture.log("checkout: moving from main to dev");
        fixture.set_head("dev");

        assert_eq!(
            watcher.poll().unwrap(),
            vec![
                VcsEvent::Commit("On main".to_string()),
                VcsEvent::BranchCheckout("dev".to_string()),
            ]
        );
    }

    #[test]
    fn detached_checkout_is_not_a_branch() {
        let fixture = Fixture::new("main");
        let mut watcher = GitWatcher::new(GitRepo::discover(&fixture.root).unwrap()).unwrap();

        fixture.log(&format!("checkout: moving from main to {SHA}"));
        std::fs::write(fixture.git_dir.join("HEAD"), format!("{SHA}\n")).unwrap();

        assert!(watcher.poll().unwrap().is_empty());
        assert_eq!(watcher.branch(), None);
    }
}
