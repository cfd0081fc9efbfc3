//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Branch-aware session time tracker.
///
/// Tracks time in timers made of sessions, follows git branch checkouts and
/// commits, and recovers cleanly from unexpected shutdowns.
#[derive(Debug, Parser)]
#[command(name = "tally", version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Show timers, sessions and elapsed time.
    Status {
        /// Output as JSON.
        #[arg(long)]
        json: bool,

        /// Include archived timers.
        #[arg(long)]
        all: bool,
    },

    /// Create a timer and start it, pausing everything else.
    Start {
        label: String,

        /// Folder path such as `Clients/Acme`.
        #[arg(long)]
        folder: Option<String>,
    },

    /// Pause a timer.
    Stop {
        /// Timer id or label.
        timer: String,
    },

    /// Pause every running timer.
    StopAll,

    /// Resume a timer's last session, pausing everything else.
    Resume {
        /// Timer id or label.
        timer: String,
    },

    /// Archive a timer (pausing it), or unarchive it with `--undo`.
    Archive {
        /// Timer id or label.
        timer: String,

        #[arg(long)]
        undo: bool,
    },

    /// Delete a timer and all of its sessions.
    Delete {
        /// Timer id or label.
        timer: String,
    },

    /// Rename a timer.
    Rename {
        /// Timer id or label.
        timer: String,
        label: String,
    },

    /// Manage the sessions of a timer.
    #[command(subcommand)]
    Session(SessionAction),

    /// Move a timer to another folder or within its folder.
    Move {
        /// Timer id or label.
        timer: String,

        /// Destination folder; empty for the top level.
        #[arg(long, conflicts_with = "offset")]
        folder: Option<String>,

        /// Positions to move within the current folder.
        #[arg(long, allow_negative_numbers = true)]
        offset: Option<isize>,
    },

    /// Record a branch checkout.
    Checkout { branch: String },

    /// Record a commit on the current branch.
    Commit { message: String },

    /// Never track the given branch.
    Ignore { branch: String },

    /// Turn tracking on.
    Enable,

    /// Turn tracking off, pausing every running timer.
    Disable,

    /// Print a timer's activity log.
    Log {
        /// Timer id or label.
        timer: String,
    },

    /// Keep running: snapshot elapsed time, follow a git repository, and
    /// pause everything on exit.
    Watch {
        /// Repository to follow. Defaults to `repo_path` from the config.
        #[arg(long)]
        repo: Option<PathBuf>,
    },
}

/// Session subcommands. Sessions are referenced by id, label, or 1-based
/// position.
#[derive(Debug, Subcommand)]
pub enum SessionAction {
    /// Add a session to a timer.
    New {
        timer: String,
        label: String,

        #[arg(long)]
        description: Option<String>,

        /// Start it immediately, pausing the timer's other sessions.
        #[arg(long)]
        start: bool,
    },

    /// Resume a session, pausing its siblings.
    Start { timer: String, session: String },

    /// Pause a session.
    Stop { timer: String, session: String },

    /// Delete a session.
    Delete { timer: String, session: String },

    /// Rename a session.
    Rename {
        timer: String,
        session: String,
        label: String,
    },
}
