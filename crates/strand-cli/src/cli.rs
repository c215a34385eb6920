use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "strand")]
#[command(author, version, about = "Run planned agent threads in parallel tmux panes", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Debug logging (overridden by STRAND_LOG)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Stream to act on (default: the current stream)
    #[arg(long, global = true, env = "STRAND_STREAM")]
    pub stream: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create, select and inspect streams
    Stream {
        #[command(subcommand)]
        action: StreamAction,
    },

    /// Edit tasks of the current stream
    Task {
        #[command(subcommand)]
        action: TaskAction,
    },

    /// Approve the stream plan, or one stage with --stage
    Approve {
        #[arg(long)]
        stage: Option<u32>,

        /// Approve a stage even though some of its threads are unfinished
        #[arg(long)]
        force: bool,

        /// Who approved
        #[arg(long)]
        by: Option<String>,
    },

    /// Revoke the stream plan approval, or one stage with --stage
    Revoke {
        #[arg(long)]
        stage: Option<u32>,

        #[arg(long)]
        reason: String,
    },

    /// Show stream, approval and per-thread status
    Status {
        #[arg(long)]
        json: bool,
    },

    /// Dispatch the open threads of a stage
    Execute(ExecuteArgs),

    /// Fold finished thread outcomes into the task document
    Collect {
        /// tmux session (default: the most recent dispatch)
        #[arg(long)]
        session: Option<String>,
    },

    /// Block until every dispatched thread finishes, then collect
    Wait {
        #[arg(long)]
        session: Option<String>,

        /// Give up after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Continue a thread's agent session in its original pane
    Resume {
        /// Thread id, e.g. 01.02.03
        thread: String,

        #[arg(long)]
        session: Option<String>,
    },

    /// Kill the tmux session of a dispatch
    Abort {
        #[arg(long)]
        session: Option<String>,
    },

    /// Page hidden thread panes into the grid
    #[command(hide = true)]
    Pager {
        #[arg(long)]
        session: String,
    },

    /// Print the agent session id whose title carries TOKEN
    #[command(hide = true)]
    LocateSession {
        #[arg(long)]
        token: String,
    },
}

#[derive(Debug, Subcommand)]
pub enum StreamAction {
    /// Create a stream and make it current if none is
    Init {
        id: String,

        /// Display name (default: the id)
        #[arg(long)]
        name: Option<String>,
    },

    /// List streams in order
    List {
        #[arg(long)]
        json: bool,
    },

    /// Make a stream current
    Use { id: String },

    /// Remove a stream from the index
    Remove {
        id: String,

        /// Also delete its task document, prompts and scratch files
        #[arg(long)]
        delete_artifacts: bool,
    },

    /// Override the derived stream status (on_hold by default)
    Hold {
        #[arg(long, conflicts_with = "clear")]
        status: Option<String>,

        /// Drop the override and go back to the derived status
        #[arg(long)]
        clear: bool,
    },
}

#[derive(Debug, Subcommand)]
pub enum TaskAction {
    /// Add a task, e.g. `task add 1.1.2.1 "Write the lexer"`
    Add {
        id: String,
        name: String,

        #[arg(long)]
        stage_name: Option<String>,

        #[arg(long)]
        batch_name: Option<String>,

        #[arg(long)]
        thread_name: Option<String>,

        #[arg(long)]
        agent: Option<String>,
    },

    /// Move a task to a new status
    SetStatus { id: String, status: String },

    /// Assign the agent that runs a task's thread
    Assign { id: String, agent: String },

    /// Attach a report to a task
    Report {
        id: String,

        #[arg(required_unless_present = "file", conflicts_with = "file")]
        text: Option<String>,

        #[arg(long)]
        file: Option<PathBuf>,
    },
}

#[derive(Debug, Args)]
pub struct ExecuteArgs {
    #[arg(long)]
    pub stage: u32,

    #[arg(long)]
    pub batch: Option<u32>,

    #[arg(long)]
    pub thread: Option<u32>,

    /// Backend override (tmux, subagent, sdk)
    #[arg(long)]
    pub backend: Option<String>,

    /// Accept a legacy backend that cannot run threads
    #[arg(long)]
    pub allow_legacy: bool,

    /// Dispatch even when the stage gate is closed
    #[arg(long)]
    pub force: bool,
}
