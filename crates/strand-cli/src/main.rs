mod approval;
mod cli;
mod error;
mod execute;
mod logging;
mod render;
mod stream;
mod task;
mod workspace;

use clap::Parser;

use crate::cli::{Cli, Command};
use crate::error::MainError;
use crate::workspace::Workspace;

fn main() {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose);

    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("strand: {err}");
            for line in err.details() {
                eprintln!("{line}");
            }
            std::process::exit(1);
        }
    }
}

fn run(cli: Cli) -> Result<i32, MainError> {
    let cwd = std::env::current_dir().map_err(|source| MainError::CurrentDir { source })?;
    let workspace = Workspace::discover(&cwd)?;
    let selected = cli.stream.as_deref();

    match cli.command {
        Command::Stream { action } => stream::run_stream(&workspace, selected, action)?,
        Command::Task { action } => {
            let stream_id = workspace.resolve_stream(selected)?;
            task::run_task(&workspace, &stream_id, action)?;
        }
        Command::Approve { stage, force, by } => {
            let stream_id = workspace.resolve_stream(selected)?;
            approval::run_approve(&workspace, &stream_id, stage, force, by)?;
        }
        Command::Revoke { stage, reason } => {
            let stream_id = workspace.resolve_stream(selected)?;
            approval::run_revoke(&workspace, &stream_id, stage, reason)?;
        }
        Command::Status { json } => {
            let stream_id = workspace.resolve_stream(selected)?;
            run_status(&workspace, &stream_id, json)?;
        }
        Command::Execute(args) => {
            let stream_id = workspace.resolve_stream(selected)?;
            return execute::run_execute(&workspace, &stream_id, args);
        }
        Command::Collect { session } => {
            let stream_id = workspace.resolve_stream(selected)?;
            execute::run_collect(&workspace, &stream_id, session.as_deref())?;
        }
        Command::Wait { session, timeout } => {
            let stream_id = workspace.resolve_stream(selected)?;
            return execute::run_wait(&workspace, &stream_id, session.as_deref(), timeout);
        }
        Command::Resume { thread, session } => {
            let stream_id = workspace.resolve_stream(selected)?;
            execute::run_resume(&workspace, &stream_id, &thread, session.as_deref())?;
        }
        Command::Abort { session } => {
            let stream_id = workspace.resolve_stream(selected)?;
            execute::run_abort(&workspace, &stream_id, session.as_deref())?;
        }
        Command::Pager { session } => {
            let stream_id = workspace.resolve_stream(selected)?;
            return execute::run_pager_pane(&workspace, &stream_id, &session);
        }
        Command::LocateSession { token } => {
            execute::run_locate_session(&workspace.config, &token)?;
        }
    }
    Ok(0)
}

fn run_status(workspace: &Workspace, stream_id: &str, json: bool) -> Result<(), MainError> {
    let doc = workspace.load_tasks(stream_id)?;
    let index = workspace.index_store().load()?;
    let stream = index.require(stream_id)?.clone();
    let report = render::StatusReport::build(stream, &doc);
    if json {
        let body =
            serde_json::to_string_pretty(&report).map_err(|source| MainError::Encode { source })?;
        println!("{body}");
    } else {
        println!("{}", report.render());
    }
    Ok(())
}
