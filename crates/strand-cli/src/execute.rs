//! Dispatch and follow-up commands: execute, wait, collect, resume, abort,
//! plus the two hidden callbacks used from inside tmux panes.

use chrono::Utc;
use std::io;
use std::process::Command;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use strand_agents::{
    find_session_by_token, AgentAdapter, FailoverPolicy, OpencodeAdapter, ProcessCommandProbe,
};
use strand_core::{evaluate_execution_gate, StrandConfig, ThreadId};
use strand_exec::{
    apply_outcomes, build_requests, gather_outcomes, mark_dispatched, resolve_backend,
    resume_thread, run_pager, BackendKind, CallPath, CollectSummary, CompletionWatcher,
    ErrorCode, ExecutionBackend, ExecutionMode, ExecutionStatus, LegacyBackend, ReadinessPoll,
    ScratchLayout, SessionManifest, ThreadSelector, TmuxBackend, TmuxBackendOptions,
    WatchOptions, WatchTarget, PAGER_QUIT_EXIT,
};
use strand_tmux::{TmuxCli, TmuxClient};

use crate::cli::ExecuteArgs;
use crate::error::MainError;
use crate::render;
use crate::workspace::Workspace;

fn tmux_client(config: &StrandConfig) -> TmuxClient {
    TmuxClient::new(TmuxCli::new(config.tmux.binary.as_str()))
}

fn adapter(config: &StrandConfig) -> OpencodeAdapter {
    OpencodeAdapter::new(config.agent.executable.clone())
}

fn backend_for(
    workspace: &Workspace,
    kind: BackendKind,
    stream_id: &str,
    stage: u32,
) -> Result<Box<dyn ExecutionBackend>, MainError> {
    let config = &workspace.config;
    Ok(match kind {
        BackendKind::Tmux => {
            let strand_bin =
                std::env::current_exe().map_err(|source| MainError::CurrentExe { source })?;
            let options = TmuxBackendOptions::from_config(
                config,
                stream_id,
                stage,
                workspace.root(),
                strand_bin,
            );
            Box::new(TmuxBackend::new(
                tmux_client(config),
                Box::new(adapter(config)),
                Box::new(ProcessCommandProbe),
                options,
            ))
        }
        BackendKind::Subagent => Box::new(LegacyBackend::subagent()),
        BackendKind::Sdk => Box::new(LegacyBackend::sdk(ReadinessPoll::localhost(
            config.execution.port,
        ))),
    })
}

/// Returns the process exit code: nonzero when any thread was rejected.
pub fn run_execute(
    workspace: &Workspace,
    stream_id: &str,
    args: ExecuteArgs,
) -> Result<i32, MainError> {
    let config = &workspace.config;
    let doc = workspace.load_tasks(stream_id)?;
    let index = workspace.index_store().load()?;
    let stream = index.require(stream_id)?;

    let gate = evaluate_execution_gate(&stream.approval, &doc, args.stage);
    if !gate.allowed {
        if !args.force {
            return Err(MainError::GateClosed {
                stage: args.stage,
                reasons: gate.reasons,
            });
        }
        for reason in &gate.reasons {
            tracing::warn!(stage = args.stage, %reason, "dispatching past a closed gate (forced)");
            println!("warning: {reason} (forced)");
        }
    }

    let selection = resolve_backend(
        args.backend.as_deref(),
        &config.execution,
        CallPath::Execute,
        args.allow_legacy,
    )?;
    let definitions = workspace.definitions()?;
    let selector = ThreadSelector {
        stage: args.stage,
        batch: args.batch,
        thread: args.thread,
    };
    let requests = build_requests(&doc, &doc, &selector, &definitions, config, |thread| {
        workspace.paths.prompt_path(stream_id, thread)
    })?;

    let mut backend = backend_for(workspace, selection.kind, stream_id, args.stage)?;
    match backend.initialize(config) {
        Ok(()) => {}
        Err(err) if err.code() == ErrorCode::BackendNotAvailable => {
            tracing::warn!(backend = %selection.kind, error = %err, "backend unavailable");
            println!("warning: {err}");
        }
        Err(err) => return Err(err.into()),
    }
    tracing::info!(
        stream = stream_id,
        stage = args.stage,
        backend = %selection.kind,
        threads = requests.len(),
        "dispatching"
    );
    let batch = backend.execute_batch(requests)?;
    println!("{}", render::batch_header(&batch));

    if batch.mode == ExecutionMode::Multiplexed && !batch.thread_session_map.is_empty() {
        let threads: Vec<ThreadId> = batch
            .thread_session_map
            .iter()
            .map(|entry| entry.thread_id)
            .collect();
        let started = workspace.modify_tasks(stream_id, |doc| {
            Ok(mark_dispatched(doc, &threads, Utc::now()))
        })?;
        tracing::debug!(tasks = started.len(), "marked dispatched tasks in progress");
    }

    let session_name = batch.session_name.clone();
    let mode = batch.mode;
    let mut rejected = false;
    for result in batch.results {
        let unavailable = result
            .error
            .as_ref()
            .is_some_and(|error| error.code == ErrorCode::BackendNotAvailable);
        rejected |= result.status == ExecutionStatus::Failed || unavailable;
        println!("{}", render::result_line(&result));
    }
    backend.dispose()?;

    if mode == ExecutionMode::Degraded {
        println!("backend {} is degraded; no thread was run", selection.kind);
    }
    if let Some(session) = session_name {
        println!("attach:  tmux attach -t {session}");
        println!("follow:  strand wait --session {session}");
    }
    Ok(if rejected { 1 } else { 0 })
}

fn collect_manifest(
    workspace: &Workspace,
    stream_id: &str,
    manifest: &SessionManifest,
    layout: &ScratchLayout,
) -> Result<CollectSummary, MainError> {
    let outcomes = gather_outcomes(manifest, layout)?;
    let summary = workspace.modify_tasks(stream_id, |doc| {
        Ok(apply_outcomes(doc, &outcomes, Utc::now())?)
    })?;
    tracing::info!(
        session = %manifest.session_name,
        completed = summary.completed.len(),
        failed = summary.failed.len(),
        running = summary.running.len(),
        "collected outcomes"
    );
    println!(
        "session {}: {} completed, {} failed, {} running",
        manifest.session_name,
        summary.completed.len(),
        summary.failed.len(),
        summary.running.len()
    );
    for thread in &summary.unlocated {
        println!("warning: thread {thread} finished but its agent session was not found");
    }
    for task in &summary.reports {
        println!("report stored on task {task}");
    }
    Ok(summary)
}

pub fn run_collect(
    workspace: &Workspace,
    stream_id: &str,
    session: Option<&str>,
) -> Result<(), MainError> {
    let layout = workspace.scratch(stream_id);
    let manifest = SessionManifest::find(&layout, session)?;
    collect_manifest(workspace, stream_id, &manifest, &layout)?;
    Ok(())
}

/// Block on the batch, print each thread as it settles, then collect.
pub fn run_wait(
    workspace: &Workspace,
    stream_id: &str,
    session: Option<&str>,
    timeout_secs: Option<u64>,
) -> Result<i32, MainError> {
    let config = &workspace.config;
    let layout = workspace.scratch(stream_id);
    let manifest = SessionManifest::find(&layout, session)?;

    let cancel = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&cancel))
        .map_err(|source| MainError::Signal { source })?;

    let client = tmux_client(config);
    let watcher = CompletionWatcher::new(
        &client,
        manifest.session_name.clone(),
        WatchTarget::from_manifest(&manifest, &layout),
        WatchOptions {
            poll_interval: Duration::from_millis(config.tmux.poll_interval_ms),
            timeout: timeout_secs.map(Duration::from_secs),
            failover: FailoverPolicy::new(Duration::from_secs(config.tmux.early_failure_secs)),
        },
        cancel,
    );
    println!(
        "waiting for {} thread(s) in {}",
        manifest.threads.len(),
        manifest.session_name
    );
    let mut all_completed = true;
    for result in watcher {
        all_completed &= result.status == ExecutionStatus::Completed;
        println!("{}", render::result_line(&result));
    }

    collect_manifest(workspace, stream_id, &manifest, &layout)?;
    Ok(if all_completed { 0 } else { 1 })
}

pub fn run_resume(
    workspace: &Workspace,
    stream_id: &str,
    thread: &str,
    session: Option<&str>,
) -> Result<(), MainError> {
    let config = &workspace.config;
    let thread = ThreadId::parse(thread)?;
    let layout = workspace.scratch(stream_id);
    let manifest = SessionManifest::find(&layout, session)?;
    let doc = workspace.load_tasks(stream_id)?;
    let fallback = manifest
        .entry(&thread)
        .and_then(|entry| entry.task_id)
        .and_then(|task_id| doc.find(&task_id))
        .and_then(|task| task.last_session())
        .map(|record| record.session_id.clone());

    let outcome = resume_thread(
        &tmux_client(config),
        &adapter(config),
        &manifest,
        &layout,
        &thread,
        fallback.as_deref(),
    )?;
    println!(
        "resumed thread {thread} in pane {} (session {})",
        outcome.pane_id, outcome.session_id
    );
    Ok(())
}

pub fn run_abort(
    workspace: &Workspace,
    stream_id: &str,
    session: Option<&str>,
) -> Result<(), MainError> {
    let config = &workspace.config;
    let selection = resolve_backend(None, &config.execution, CallPath::Inspect, false)?;
    if selection.kind != BackendKind::Tmux {
        println!("backend {} has no live sessions to abort", selection.kind);
        return Ok(());
    }

    let layout = workspace.scratch(stream_id);
    let manifest = SessionManifest::find(&layout, session)?;
    let mut options = TmuxBackendOptions::from_config(config, stream_id, 0, workspace.root(), "strand");
    options.session_name = manifest.session_name.clone();
    let mut backend = TmuxBackend::new(
        tmux_client(config),
        Box::new(adapter(config)),
        Box::new(ProcessCommandProbe),
        options,
    );
    backend.abort_all()?;
    println!("aborted {}", manifest.session_name);
    Ok(())
}

/// Hidden: runs inside the pager pane; always ends with the quit status so the
/// supervising loop stops.
pub fn run_pager_pane(
    workspace: &Workspace,
    stream_id: &str,
    session: &str,
) -> Result<i32, MainError> {
    let layout = workspace.scratch(stream_id);
    let manifest = SessionManifest::find(&layout, Some(session))?;
    let client = tmux_client(&workspace.config);
    let stdin = io::stdin();
    run_pager(
        &client,
        manifest.pane_ids(),
        &layout.pager_state_path(session),
        stdin.lock(),
        io::stdout(),
    )?;
    Ok(PAGER_QUIT_EXIT)
}

/// Session id of the most recent agent session whose title carries `token`.
pub fn locate_in_listing(
    adapter: &dyn AgentAdapter,
    listing: &str,
    token: &str,
) -> Result<String, MainError> {
    let sessions = adapter.parse_session_list(listing)?;
    find_session_by_token(&sessions, token)
        .map(|session| session.id.clone())
        .ok_or_else(|| MainError::SessionNotFound {
            token: token.to_string(),
        })
}

/// Hidden: called by runner scripts after an agent run.
pub fn run_locate_session(config: &StrandConfig, token: &str) -> Result<(), MainError> {
    let adapter = adapter(config);
    let command = adapter.list_sessions_command();
    let rendered = command.render_words();
    let output = Command::new(&command.executable)
        .args(&command.args)
        .envs(command.env.iter().map(|(key, value)| (key, value)))
        .output()
        .map_err(|source| MainError::Spawn {
            command: rendered.clone(),
            source,
        })?;
    if !output.status.success() {
        return Err(MainError::CommandFailed {
            command: rendered,
            status: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
    let id = locate_in_listing(&adapter, &String::from_utf8_lossy(&output.stdout), token)?;
    println!("{id}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locates_newest_session_for_token() {
        let listing = r#"[
            {"id": "ses_old", "title": "strand-auth-01.01.01-abc run", "updated": 10},
            {"id": "ses_new", "title": "strand-auth-01.01.01-abc retry", "updated": 20},
            {"id": "ses_other", "title": "unrelated", "updated": 30}
        ]"#;
        let adapter = OpencodeAdapter::default();
        assert_eq!(
            locate_in_listing(&adapter, listing, "strand-auth-01.01.01-abc").expect("found"),
            "ses_new"
        );
        assert!(matches!(
            locate_in_listing(&adapter, listing, "missing"),
            Err(MainError::SessionNotFound { .. })
        ));
        assert!(matches!(
            locate_in_listing(&adapter, "not json", "x"),
            Err(MainError::Agent(_))
        ));
    }

    #[test]
    fn locate_session_reports_failing_agent_cli() {
        let mut config = StrandConfig::default();
        config.agent.executable = "false".to_string();
        assert!(matches!(
            run_locate_session(&config, "tok"),
            Err(MainError::CommandFailed { .. })
        ));
        config.agent.executable = "/nonexistent/strand-agent".to_string();
        assert!(matches!(
            run_locate_session(&config, "tok"),
            Err(MainError::Spawn { .. })
        ));
    }
}
