use strand_agents::{shell_quote, AgentAdapter, ResumeScript};
use strand_core::ThreadId;
use strand_store::write_atomic;
use strand_tmux::{Multiplexer, PaneId};

use crate::error::ExecError;
use crate::manifest::SessionManifest;
use crate::markers::{read_marker, read_session_id, ScratchLayout};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeOutcome {
    pub pane_id: PaneId,
    pub session_id: String,
    pub command: String,
}

/// Respawn the thread's own pane with the agent continuing its session.
///
/// The session is, in order: the id the runner published for this dispatch,
/// the one recorded in the manifest, then `fallback` (usually the anchor
/// task's last session). The previous marker is removed before the pane
/// restarts; the resume runner publishes a new one when the agent exits.
pub fn resume_thread(
    multiplexer: &dyn Multiplexer,
    adapter: &dyn AgentAdapter,
    manifest: &SessionManifest,
    layout: &ScratchLayout,
    thread: &ThreadId,
    fallback: Option<&str>,
) -> Result<ResumeOutcome, ExecError> {
    let entry = manifest.entry(thread).ok_or_else(|| {
        ExecError::runtime(format!(
            "thread {thread} was not dispatched in session {}",
            manifest.session_name
        ))
    })?;
    let pane_id = entry.pane_id.clone().ok_or_else(|| {
        ExecError::runtime(format!("no pane recorded for thread {thread}"))
    })?;

    let session_id = match read_session_id(&layout.session_path(thread))? {
        Some(published) => published,
        None => entry
            .session_id
            .clone()
            .or_else(|| fallback.map(str::to_string))
            .ok_or_else(|| {
                ExecError::runtime(format!("no agent session recorded for thread {thread}"))
            })?,
    };

    if !multiplexer.has_session(&manifest.session_name)? {
        return Err(ExecError::runtime(format!(
            "tmux session {} is no longer running",
            manifest.session_name
        )));
    }
    let live = multiplexer.list_panes(&manifest.session_name)?;
    if !live.iter().any(|info| info.pane_id == pane_id) {
        return Err(ExecError::runtime(format!(
            "pane {pane_id} for thread {thread} no longer exists"
        )));
    }

    let attempt = read_marker(&layout.done_path(thread))
        .ok()
        .flatten()
        .map_or(1, |marker| marker.attempt);
    layout.ensure()?;
    layout.clear_completion(thread)?;

    let label = thread.to_string();
    let session_path = layout.session_path(thread);
    let done_path = layout.done_path(thread);
    let script = ResumeScript {
        thread_label: &label,
        cwd: &manifest.cwd,
        session_id: &session_id,
        command: adapter.resume_command(&session_id, Some(&entry.agent_name)),
        attempt,
        session_path: &session_path,
        done_path: &done_path,
    };
    let script_path = layout.resume_script_path(thread);
    write_atomic(&script_path, script.render().as_bytes())?;

    let command = format!("bash {}", shell_quote(&script_path.display().to_string()));
    multiplexer.respawn_pane(&pane_id, &manifest.cwd, &command)?;
    tracing::info!(thread = %thread, pane = %pane_id, session = %session_id, "resumed thread");

    Ok(ResumeOutcome {
        pane_id,
        session_id,
        command,
    })
}
