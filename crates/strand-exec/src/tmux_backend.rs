//! Dispatch of a batch into one tmux session.
//!
//! The first thread becomes the session's first pane, up to three more are
//! split into a 2×2 grid, and any further threads get a detached window each
//! plus a bottom pager pane that swaps them into view. Each pane runs a
//! rendered runner script; completion is observed later through the scratch
//! directory, so dispatch returns `started` results immediately.

use chrono::Utc;
use std::path::PathBuf;
use std::time::Duration;

use strand_agents::{
    probe_tools, shell_quote, tracking_token, AgentAdapter, AgentCommand, CommandProbe,
    FailoverPolicy, SynthesisPhase, ThreadScript, ToolRequirement,
};
use strand_core::{has_errors, StrandConfig, Validate};
use strand_store::write_atomic;
use strand_tmux::{
    grid_plan, visible_count, Multiplexer, PaneId, SplitDirection, SplitOptions, TmuxError,
    WindowPane, GRID_CAPACITY,
};

use crate::backend::{
    degraded_batch, partition_requests, BackendKind, BatchExecution, ExecutionBackend,
    ExecutionMode,
};
use crate::error::ExecError;
use crate::manifest::SessionManifest;
use crate::markers::ScratchLayout;
use crate::pager::PAGER_QUIT_EXIT;
use crate::request::{ThreadExecutionRequest, ThreadExecutionResult, ThreadSessionMap};

/// Lines given to the pager pane at the bottom of the grid.
const PAGER_PANE_LINES: u32 = 3;

/// `<prefix>-<stream>-s<stage>`, e.g. `strand-auth-s01`.
pub fn session_name(prefix: &str, stream_id: &str, stage: u32) -> String {
    let stream: String = stream_id
        .chars()
        .map(|c| if c == '.' || c == ':' { '-' } else { c })
        .collect();
    format!("{prefix}-{stream}-s{stage:02}")
}

#[derive(Debug, Clone)]
pub struct TmuxBackendOptions {
    pub stream_id: String,
    pub session_name: String,
    pub cwd: PathBuf,
    pub scratch: ScratchLayout,
    /// Binary the runner and pager call back into.
    pub strand_bin: PathBuf,
    pub tmux_binary: String,
    pub stagger: Duration,
    pub policy: FailoverPolicy,
    pub pager_restart_delay: Duration,
}

impl TmuxBackendOptions {
    pub fn from_config(
        config: &StrandConfig,
        stream_id: &str,
        stage: u32,
        cwd: impl Into<PathBuf>,
        strand_bin: impl Into<PathBuf>,
    ) -> Self {
        Self {
            stream_id: stream_id.to_string(),
            session_name: session_name(&config.tmux.session_prefix, stream_id, stage),
            cwd: cwd.into(),
            scratch: ScratchLayout::new(config.scratch_dir(), stream_id),
            strand_bin: strand_bin.into(),
            tmux_binary: config.tmux.binary.clone(),
            stagger: Duration::from_millis(config.tmux.stagger_ms),
            policy: FailoverPolicy::new(Duration::from_secs(config.tmux.early_failure_secs)),
            pager_restart_delay: Duration::from_millis(config.tmux.pager_restart_delay_ms),
        }
    }
}

pub struct TmuxBackend<M: Multiplexer> {
    multiplexer: M,
    adapter: Box<dyn AgentAdapter>,
    probe: Box<dyn CommandProbe>,
    options: TmuxBackendOptions,
    sleep: Box<dyn Fn(Duration)>,
    /// Why the last `initialize` found the host unusable.
    unavailable: Option<String>,
}

/// A thread ready to launch: its request and the shell command for its pane.
struct Launch {
    slot: usize,
    request: ThreadExecutionRequest,
    token: String,
    command: String,
}

impl<M: Multiplexer> TmuxBackend<M> {
    pub fn new(
        multiplexer: M,
        adapter: Box<dyn AgentAdapter>,
        probe: Box<dyn CommandProbe>,
        options: TmuxBackendOptions,
    ) -> Self {
        Self {
            multiplexer,
            adapter,
            probe,
            options,
            sleep: Box::new(std::thread::sleep),
            unavailable: None,
        }
    }

    pub fn with_sleeper(mut self, sleep: impl Fn(Duration) + 'static) -> Self {
        self.sleep = Box::new(sleep);
        self
    }

    pub fn multiplexer(&self) -> &M {
        &self.multiplexer
    }

    pub fn options(&self) -> &TmuxBackendOptions {
        &self.options
    }

    fn unavailable_reason(&self) -> Option<String> {
        if let Some(reason) = &self.unavailable {
            return Some(reason.clone());
        }
        if !self.is_available() {
            return Some(format!("{} not found on PATH", self.options.tmux_binary));
        }
        None
    }

    fn prepare(&self, slot: usize, request: ThreadExecutionRequest) -> Result<Launch, ExecError> {
        let layout = &self.options.scratch;
        let thread = &request.thread_id;
        let label = thread.to_string();
        layout.clear_thread(thread)?;

        let token = tracking_token(&self.options.stream_id, &label);
        let locator = AgentCommand::new(self.options.strand_bin.display().to_string())
            .args(["locate-session", "--token", token.as_str()]);
        let session_path = layout.session_path(thread);
        let done_path = layout.done_path(thread);
        let transcript_path = layout.transcript_path(thread);
        let output_path = layout.synthesis_path(thread);
        let working_session_path = layout.working_session_path(thread);

        let script = ThreadScript {
            thread_label: &label,
            token: &token,
            cwd: &self.options.cwd,
            agent: &request.agent_name,
            candidates: &request.models,
            prompt_path: &request.prompt_path,
            session: request.session_id.as_deref(),
            policy: self.options.policy,
            locator,
            session_path: &session_path,
            done_path: &done_path,
            synthesis: request.synthesis.as_ref().map(|spec| SynthesisPhase {
                agent: &spec.agent_name,
                models: &spec.models,
                transcript_path: &transcript_path,
                output_path: &output_path,
                working_session_path: &working_session_path,
            }),
        };
        let script_path = layout.script_path(thread);
        write_atomic(&script_path, script.render(self.adapter.as_ref()).as_bytes())?;
        tracing::debug!(thread = %thread, script = %script_path.display(), "rendered runner");

        Ok(Launch {
            slot,
            command: format!("bash {}", shell_quote(&script_path.display().to_string())),
            request,
            token,
        })
    }

    fn pager_command(&self) -> String {
        let delay = self.options.pager_restart_delay.as_millis();
        let pager = AgentCommand::new(self.options.strand_bin.display().to_string()).args([
            "pager",
            "--stream",
            self.options.stream_id.as_str(),
            "--session",
            self.options.session_name.as_str(),
        ]);
        let body = format!(
            "while true; do {}; status=$?; [ \"$status\" -eq {PAGER_QUIT_EXIT} ] && break; echo \"[strand] pager exited with $status, restarting\"; sleep {}.{:03}; done",
            pager.render_words(),
            delay / 1000,
            delay % 1000,
        );
        format!("bash -c {}", shell_quote(&body))
    }

    /// Create every pane. On error the caller tears the session down.
    fn launch(&self, launches: &[Launch]) -> Result<(Vec<WindowPane>, Option<PaneId>), ExecError> {
        let session = &self.options.session_name;
        let cwd = &self.options.cwd;
        let setup_error = |launch: &Launch| {
            let thread = launch.request.thread_id.to_string();
            move |source: TmuxError| ExecError::PaneSetup { thread, source }
        };

        let Some(first) = launches.first() else {
            return Ok((Vec::new(), None));
        };
        let root = self
            .multiplexer
            .new_session(session, cwd, &first.command)
            .map_err(|source| match source {
                TmuxError::DuplicateSession { session } => {
                    ExecError::SessionAlreadyExists { session }
                }
                source => setup_error(first)(source),
            })?;
        self.multiplexer.set_option(session, "remain-on-exit", "on")?;
        self.multiplexer.set_option(session, "mouse", "on")?;
        tracing::debug!(thread = %first.request.thread_id, pane = %root.pane_id, "created session pane");

        let visible = visible_count(launches.len());
        let mut grid: Vec<Option<PaneId>> = vec![None; GRID_CAPACITY];
        grid[0] = Some(root.pane_id.clone());
        let mut panes = vec![root.clone()];

        for (step, launch) in grid_plan(visible).iter().zip(&launches[1..visible]) {
            (self.sleep)(self.options.stagger);
            let Some(source) = grid[step.source.index()].clone() else {
                return Err(ExecError::runtime(format!(
                    "grid slot {:?} has no pane to split",
                    step.source
                )));
            };
            let pane_id = self
                .multiplexer
                .split_window(&source, &SplitOptions::new(step.direction), cwd, &launch.command)
                .map_err(setup_error(launch))?;
            tracing::debug!(thread = %launch.request.thread_id, pane = %pane_id, slot = ?step.creates, "split pane");
            grid[step.creates.index()] = Some(pane_id.clone());
            panes.push(WindowPane {
                pane_id,
                window_index: root.window_index,
            });
        }

        for (ordinal, launch) in launches.iter().enumerate().skip(visible) {
            (self.sleep)(self.options.stagger);
            let window = self
                .multiplexer
                .new_window(session, &(ordinal + 1).to_string(), cwd, &launch.command)
                .map_err(setup_error(launch))?;
            tracing::debug!(thread = %launch.request.thread_id, pane = %window.pane_id, window = window.window_index, "created hidden window");
            panes.push(window);
        }

        let pager_pane = if launches.len() > GRID_CAPACITY {
            let options = SplitOptions {
                direction: SplitDirection::Vertical,
                full_span: true,
                size: Some(PAGER_PANE_LINES),
            };
            let pane = self
                .multiplexer
                .split_window(&root.pane_id, &options, cwd, &self.pager_command())
                .map_err(|source| ExecError::PaneSetup {
                    thread: "pager".to_string(),
                    source,
                })?;
            Some(pane)
        } else {
            None
        };

        Ok((panes, pager_pane))
    }
}

impl<M: Multiplexer> ExecutionBackend for TmuxBackend<M> {
    fn kind(&self) -> BackendKind {
        BackendKind::Tmux
    }

    fn is_available(&self) -> bool {
        self.probe.command_exists(&self.options.tmux_binary)
    }

    fn initialize(&mut self, config: &StrandConfig) -> Result<(), ExecError> {
        let issues = config.validate();
        if has_errors(&issues) {
            let messages: Vec<String> = issues.iter().map(|issue| issue.message.clone()).collect();
            return Err(ExecError::invalid(messages.join("; ")));
        }

        let requirements = [
            ToolRequirement::new("multiplexer", &config.tmux.binary).with_version_flag("-V"),
            ToolRequirement::new("agent", self.adapter.executable()),
        ];
        self.options.tmux_binary = config.tmux.binary.clone();
        let report = probe_tools(&requirements, self.probe.as_ref());
        if !report.all_healthy() {
            let reason = report.describe_problems().join("; ");
            self.unavailable = Some(reason.clone());
            return Err(ExecError::BackendNotAvailable {
                backend: BackendKind::Tmux.to_string(),
                reason,
            });
        }
        self.unavailable = None;
        Ok(())
    }

    fn execute_batch(
        &mut self,
        requests: Vec<ThreadExecutionRequest>,
    ) -> Result<BatchExecution, ExecError> {
        if let Some(reason) = self.unavailable_reason() {
            let err = ExecError::BackendNotAvailable {
                backend: BackendKind::Tmux.to_string(),
                reason,
            };
            tracing::warn!(error = %err, threads = requests.len(), "answering batch not_supported");
            return Ok(degraded_batch(BackendKind::Tmux, requests, &err));
        }

        let session = self.options.session_name.clone();
        let (valid, mut slots) = partition_requests(requests);
        if valid.is_empty() {
            let results = slots.into_iter().flatten().collect();
            return Ok(BatchExecution::new(BackendKind::Tmux, ExecutionMode::Multiplexed, results));
        }

        if self.multiplexer.has_session(&session)? {
            return Err(ExecError::SessionAlreadyExists { session });
        }
        self.options.scratch.ensure()?;

        let launches = valid
            .into_iter()
            .map(|(slot, request)| self.prepare(slot, request))
            .collect::<Result<Vec<_>, _>>()?;
        tracing::info!(session = %session, threads = launches.len(), "dispatching batch");

        let (panes, pager_pane) = match self.launch(&launches) {
            Ok(created) => created,
            Err(err @ ExecError::SessionAlreadyExists { .. }) => return Err(err),
            Err(err) => {
                tracing::warn!(session = %session, error = %err, "pane setup failed; tearing session down");
                if let Err(kill_err) = self.multiplexer.kill_session(&session) {
                    tracing::debug!(error = %kill_err, "kill after failed setup");
                }
                return Err(err);
            }
        };

        let thread_session_map: Vec<ThreadSessionMap> = launches
            .iter()
            .zip(&panes)
            .map(|(launch, pane)| ThreadSessionMap {
                thread_id: launch.request.thread_id,
                session_id: launch.request.session_id.clone(),
                task_id: launch.request.first_task_id,
                pane_id: Some(pane.pane_id.clone()),
                window_index: Some(pane.window_index),
                agent_name: launch.request.agent_name.clone(),
                models: launch
                    .request
                    .models
                    .iter()
                    .map(|model| model.label())
                    .collect(),
                tracking_token: launch.token.clone(),
            })
            .collect();

        let manifest = SessionManifest {
            session_name: session.clone(),
            stream_id: self.options.stream_id.clone(),
            cwd: self.options.cwd.clone(),
            created_at: Utc::now(),
            threads: thread_session_map.clone(),
            pager_pane,
            synthesis_agent: launches
                .iter()
                .find_map(|launch| launch.request.synthesis.as_ref())
                .map(|spec| spec.agent_name.clone()),
        };
        manifest.save(&self.options.scratch.manifest_path(&session))?;

        for launch in &launches {
            slots[launch.slot] = Some(ThreadExecutionResult::started(
                launch.request.thread_id,
                launch.request.session_id.clone(),
            ));
        }
        let results = slots.into_iter().flatten().collect();
        let mut batch = BatchExecution::new(BackendKind::Tmux, ExecutionMode::Multiplexed, results);
        batch.session_name = Some(session);
        batch.thread_session_map = thread_session_map;
        Ok(batch)
    }

    fn abort_all(&mut self) -> Result<(), ExecError> {
        let session = &self.options.session_name;
        if self.multiplexer.has_session(session)? {
            tracing::info!(session = %session, "killing session");
            self.multiplexer.kill_session(session)?;
        }
        Ok(())
    }

    fn dispose(&mut self) -> Result<(), ExecError> {
        Ok(())
    }
}
