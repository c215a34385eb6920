//! Shared fixtures for unit tests.

use std::cell::{Cell, RefCell};
use std::collections::BTreeSet;
use std::path::Path;

use strand_agents::NormalizedModelSpec;
use strand_core::{TaskId, ThreadId};
use strand_tmux::{
    Multiplexer, PaneId, PaneInfo, SplitOptions, TmuxError, WindowPane,
};

use crate::request::ThreadExecutionRequest;

pub(crate) fn mk_request(dir: &Path, thread: u32) -> ThreadExecutionRequest {
    let prompt = dir.join(format!("prompt-{thread}.md"));
    std::fs::write(&prompt, "work\n").expect("write prompt");
    ThreadExecutionRequest {
        thread_id: ThreadId::new(1, 1, thread),
        thread_name: format!("thread {thread}"),
        stage_name: "Foundations".to_string(),
        batch_name: "Core".to_string(),
        prompt_path: prompt,
        models: vec![NormalizedModelSpec::new("anthropic/claude-sonnet-4")],
        agent_name: "build".to_string(),
        session_id: None,
        first_task_id: Some(TaskId::new(1, 1, thread, 1)),
        synthesis: None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    NewSession { session: String, command: String },
    Split { target: PaneId, options: SplitOptions, command: String },
    NewWindow { session: String, name: String, command: String },
    SetOption { key: String, value: String },
    Swap { source: PaneId, target: PaneId },
    Respawn { pane: PaneId, command: String },
    Kill { session: String },
}

/// In-memory tmux: allocates pane ids, tracks liveness, records calls.
#[derive(Debug, Default)]
pub(crate) struct FakeMultiplexer {
    pub calls: RefCell<Vec<Call>>,
    pub running: RefCell<BTreeSet<String>>,
    pub panes: RefCell<Vec<PaneInfo>>,
    /// Fail the split with this zero-based index.
    pub fail_split_at: Option<usize>,
    /// Another client creates the session between has-session and new-session.
    pub session_taken: bool,
    /// Remaining list-panes calls that fail as if the server hiccupped.
    pub flaky_list_panes: Cell<usize>,
    pub(crate) next_pane: Cell<u32>,
    pub(crate) next_window: Cell<u32>,
    pub(crate) splits: Cell<usize>,
}

impl FakeMultiplexer {
    pub fn with_running_session(session: &str) -> Self {
        let fake = Self::default();
        fake.running.borrow_mut().insert(session.to_string());
        fake
    }

    pub fn failing_split_at(index: usize) -> Self {
        Self {
            fail_split_at: Some(index),
            ..Self::default()
        }
    }

    pub fn flaky_listing(failures: usize) -> Self {
        let fake = Self::default();
        fake.flaky_list_panes.set(failures);
        fake
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    pub fn mark_dead(&self, pane: &PaneId, status: i32) {
        for info in self.panes.borrow_mut().iter_mut() {
            if info.pane_id == *pane {
                info.dead = true;
                info.dead_status = Some(status);
            }
        }
    }

    fn allocate(&self, window_index: u32) -> WindowPane {
        let id = self.next_pane.get();
        self.next_pane.set(id + 1);
        let pane_id = PaneId(format!("%{id}"));
        self.panes.borrow_mut().push(PaneInfo {
            pane_id: pane_id.clone(),
            window_index,
            dead: false,
            dead_status: None,
        });
        WindowPane {
            pane_id,
            window_index,
        }
    }

    fn failed(command: &str, stderr: &str) -> TmuxError {
        TmuxError::CommandFailed {
            command: command.to_string(),
            status: Some(1),
            stderr: stderr.to_string(),
        }
    }
}

impl Multiplexer for FakeMultiplexer {
    fn has_session(&self, session: &str) -> Result<bool, TmuxError> {
        Ok(self.running.borrow().contains(session))
    }

    fn new_session(&self, session: &str, _cwd: &Path, command: &str) -> Result<WindowPane, TmuxError> {
        self.calls.borrow_mut().push(Call::NewSession {
            session: session.to_string(),
            command: command.to_string(),
        });
        if self.session_taken || self.running.borrow().contains(session) {
            return Err(TmuxError::DuplicateSession {
                session: session.to_string(),
            });
        }
        self.running.borrow_mut().insert(session.to_string());
        Ok(self.allocate(0))
    }

    fn split_window(
        &self,
        target: &PaneId,
        options: &SplitOptions,
        _cwd: &Path,
        command: &str,
    ) -> Result<PaneId, TmuxError> {
        let index = self.splits.get();
        self.splits.set(index + 1);
        if self.fail_split_at == Some(index) {
            return Err(Self::failed("tmux split-window", "no space for new pane"));
        }
        self.calls.borrow_mut().push(Call::Split {
            target: target.clone(),
            options: options.clone(),
            command: command.to_string(),
        });
        let window = self
            .panes
            .borrow()
            .iter()
            .find(|info| info.pane_id == *target)
            .map(|info| info.window_index)
            .unwrap_or(0);
        Ok(self.allocate(window).pane_id)
    }

    fn new_window(
        &self,
        session: &str,
        name: &str,
        _cwd: &Path,
        command: &str,
    ) -> Result<WindowPane, TmuxError> {
        self.calls.borrow_mut().push(Call::NewWindow {
            session: session.to_string(),
            name: name.to_string(),
            command: command.to_string(),
        });
        let window = self.next_window.get() + 1;
        self.next_window.set(window);
        Ok(self.allocate(window))
    }

    fn set_option(&self, _session: &str, key: &str, value: &str) -> Result<(), TmuxError> {
        self.calls.borrow_mut().push(Call::SetOption {
            key: key.to_string(),
            value: value.to_string(),
        });
        Ok(())
    }

    fn swap_pane(&self, source: &PaneId, target: &PaneId) -> Result<(), TmuxError> {
        self.calls.borrow_mut().push(Call::Swap {
            source: source.clone(),
            target: target.clone(),
        });
        Ok(())
    }

    fn list_panes(&self, session: &str) -> Result<Vec<PaneInfo>, TmuxError> {
        let flaky = self.flaky_list_panes.get();
        if flaky > 0 {
            self.flaky_list_panes.set(flaky - 1);
            return Err(Self::failed("tmux list-panes", "server exited unexpectedly"));
        }
        if !self.running.borrow().contains(session) {
            return Err(TmuxError::TargetNotFound {
                command: "tmux list-panes".to_string(),
                target: session.to_string(),
            });
        }
        Ok(self.panes.borrow().clone())
    }

    fn respawn_pane(&self, pane: &PaneId, _cwd: &Path, command: &str) -> Result<(), TmuxError> {
        self.calls.borrow_mut().push(Call::Respawn {
            pane: pane.clone(),
            command: command.to_string(),
        });
        for info in self.panes.borrow_mut().iter_mut() {
            if info.pane_id == *pane {
                info.dead = false;
                info.dead_status = None;
            }
        }
        Ok(())
    }

    fn kill_session(&self, session: &str) -> Result<(), TmuxError> {
        self.calls.borrow_mut().push(Call::Kill {
            session: session.to_string(),
        });
        self.running.borrow_mut().remove(session);
        self.panes.borrow_mut().clear();
        Ok(())
    }
}
