//! Lazy completion tracking for a dispatched batch.
//!
//! Each poll lists panes first and reads markers second: the runner publishes
//! its marker before it exits, so a pane seen dead at list time always has its
//! marker on disk by the time it is read. A failed listing only settles
//! threads once tmux confirms the session is gone, or after
//! [`LISTING_FAILURE_LIMIT`] failures in a row.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use strand_agents::{AttemptVerdict, FailoverPolicy};
use strand_core::ThreadId;
use strand_tmux::{Multiplexer, PaneId};

use crate::error::{ErrorCode, ExecutionErrorPayload};
use crate::manifest::SessionManifest;
use crate::markers::{read_marker, read_session_id, read_synthesis, ScratchLayout};
use crate::request::{ExecutionStatus, SynthesisOutput, ThreadExecutionResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchTarget {
    pub thread_id: ThreadId,
    pub pane_id: Option<PaneId>,
    /// Number of candidate models the runner could walk.
    pub candidates: usize,
    pub done_path: PathBuf,
    pub session_path: PathBuf,
    pub synthesis_path: Option<PathBuf>,
}

impl WatchTarget {
    pub fn from_manifest(manifest: &SessionManifest, layout: &ScratchLayout) -> Vec<Self> {
        manifest
            .threads
            .iter()
            .map(|entry| WatchTarget {
                thread_id: entry.thread_id,
                pane_id: entry.pane_id.clone(),
                candidates: entry.models.len(),
                done_path: layout.done_path(&entry.thread_id),
                session_path: layout.session_path(&entry.thread_id),
                synthesis_path: manifest
                    .synthesis_agent
                    .as_ref()
                    .map(|_| layout.synthesis_path(&entry.thread_id)),
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchOptions {
    pub poll_interval: Duration,
    pub timeout: Option<Duration>,
    /// Rule the runners applied; used to explain failed markers.
    pub failover: FailoverPolicy,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            timeout: None,
            failover: FailoverPolicy::default(),
        }
    }
}

/// Consecutive list-panes failures tolerated while tmux says the session lives.
pub const LISTING_FAILURE_LIMIT: u32 = 3;

/// What one poll learned about the session's panes.
enum PaneView {
    Listed(HashMap<PaneId, (bool, Option<i32>)>),
    /// Listing failed but the session may still be there.
    Unknown,
    Gone(String),
}

/// Yields one terminal result per target, in target order. Blocks between
/// polls; stops early on timeout or cancellation, turning whatever is still
/// pending into `failed` or `aborted` results.
pub struct CompletionWatcher<'a> {
    multiplexer: &'a dyn Multiplexer,
    session: String,
    targets: Vec<WatchTarget>,
    outcomes: Vec<Option<ThreadExecutionResult>>,
    next: usize,
    options: WatchOptions,
    cancel: Arc<AtomicBool>,
    started: Instant,
    listing_failures: u32,
    sleep: Box<dyn Fn(Duration) + 'a>,
}

impl<'a> CompletionWatcher<'a> {
    pub fn new(
        multiplexer: &'a dyn Multiplexer,
        session: impl Into<String>,
        targets: Vec<WatchTarget>,
        options: WatchOptions,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        let outcomes = vec![None; targets.len()];
        Self {
            multiplexer,
            session: session.into(),
            targets,
            outcomes,
            next: 0,
            options,
            cancel,
            started: Instant::now(),
            listing_failures: 0,
            sleep: Box::new(std::thread::sleep),
        }
    }

    pub fn with_sleeper(mut self, sleep: impl Fn(Duration) + 'a) -> Self {
        self.sleep = Box::new(sleep);
        self
    }

    fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    fn settle_pending(&mut self, status: ExecutionStatus, error: Option<ExecutionErrorPayload>) {
        let duration_ms = self.elapsed_ms();
        for (idx, target) in self.targets.iter().enumerate() {
            if self.outcomes[idx].is_none() {
                let mut result =
                    ThreadExecutionResult::new(target.thread_id, status).with_duration_ms(duration_ms);
                result.error = error.clone();
                result.session_id = read_session_id(&target.session_path).ok().flatten();
                self.outcomes[idx] = Some(result);
            }
        }
    }

    fn view_panes(&mut self) -> PaneView {
        let err = match self.multiplexer.list_panes(&self.session) {
            Ok(panes) => {
                self.listing_failures = 0;
                return PaneView::Listed(
                    panes
                        .into_iter()
                        .map(|info| (info.pane_id, (info.dead, info.dead_status)))
                        .collect(),
                );
            }
            Err(err) => err,
        };
        self.listing_failures += 1;
        if let Ok(false) = self.multiplexer.has_session(&self.session) {
            return PaneView::Gone("tmux session is no longer running".to_string());
        }
        tracing::debug!(
            session = %self.session,
            error = %err,
            failures = self.listing_failures,
            "list-panes failed"
        );
        if self.listing_failures >= LISTING_FAILURE_LIMIT {
            tracing::warn!(session = %self.session, error = %err, "giving up on tmux");
            return PaneView::Gone(format!(
                "tmux stopped answering after {} failed list-panes: {err}",
                self.listing_failures
            ));
        }
        PaneView::Unknown
    }

    fn poll(&mut self) {
        let panes = self.view_panes();

        for idx in 0..self.targets.len() {
            if self.outcomes[idx].is_some() {
                continue;
            }
            let target = &self.targets[idx];
            let outcome = match read_marker(&target.done_path) {
                Ok(Some(marker)) => {
                    let status = if marker.succeeded() {
                        ExecutionStatus::Completed
                    } else {
                        ExecutionStatus::Failed
                    };
                    let mut result = ThreadExecutionResult::new(target.thread_id, status)
                        .with_duration_ms(marker.elapsed_secs.saturating_mul(1000));
                    result.exit_code = Some(marker.exit_code);
                    result.session_id = read_session_id(&target.session_path).ok().flatten();
                    if !marker.succeeded() {
                        let mut message = format!(
                            "agent exited with status {} on candidate {}",
                            marker.exit_code, marker.attempt
                        );
                        let decision = marker.verdict(&self.options.failover, target.candidates);
                        if decision.verdict == AttemptVerdict::Failed {
                            message.push_str(&format!(" ({})", decision.reason));
                        }
                        result.error =
                            Some(ExecutionErrorPayload::new(ErrorCode::RuntimeError, message));
                    }
                    if let Some(path) = &target.synthesis_path {
                        if let Ok(Some(content)) = read_synthesis(path) {
                            result.synthesis = Some(SynthesisOutput {
                                path: path.clone(),
                                content,
                            });
                        }
                    }
                    Some(result)
                }
                Ok(None) => pane_gone(target, &panes).map(|message| {
                    ThreadExecutionResult::failed(
                        target.thread_id,
                        ExecutionErrorPayload::new(ErrorCode::RuntimeError, message),
                    )
                    .with_duration_ms(self.elapsed_ms())
                }),
                Err(err) => Some(ThreadExecutionResult::rejected(target.thread_id, &err)),
            };
            if let Some(result) = outcome {
                tracing::info!(thread = %result.thread_id, status = %result.status, "thread finished");
                self.outcomes[idx] = Some(result);
            }
        }
    }
}

/// Why a thread without a marker can no longer produce one.
fn pane_gone(target: &WatchTarget, view: &PaneView) -> Option<String> {
    let panes = match view {
        PaneView::Listed(panes) => panes,
        PaneView::Unknown => return None,
        PaneView::Gone(reason) => return Some(reason.clone()),
    };
    let pane = target.pane_id.as_ref()?;
    match panes.get(pane) {
        None => Some(format!("pane {pane} disappeared without a completion marker")),
        Some((true, status)) => Some(format!(
            "pane {pane} exited (status {}) without a completion marker",
            status.map_or_else(|| "unknown".to_string(), |code| code.to_string())
        )),
        Some((false, _)) => None,
    }
}

impl Iterator for CompletionWatcher<'_> {
    type Item = ThreadExecutionResult;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.next >= self.targets.len() {
                return None;
            }
            if let Some(result) = self.outcomes[self.next].take() {
                self.next += 1;
                return Some(result);
            }
            if self.cancel.load(Ordering::SeqCst) {
                tracing::warn!(session = %self.session, "watch cancelled");
                self.settle_pending(ExecutionStatus::Aborted, None);
                continue;
            }
            self.poll();
            if self.outcomes[self.next].is_some() {
                continue;
            }
            if let Some(timeout) = self.options.timeout {
                if self.started.elapsed() >= timeout {
                    let message = format!("timed out after {}s", timeout.as_secs());
                    self.settle_pending(
                        ExecutionStatus::Failed,
                        Some(ExecutionErrorPayload::new(ErrorCode::RuntimeError, message)),
                    );
                    continue;
                }
            }
            tracing::debug!(
                session = %self.session,
                waiting_on = %self.targets[self.next].thread_id,
                "poll tick"
            );
            (self.sleep)(self.options.poll_interval);
        }
    }
}
