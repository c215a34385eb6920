//! Backends kept for configuration compatibility. They can be selected with
//! the legacy opt-in but do no real work: every thread comes back
//! `not_supported`.

use std::net::{Ipv4Addr, SocketAddr, TcpStream};
use std::time::{Duration, Instant};

use strand_core::StrandConfig;

use crate::backend::{degraded_batch, BackendKind, BatchExecution, ExecutionBackend};
use crate::error::ExecError;
use crate::request::ThreadExecutionRequest;

/// Fixed-interval TCP readiness check for a locally served agent API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessPoll {
    pub addr: SocketAddr,
    pub interval: Duration,
    pub timeout: Duration,
}

impl ReadinessPoll {
    pub fn localhost(port: u16) -> Self {
        Self {
            addr: SocketAddr::from((Ipv4Addr::LOCALHOST, port)),
            interval: Duration::from_millis(250),
            timeout: Duration::from_secs(10),
        }
    }

    fn probe_once(&self) -> bool {
        TcpStream::connect_timeout(&self.addr, self.interval).is_ok()
    }

    /// Poll until the port accepts a connection; returns how long it took.
    pub fn wait(&self) -> Result<Duration, ExecError> {
        let started = Instant::now();
        loop {
            if self.probe_once() {
                let waited = started.elapsed();
                tracing::debug!(addr = %self.addr, waited_ms = waited.as_millis() as u64, "endpoint ready");
                return Ok(waited);
            }
            if started.elapsed() >= self.timeout {
                return Err(ExecError::BackendNotAvailable {
                    backend: BackendKind::Sdk.to_string(),
                    reason: format!(
                        "nothing listening on {} after {}ms",
                        self.addr,
                        self.timeout.as_millis()
                    ),
                });
            }
            std::thread::sleep(self.interval);
        }
    }
}

#[derive(Debug, Clone)]
pub struct LegacyBackend {
    kind: BackendKind,
    readiness: Option<ReadinessPoll>,
    /// Why the last `initialize` found the endpoint unusable.
    unavailable: Option<String>,
}

impl LegacyBackend {
    pub fn subagent() -> Self {
        Self {
            kind: BackendKind::Subagent,
            readiness: None,
            unavailable: None,
        }
    }

    pub fn sdk(readiness: ReadinessPoll) -> Self {
        Self {
            kind: BackendKind::Sdk,
            readiness: Some(readiness),
            unavailable: None,
        }
    }
}

impl ExecutionBackend for LegacyBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn is_available(&self) -> bool {
        self.readiness.map_or(true, |poll| poll.probe_once())
    }

    fn initialize(&mut self, config: &StrandConfig) -> Result<(), ExecError> {
        self.unavailable = None;
        if let Some(poll) = self.readiness.as_mut() {
            poll.addr.set_port(config.execution.port);
            if let Err(err) = poll.wait() {
                self.unavailable = Some(err.to_string());
                return Err(err);
            }
        }
        Ok(())
    }

    fn execute_batch(
        &mut self,
        requests: Vec<ThreadExecutionRequest>,
    ) -> Result<BatchExecution, ExecError> {
        tracing::warn!(backend = %self.kind, threads = requests.len(), "legacy backend cannot execute threads");
        let err = match &self.unavailable {
            Some(reason) => ExecError::BackendNotAvailable {
                backend: self.kind.to_string(),
                reason: reason.clone(),
            },
            None => ExecError::NotSupported {
                backend: self.kind.to_string(),
                operation: "thread execution".to_string(),
            },
        };
        Ok(degraded_batch(self.kind, requests, &err))
    }

    fn abort_all(&mut self) -> Result<(), ExecError> {
        Ok(())
    }

    fn dispose(&mut self) -> Result<(), ExecError> {
        Ok(())
    }
}
