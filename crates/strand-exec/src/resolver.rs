//! Backend selection: explicit override, then persisted config, then tmux.

use serde::{Deserialize, Serialize};

use strand_core::ExecutionConfig;

use crate::backend::BackendKind;
use crate::error::ExecError;

/// Operation a backend is being resolved for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPath {
    /// Dispatching new work.
    Execute,
    /// Read-only inspection and teardown (`status`, `abort`).
    Inspect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendClass {
    Supported,
    Legacy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionSource {
    Override,
    Config,
    Default,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendSelection {
    pub kind: BackendKind,
    pub source: SelectionSource,
    pub class: BackendClass,
}

impl BackendSelection {
    pub fn is_degraded(&self) -> bool {
        self.class == BackendClass::Legacy
    }
}

pub fn classify(kind: BackendKind, path: CallPath) -> BackendClass {
    match (path, kind) {
        (CallPath::Inspect, _) | (CallPath::Execute, BackendKind::Tmux) => {
            BackendClass::Supported
        }
        (CallPath::Execute, BackendKind::Subagent | BackendKind::Sdk) => BackendClass::Legacy,
    }
}

/// Pick the backend for `path`. Legacy backends need `allow_legacy` (from
/// config or the caller); without it they are a configuration error.
pub fn resolve_backend(
    override_name: Option<&str>,
    config: &ExecutionConfig,
    path: CallPath,
    allow_legacy: bool,
) -> Result<BackendSelection, ExecError> {
    let (name, source) = match (override_name, config.backend.as_deref()) {
        (Some(name), _) if !name.trim().is_empty() => (name, SelectionSource::Override),
        (_, Some(name)) if !name.trim().is_empty() => (name, SelectionSource::Config),
        _ => (BackendKind::Tmux.as_str(), SelectionSource::Default),
    };
    let kind: BackendKind = name.parse().map_err(ExecError::invalid)?;
    let class = classify(kind, path);

    if class == BackendClass::Legacy {
        if !(allow_legacy || config.allow_legacy) {
            return Err(ExecError::invalid(format!(
                "backend '{kind}' is a legacy backend; pass --allow-legacy or set execution.allow_legacy = true"
            )));
        }
        tracing::warn!(backend = %kind, "using legacy backend; threads will not run");
    }

    tracing::debug!(backend = %kind, ?source, ?class, "resolved backend");
    Ok(BackendSelection {
        kind,
        source,
        class,
    })
}
