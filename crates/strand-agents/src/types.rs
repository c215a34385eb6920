use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::AgentError;
use crate::util::shell_quote;

/// One candidate model, optionally with a provider-specific variant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedModelSpec {
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

impl NormalizedModelSpec {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            variant: None,
        }
    }

    pub fn with_variant(mut self, variant: impl Into<String>) -> Self {
        self.variant = Some(variant.into());
        self
    }

    /// Trim both fields, dropping an empty variant. Rejects empty or
    /// whitespace-bearing model names.
    pub fn normalized(self) -> Result<Self, AgentError> {
        let model = self.model.trim().to_string();
        if model.is_empty() {
            return Err(AgentError::InvalidModelSpec {
                value: self.model,
                reason: "model must not be empty".to_string(),
            });
        }
        if model.chars().any(char::is_whitespace) {
            return Err(AgentError::InvalidModelSpec {
                value: model,
                reason: "model must not contain whitespace".to_string(),
            });
        }
        let variant = self
            .variant
            .map(|variant| variant.trim().to_string())
            .filter(|variant| !variant.is_empty());
        Ok(Self { model, variant })
    }

    /// `provider/model` or `provider/model (variant)` for display.
    pub fn label(&self) -> String {
        match &self.variant {
            Some(variant) => format!("{} ({variant})", self.model),
            None => self.model.clone(),
        }
    }
}

impl std::fmt::Display for NormalizedModelSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.label())
    }
}

/// Agent that summarizes a finished working session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SynthesisSpec {
    pub agent_name: String,
    pub models: Vec<NormalizedModelSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentCommand {
    pub executable: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    /// File redirected to the process's stdin.
    pub stdin: Option<PathBuf>,
}

impl AgentCommand {
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
            args: Vec::new(),
            env: Vec::new(),
            stdin: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Executable and arguments as shell words, without env or redirects.
    pub fn render_words(&self) -> String {
        let mut rendered = shell_quote(&self.executable);
        for arg in &self.args {
            rendered.push(' ');
            rendered.push_str(&shell_quote(arg));
        }
        rendered
    }

    /// Full shell invocation: `K='v' exe 'arg' < 'stdin'`.
    pub fn render_shell(&self) -> String {
        let mut rendered = String::new();
        for (key, value) in &self.env {
            if key.trim().is_empty() {
                continue;
            }
            rendered.push_str(key);
            rendered.push('=');
            rendered.push_str(&shell_quote(value));
            rendered.push(' ');
        }
        rendered.push_str(&self.render_words());
        if let Some(stdin) = &self.stdin {
            rendered.push_str(" < ");
            rendered.push_str(&shell_quote(&stdin.display().to_string()));
        }
        rendered
    }
}
