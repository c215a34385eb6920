//! Agent definitions (`.strand/agents.toml`).
//!
//! ```toml
//! [agents.build]
//! models = ["anthropic/claude-sonnet-4", { model = "openai/gpt-5", variant = "high" }]
//!
//! [agents.summarize]
//! models = ["anthropic/claude-haiku-4"]
//! synthesis = true
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::error::AgentError;
use crate::types::{NormalizedModelSpec, SynthesisSpec};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ModelEntry {
    Name(String),
    Spec {
        model: String,
        #[serde(default)]
        variant: Option<String>,
    },
}

impl ModelEntry {
    pub fn normalize(&self) -> Result<NormalizedModelSpec, AgentError> {
        match self {
            ModelEntry::Name(model) => NormalizedModelSpec::new(model.clone()).normalized(),
            ModelEntry::Spec { model, variant } => NormalizedModelSpec {
                model: model.clone(),
                variant: variant.clone(),
            }
            .normalized(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AgentDefinition {
    #[serde(default)]
    pub description: Option<String>,
    /// Candidates in failover order.
    #[serde(default)]
    pub models: Vec<ModelEntry>,
    /// Whether the agent may run as the headless synthesis phase.
    #[serde(default)]
    pub synthesis: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AgentDefinitions {
    #[serde(default)]
    pub agents: BTreeMap<String, AgentDefinition>,
}

impl AgentDefinitions {
    pub fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, AgentError> {
        let path_ref = path.as_ref();
        let body = fs::read_to_string(path_ref).map_err(|source| AgentError::Read {
            path: path_ref.to_path_buf(),
            source,
        })?;
        let definitions = Self::parse(&body).map_err(|source| AgentError::Parse {
            path: path_ref.to_path_buf(),
            source,
        })?;
        tracing::debug!(
            path = %path_ref.display(),
            agents = definitions.agents.len(),
            "loaded agent definitions"
        );
        Ok(definitions)
    }

    pub fn get(&self, name: &str) -> Result<&AgentDefinition, AgentError> {
        self.agents
            .get(name)
            .ok_or_else(|| AgentError::UnknownAgent {
                name: name.to_string(),
                known: self.agents.keys().cloned().collect(),
            })
    }

    /// Normalized candidate list for `name`; never empty on success.
    pub fn models_for(&self, name: &str) -> Result<Vec<NormalizedModelSpec>, AgentError> {
        let definition = self.get(name)?;
        let models = definition
            .models
            .iter()
            .map(ModelEntry::normalize)
            .collect::<Result<Vec<_>, _>>()?;
        if models.is_empty() {
            return Err(AgentError::NoModels {
                agent: name.to_string(),
            });
        }
        Ok(models)
    }

    pub fn synthesis_for(&self, name: &str) -> Result<SynthesisSpec, AgentError> {
        if !self.get(name)?.synthesis {
            return Err(AgentError::NotSynthesisCapable {
                agent: name.to_string(),
            });
        }
        Ok(SynthesisSpec {
            agent_name: name.to_string(),
            models: self.models_for(name)?,
        })
    }

    pub fn synthesis_agents(&self) -> impl Iterator<Item = &str> {
        self.agents
            .iter()
            .filter(|(_, definition)| definition.synthesis)
            .map(|(name, _)| name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> AgentDefinitions {
        AgentDefinitions::parse(
            r#"
[agents.build]
description = "default coding agent"
models = ["anthropic/claude-sonnet-4", { model = "openai/gpt-5", variant = "high" }]

[agents.summarize]
models = ["anthropic/claude-haiku-4"]
synthesis = true

[agents.empty]
models = []
"#,
        )
        .expect("parse definitions")
    }

    #[test]
    fn models_accept_strings_and_tables_in_order() {
        let models = sample().models_for("build").expect("build models");
        assert_eq!(
            models,
            vec![
                NormalizedModelSpec::new("anthropic/claude-sonnet-4"),
                NormalizedModelSpec::new("openai/gpt-5").with_variant("high"),
            ]
        );
    }

    #[test]
    fn unknown_agent_is_a_hard_failure() {
        let err = sample().models_for("plan").expect_err("unknown");
        match err {
            AgentError::UnknownAgent { name, known } => {
                assert_eq!(name, "plan");
                assert_eq!(known, vec!["build", "empty", "summarize"]);
            }
            other => panic!("expected UnknownAgent, got {other:?}"),
        }
    }

    #[test]
    fn empty_model_list_is_rejected() {
        assert!(matches!(
            sample().models_for("empty"),
            Err(AgentError::NoModels { .. })
        ));
    }

    #[test]
    fn synthesis_requires_flag() {
        let defs = sample();
        let spec = defs.synthesis_for("summarize").expect("synthesis");
        assert_eq!(spec.agent_name, "summarize");
        assert_eq!(spec.models.len(), 1);
        assert!(matches!(
            defs.synthesis_for("build"),
            Err(AgentError::NotSynthesisCapable { .. })
        ));
        assert_eq!(defs.synthesis_agents().collect::<Vec<_>>(), vec!["summarize"]);
    }

    #[test]
    fn load_classifies_read_and_parse_errors() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("agents.toml");
        assert!(matches!(
            AgentDefinitions::load(&missing),
            Err(AgentError::Read { .. })
        ));

        fs::write(&missing, "[agents.build\n").expect("write fixture");
        assert!(matches!(
            AgentDefinitions::load(&missing),
            Err(AgentError::Parse { .. })
        ));
    }
}
