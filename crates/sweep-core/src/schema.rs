//! Top-level layout of a pipeline configuration document.
//!
//! The generator renders documents of this shape and every report carries a
//! serialized copy of one, so both sides read fields through these types
//! rather than through ad-hoc string paths.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One pipeline component: a registered name plus free-form arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleConfiguration {
    pub name: String,
    #[serde(default)]
    pub args: Map<String, Value>,
}

impl ModuleConfiguration {
    /// Argument rendered as text. The pipeline treats every argument as a
    /// string, so numbers and booleans are accepted in their JSON spelling.
    pub fn argument(&self, key: &str) -> Option<String> {
        match self.args.get(key)? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoldStandardConfiguration {
    pub path: String,
    #[serde(flatten)]
    pub options: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    pub cache_dir: String,
    pub gold_standard_configuration: GoldStandardConfiguration,
    pub source_artifact_provider: ModuleConfiguration,
    pub target_artifact_provider: ModuleConfiguration,
    pub source_preprocessor: ModuleConfiguration,
    pub target_preprocessor: ModuleConfiguration,
    pub embedding_creator: ModuleConfiguration,
    pub source_store: ModuleConfiguration,
    pub target_store: ModuleConfiguration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classifier: Option<ModuleConfiguration>,
    /// Multi-stage classification: stages in order, each a group of
    /// classifiers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classifiers: Option<Vec<Vec<ModuleConfiguration>>>,
    pub result_aggregator: ModuleConfiguration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracelinkid_postprocessor: Option<ModuleConfiguration>,
    /// Sections this tooling does not interpret, e.g. `prompt_optimizer`.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Configuration {
    pub fn from_json_str(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}
