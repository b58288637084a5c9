use crate::schema::{Configuration, ModuleConfiguration};
use std::fmt;

/// Classifier name of the model-free classifier.
pub const MOCK_CLASSIFIER: &str = "mock";
/// Path segment that precedes the dataset name in provider paths.
pub const DATASETS_SEGMENT: &str = "datasets";
const KEY_SEPARATOR: &str = "_";

#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("missing required field {0}")]
    MissingField(&'static str),
    #[error("{field} has no dataset segment after 'datasets/': {path}")]
    UnrecognizedDatasetPath { field: &'static str, path: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassifierKind {
    Mock,
    Model { name: String, model: String },
}

impl ClassifierKind {
    pub fn from_module(module: &ModuleConfiguration) -> Result<Self, KeyError> {
        if module.name == MOCK_CLASSIFIER {
            return Ok(ClassifierKind::Mock);
        }
        let model = module
            .argument("model")
            .ok_or(KeyError::MissingField("classifier.args.model"))?;
        Ok(ClassifierKind::Model {
            name: module.name.clone(),
            model,
        })
    }

    pub fn name(&self) -> &str {
        match self {
            ClassifierKind::Mock => MOCK_CLASSIFIER,
            ClassifierKind::Model { name, .. } => name,
        }
    }

    pub fn model(&self) -> &str {
        match self {
            ClassifierKind::Mock => MOCK_CLASSIFIER,
            ClassifierKind::Model { model, .. } => model,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultLimit {
    Default,
    Limit(String),
}

impl fmt::Display for ResultLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultLimit::Default => f.write_str("default"),
            ResultLimit::Limit(n) => f.write_str(n),
        }
    }
}

/// Identity of a run, projected from the configuration it was produced by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassificationKey {
    pub source_dataset: String,
    pub target_dataset: String,
    pub source_preprocessor: String,
    pub target_preprocessor: String,
    pub embedding_model: String,
    pub classifier: ClassifierKind,
    pub result_limit: ResultLimit,
}

impl ClassificationKey {
    pub fn from_configuration(config: &Configuration) -> Result<Self, KeyError> {
        let source_path = config
            .source_artifact_provider
            .argument("path")
            .ok_or(KeyError::MissingField("source_artifact_provider.args.path"))?;
        let target_path = config
            .target_artifact_provider
            .argument("path")
            .ok_or(KeyError::MissingField("target_artifact_provider.args.path"))?;
        let source_dataset = dataset_from_path(&source_path).ok_or_else(|| {
            KeyError::UnrecognizedDatasetPath {
                field: "source_artifact_provider.args.path",
                path: source_path.clone(),
            }
        })?;
        let target_dataset = dataset_from_path(&target_path).ok_or_else(|| {
            KeyError::UnrecognizedDatasetPath {
                field: "target_artifact_provider.args.path",
                path: target_path.clone(),
            }
        })?;
        let embedding_model = config
            .embedding_creator
            .argument("model")
            .ok_or(KeyError::MissingField("embedding_creator.args.model"))?;
        let classifier = config
            .classifier
            .as_ref()
            .ok_or(KeyError::MissingField("classifier"))
            .and_then(ClassifierKind::from_module)?;
        let result_limit = match config.target_store.argument("max_results") {
            Some(limit) => ResultLimit::Limit(limit),
            None => ResultLimit::Default,
        };

        Ok(ClassificationKey {
            source_dataset: source_dataset.to_string(),
            target_dataset: target_dataset.to_string(),
            source_preprocessor: config.source_preprocessor.name.clone(),
            target_preprocessor: config.target_preprocessor.name.clone(),
            embedding_model,
            classifier,
            result_limit,
        })
    }

    /// The key as a file name stem (no extension, no collision suffix).
    pub fn file_stem(&self) -> String {
        sanitize_file_name(&self.to_string())
    }
}

impl fmt::Display for ClassificationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let limit = self.result_limit.to_string();
        let parts = [
            self.source_dataset.as_str(),
            self.target_dataset.as_str(),
            self.source_preprocessor.as_str(),
            self.target_preprocessor.as_str(),
            self.embedding_model.as_str(),
            self.classifier.name(),
            self.classifier.model(),
            limit.as_str(),
        ];
        f.write_str(&parts.join(KEY_SEPARATOR))
    }
}

/// Dataset name of a provider path: the segment after the last `datasets`
/// segment, e.g. `./datasets/req2code/SMOS/UC` gives `req2code`. `.` and
/// `..` never name a dataset.
pub fn dataset_from_path(path: &str) -> Option<&str> {
    let segments: Vec<&str> = path.split(['/', '\\']).collect();
    let anchor = segments.iter().rposition(|s| *s == DATASETS_SEGMENT)?;
    segments
        .get(anchor + 1)
        .copied()
        .filter(|s| !matches!(*s, "" | "." | ".."))
}

/// Replaces characters that are illegal or awkward in file names.
pub fn sanitize_file_name(raw: &str) -> String {
    raw.chars()
        .map(|c| match c {
            ':' | '/' | '\\' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}
