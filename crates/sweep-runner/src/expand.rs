use crate::axis::{combinations, substitute_references, AxisGroup, Binding};
use crate::error::ExpandError;
use crate::template::Template;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use sweep_core::{atomic_write_bytes, ensure_dir, sanitize_file_name, Configuration};
use tracing::{info, warn};

/// One generated configuration document.
#[derive(Debug, Clone)]
pub struct RenderedConfig {
    /// Relative to the output root.
    pub path: PathBuf,
    pub binding: Binding,
    pub document: String,
}

/// Relative output path built from `${field}` references, e.g.
/// `${model}/${dataset}/${dataset}_${mode}.json`. Inserted values are
/// sanitized so they cannot introduce separators or `:`.
#[derive(Debug, Clone)]
pub struct PathPattern {
    pattern: String,
}

impl PathPattern {
    pub fn new(pattern: impl Into<String>) -> Result<Self, ExpandError> {
        let pattern = pattern.into();
        if pattern.trim().is_empty() {
            return Err(ExpandError::InvalidPath("pattern is empty".to_string()));
        }
        let as_path = Path::new(&pattern);
        if as_path.is_absolute()
            || as_path
                .components()
                .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)))
        {
            return Err(ExpandError::InvalidPath(format!(
                "{} must stay inside the output root",
                pattern
            )));
        }
        Ok(PathPattern { pattern })
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    pub fn render(&self, binding: &Binding) -> Result<PathBuf, ExpandError> {
        let rendered = substitute_references(&self.pattern, "path", |name| {
            binding.get(name).map(sanitize_file_name)
        })?;
        let mut path = PathBuf::new();
        for segment in rendered.split('/').filter(|s| !s.is_empty() && *s != ".") {
            if segment == ".." {
                return Err(ExpandError::InvalidPath(rendered.clone()));
            }
            path.push(segment);
        }
        if path.as_os_str().is_empty() {
            return Err(ExpandError::InvalidPath(rendered));
        }
        Ok(path)
    }
}

/// Renders one document per combination of `groups`. Nothing is written.
/// Two combinations that map to the same path are rejected, since the
/// later one would silently replace the earlier one on disk.
pub fn expand<F>(
    template: &Template,
    groups: &[AxisGroup],
    mut path_fn: F,
) -> Result<Vec<RenderedConfig>, ExpandError>
where
    F: FnMut(&Binding) -> Result<PathBuf, ExpandError>,
{
    let bindings = combinations(groups)?;
    let mut seen: HashMap<PathBuf, usize> = HashMap::with_capacity(bindings.len());
    let mut out = Vec::with_capacity(bindings.len());
    for (idx, binding) in bindings.into_iter().enumerate() {
        let document = template.render(&binding)?;
        let path = path_fn(&binding)?;
        if let Some(first) = seen.insert(path.clone(), idx) {
            return Err(ExpandError::PathCollision {
                path,
                first,
                second: idx,
            });
        }
        out.push(RenderedConfig {
            path,
            binding,
            document,
        });
    }
    Ok(out)
}

/// Writes every document under `root`, creating directories as needed.
/// Existing files are replaced. The first failure aborts the batch.
pub fn write_configs(root: &Path, rendered: &[RenderedConfig]) -> Result<Vec<PathBuf>, ExpandError> {
    let mut written = Vec::with_capacity(rendered.len());
    for config in rendered {
        let target = root.join(&config.path);
        if let Some(parent) = target.parent() {
            ensure_dir(parent).map_err(|e| ExpandError::io(parent, e))?;
        }
        atomic_write_bytes(&target, config.document.as_bytes())
            .map_err(|e| ExpandError::io(&target, e))?;
        info!(path = %target.display(), "wrote configuration");
        written.push(target);
    }
    Ok(written)
}

/// Parses each document as a pipeline configuration. Returns the number of
/// documents that did not parse; each failure is logged.
pub fn verify_configs(rendered: &[RenderedConfig]) -> usize {
    let mut failures = 0;
    for config in rendered {
        if let Err(e) = Configuration::from_json_str(&config.document) {
            warn!(path = %config.path.display(), error = %e, "generated document is not a valid configuration");
            failures += 1;
        }
    }
    failures
}
