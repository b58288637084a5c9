pub mod archive;
pub mod axis;
pub mod error;
pub mod expand;
pub mod template;

pub use archive::{
    archive_reports, classify_report, classify_text, ArchiveOptions, ArchiveSummary,
    ArchivedReport, SkippedReport,
};
pub use axis::{combination_count, combinations, Axis, AxisGroup, Binding, Encoding};
pub use error::{ExpandError, ReportError};
pub use expand::{expand, verify_configs, write_configs, PathPattern, RenderedConfig};
pub use template::Template;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use sweep_core::{atomic_write_json_pretty, sha256_bytes};
use tracing::info;

pub const PLAN_SCHEMA_VERSION: &str = "sweep_plan_v1";
pub const MANIFEST_SCHEMA_VERSION: &str = "sweep_manifest_v1";
pub const MANIFEST_FILE: &str = "sweep_manifest.json";

/// Sweep plan as written on disk (YAML).
#[derive(Debug, Clone, Deserialize)]
pub struct SweepPlan {
    pub schema_version: String,
    /// Relative to the plan file.
    pub template: PathBuf,
    /// Relative to the plan file.
    pub output_root: PathBuf,
    /// Output path pattern below `output_root`.
    pub path: String,
    /// Extra tokens, token -> field. Every field already has `<<FIELD>>`.
    #[serde(default)]
    pub placeholders: BTreeMap<String, String>,
    pub axes: Vec<AxisGroup>,
    #[serde(default)]
    pub verify: bool,
}

/// A plan with its paths resolved and its template prepared.
pub struct LoadedPlan {
    pub plan_path: PathBuf,
    pub plan: SweepPlan,
    pub template_path: PathBuf,
    pub output_root: PathBuf,
    pub fields: Vec<String>,
    pub template: Template,
    pub path_pattern: PathPattern,
    pub template_sha256: String,
}

pub fn load_plan(path: &Path) -> Result<LoadedPlan> {
    let plan_dir = path.parent().unwrap_or(Path::new(".")).to_path_buf();
    let raw_yaml = fs::read_to_string(path)
        .with_context(|| format!("failed to read sweep plan {}", path.display()))?;
    let yaml_value: serde_yaml::Value = serde_yaml::from_str(&raw_yaml)
        .with_context(|| format!("invalid YAML in {}", path.display()))?;
    let json_value: Value = serde_json::to_value(yaml_value)?;
    let plan: SweepPlan = serde_json::from_value(json_value)
        .with_context(|| format!("invalid sweep plan {}", path.display()))?;
    if plan.schema_version != PLAN_SCHEMA_VERSION {
        return Err(anyhow!(
            "unsupported sweep plan schema_version: {}",
            plan.schema_version
        ));
    }

    let template_path = resolve_relative(&plan_dir, &plan.template);
    let output_root = resolve_relative(&plan_dir, &plan.output_root);
    let template_text = fs::read_to_string(&template_path)
        .with_context(|| format!("failed to read template {}", template_path.display()))?;
    let template_sha256 = sha256_bytes(template_text.as_bytes());
    let fields = axis::validate_groups(&plan.axes)?;
    let template = Template::new(template_text, &fields, &plan.placeholders)?;
    let path_pattern = PathPattern::new(plan.path.clone())?;

    Ok(LoadedPlan {
        plan_path: path.to_path_buf(),
        plan,
        template_path,
        output_root,
        fields,
        template,
        path_pattern,
        template_sha256,
    })
}

fn resolve_relative(base: &Path, p: &Path) -> PathBuf {
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        base.join(p)
    }
}

pub struct GroupSummary {
    pub axes: Vec<String>,
    pub paired: bool,
    pub positions: usize,
}

pub struct PlanSummary {
    pub plan_path: PathBuf,
    pub template_path: PathBuf,
    pub output_root: PathBuf,
    pub path_pattern: String,
    pub fields: Vec<String>,
    pub groups: Vec<GroupSummary>,
    pub combination_count: usize,
    pub inert_placeholders: Vec<String>,
    pub verify: bool,
}

pub fn describe_plan(path: &Path) -> Result<PlanSummary> {
    let loaded = load_plan(path)?;
    let groups = loaded
        .plan
        .axes
        .iter()
        .map(|g| GroupSummary {
            axes: g.axes().iter().map(|a| a.name.clone()).collect(),
            paired: matches!(g, AxisGroup::Paired { .. }),
            positions: g.positions(),
        })
        .collect();
    Ok(PlanSummary {
        combination_count: combination_count(&loaded.plan.axes)?,
        inert_placeholders: loaded
            .template
            .inert_tokens()
            .into_iter()
            .map(str::to_string)
            .collect(),
        plan_path: loaded.plan_path,
        template_path: loaded.template_path,
        output_root: loaded.output_root,
        path_pattern: loaded.plan.path,
        fields: loaded.fields,
        groups,
        verify: loaded.plan.verify,
    })
}

#[derive(Debug, Clone)]
pub struct ExpandOptions {
    pub dry_run: bool,
    pub write_manifest: bool,
}

impl Default for ExpandOptions {
    fn default() -> Self {
        ExpandOptions {
            dry_run: false,
            write_manifest: true,
        }
    }
}

pub struct GeneratedConfig {
    /// Relative to the output root.
    pub path: PathBuf,
    pub sha256: String,
}

pub struct ExpandResult {
    pub output_root: PathBuf,
    pub generated: Vec<GeneratedConfig>,
    pub manifest_path: Option<PathBuf>,
    pub verify_failures: usize,
    pub dry_run: bool,
}

/// Renders every combination of the plan and, unless `dry_run`, writes the
/// documents under the plan's output root.
pub fn expand_plan(path: &Path, options: &ExpandOptions) -> Result<ExpandResult> {
    let loaded = load_plan(path)?;
    let rendered = expand(&loaded.template, &loaded.plan.axes, |b| {
        loaded.path_pattern.render(b)
    })?;
    let verify_failures = if loaded.plan.verify {
        verify_configs(&rendered)
    } else {
        0
    };

    let generated: Vec<GeneratedConfig> = rendered
        .iter()
        .map(|r| GeneratedConfig {
            path: r.path.clone(),
            sha256: sha256_bytes(r.document.as_bytes()),
        })
        .collect();

    let mut manifest_path = None;
    if !options.dry_run {
        write_configs(&loaded.output_root, &rendered)?;
        if options.write_manifest {
            let target = loaded.output_root.join(MANIFEST_FILE);
            let manifest = build_manifest(&loaded, &rendered, &generated);
            atomic_write_json_pretty(&target, &manifest)
                .with_context(|| format!("failed to write manifest {}", target.display()))?;
            manifest_path = Some(target);
        }
        info!(
            count = generated.len(),
            output_root = %loaded.output_root.display(),
            "expanded sweep plan"
        );
    }

    Ok(ExpandResult {
        output_root: loaded.output_root,
        generated,
        manifest_path,
        verify_failures,
        dry_run: options.dry_run,
    })
}

fn build_manifest(
    loaded: &LoadedPlan,
    rendered: &[RenderedConfig],
    generated: &[GeneratedConfig],
) -> Value {
    let entries: Vec<Value> = rendered
        .iter()
        .zip(generated.iter())
        .map(|(r, g)| {
            json!({
                "path": g.path.to_string_lossy(),
                "sha256": g.sha256,
                "binding": r.binding.to_json(),
            })
        })
        .collect();
    json!({
        "schema_version": MANIFEST_SCHEMA_VERSION,
        "generated_at": Utc::now().to_rfc3339(),
        "plan": loaded.plan_path.display().to_string(),
        "template": loaded.template_path.display().to_string(),
        "template_sha256": loaded.template_sha256,
        "path_pattern": loaded.plan.path,
        "count": entries.len(),
        "entries": entries,
    })
}
