use anyhow::Result;
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use sweep_core::ClassificationKey;
use sweep_runner::archive::{archive_dir, DEFAULT_REPORT_EXTENSION};

#[derive(Parser)]
#[command(
    name = "sweep",
    version,
    about = "Generate TLR experiment configurations and archive their reports"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the axes and combination count of a sweep plan.
    Describe {
        plan: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Write one configuration per combination of a sweep plan.
    Expand {
        plan: PathBuf,
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        no_manifest: bool,
        #[arg(long)]
        json: bool,
    },
    /// Print the classification key of a single report.
    Key {
        report: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Move reports into results/<source_dataset>/ named by their key.
    Archive {
        #[arg(default_value = ".")]
        dir: PathBuf,
        #[arg(long, default_value = DEFAULT_REPORT_EXTENSION)]
        extension: String,
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        json: bool,
    },
    /// Write a starter plan and template.
    Init {
        #[arg(long, default_value = "sweep")]
        dir: PathBuf,
        #[arg(long)]
        force: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let json_mode = command_json_mode(&cli.command);
    let result = run_command(cli.command);
    match result {
        Ok(Some(payload)) => {
            emit_json(&payload);
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(err) => {
            if json_mode {
                emit_json(&json_error("command_failed", format!("{:#}", err), json!({})));
                std::process::exit(1);
            }
            Err(err)
        }
    }
}

fn run_command(command: Commands) -> Result<Option<Value>> {
    match command {
        Commands::Describe { plan, json } => {
            let summary = sweep_runner::describe_plan(&plan)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "describe",
                    "summary": summary_to_json(&summary)
                })));
            }
            print_summary(&summary);
        }
        Commands::Expand {
            plan,
            dry_run,
            no_manifest,
            json,
        } => {
            let options = sweep_runner::ExpandOptions {
                dry_run,
                write_manifest: !no_manifest,
            };
            let result = sweep_runner::expand_plan(&plan, &options)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "expand",
                    "expand": expand_result_to_json(&result)
                })));
            }
            for generated in &result.generated {
                println!("{}", result.output_root.join(&generated.path).display());
            }
            if result.dry_run {
                println!("dry_run: {} configurations (nothing written)", result.generated.len());
            } else {
                println!("generated: {}", result.generated.len());
            }
            if result.verify_failures > 0 {
                println!("verify_failures: {}", result.verify_failures);
            }
            if let Some(manifest) = &result.manifest_path {
                println!("manifest: {}", manifest.display());
            }
        }
        Commands::Key { report, json } => {
            let key = sweep_runner::classify_report(&report)?;
            let root = report.parent().unwrap_or(Path::new("."));
            let archive_path = archive_dir(root, &key);
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "key",
                    "report": report.display().to_string(),
                    "key": key_to_json(&key),
                    "archive_dir": archive_path.display().to_string()
                })));
            }
            println!("key: {}", key);
            println!("file_stem: {}", key.file_stem());
            println!("archive_dir: {}", archive_path.display());
        }
        Commands::Archive {
            dir,
            extension,
            dry_run,
            json,
        } => {
            let options = sweep_runner::ArchiveOptions {
                extension: extension.trim_start_matches('.').to_string(),
                dry_run,
            };
            let summary = sweep_runner::archive_reports(&dir, &options)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "archive",
                    "archive": archive_summary_to_json(&summary)
                })));
            }
            print_archive_summary(&summary);
        }
        Commands::Init { dir, force } => {
            std::fs::create_dir_all(&dir)?;
            let plan_path = dir.join("plan.yaml");
            let template_path = dir.join("template.json");
            for p in [&plan_path, &template_path] {
                if !force && p.exists() {
                    return Err(anyhow::anyhow!(format!(
                        "init file already exists (use --force): {}",
                        p.display()
                    )));
                }
            }
            std::fs::write(&template_path, STARTER_TEMPLATE)?;
            std::fs::write(&plan_path, STARTER_PLAN)?;
            println!("wrote: {}", template_path.display());
            println!("wrote: {}", plan_path.display());
            println!("next: sweep describe {}", plan_path.display());
        }
    }
    Ok(None)
}

const STARTER_TEMPLATE: &str = r#"{
  "cache_dir": "./cache-r2r/<<DATASET>>",

  "gold_standard_configuration": {
    "path": "./datasets/req2req/<<DATASET>>/answer.csv",
    "hasHeader": "true"
  },

  "source_artifact_provider" : {
    "name" : "text",
    "args" : {
      "artifact_type" : "requirement",
      "path" : "./datasets/req2req/<<DATASET>>/high"
    }
  },
  "target_artifact_provider" : {
    "name" : "text",
    "args" : {
      "artifact_type" : "requirement",
      "path" : "./datasets/req2req/<<DATASET>>/low"
    }
  },
  "source_preprocessor" : {
    "name" : "artifact",
    "args" : {}
  },
  "target_preprocessor" : {
    "name" : "artifact",
    "args" : {}
  },
  "embedding_creator" : {
    "name" : "openai",
    "args" : {
      "model": "text-embedding-3-large"
    }
  },
  "source_store" : {
    "name" : "custom",
    "args" : { }
  },
  "target_store" : {
    "name" : "cosine_similarity",
    "args" : {
      "max_results" : "<<RETRIEVAL_COUNT>>"
    }
  },
  "classifier" : {
    "name" : "<<CLASSIFIER_MODE>>",
    "args" : {
      <<ARGS>>
    }
  },
  "result_aggregator" : {
    "name" : "any_connection",
    "args" : {}
  },
  "tracelinkid_postprocessor" : {
    "name" : "<<POSTPROCESSOR>>",
    "args" : {}
  }
}
"#;

const STARTER_PLAN: &str = "\
schema_version: sweep_plan_v1
template: template.json             # relative to this file
output_root: ../configs/req2req     # relative to this file
path: '${provider}/${dataset}/${dataset}_${classifier_mode}_${provider}_${classifier_model}.json'
verify: true
# placeholders:                     # extra tokens; every field already has <<FIELD>>
#   '<<<TARGET_ARTIFACT_PROVIDER>>>': target_provider
axes:
  - paired:                         # zipped: one dataset, its postprocessor, its retrieval count
      - name: dataset
        values: [GANNT, ModisDataset, CCHIT, WARC, dronology, CM1-NASA]
      - name: postprocessor
        values: [req2req, identity, identity, req2req, identity, identity]
      - name: retrieval_count
        values: [4, 4, 4, 4, 4, 4]
  - paired:
      - name: classifier_mode
        values: [mock, simple_openai, reasoning_openai, simple_ollama]
      - name: provider
        values: [none, gpt, gpt, ollama]
      - name: classifier_model
        values: [none, gpt-4o-mini-2024-07-18, gpt-4o-mini-2024-07-18, 'llama3.1:8b-instruct-fp16']
      - name: args
        values:
          - ''
          - '\"model\": \"${classifier_model}\"'
          - '\"model\": \"${classifier_model}\"'
          - '\"model\": \"${classifier_model}\"'
";

fn emit_json(value: &Value) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{}", s),
        Err(_) => println!(
            "{{\"ok\":false,\"error\":{{\"code\":\"serialization_error\",\"message\":\"failed to serialize JSON payload\",\"details\":{{}}}}}}"
        ),
    }
}

fn json_error(code: &str, message: String, details: Value) -> Value {
    json!({
        "ok": false,
        "error": {
            "code": code,
            "message": message,
            "details": details
        }
    })
}

fn command_json_mode(command: &Commands) -> bool {
    match command {
        Commands::Describe { json, .. }
        | Commands::Expand { json, .. }
        | Commands::Key { json, .. }
        | Commands::Archive { json, .. } => *json,
        Commands::Init { .. } => false,
    }
}

fn summary_to_json(summary: &sweep_runner::PlanSummary) -> Value {
    json!({
        "plan": summary.plan_path.display().to_string(),
        "template": summary.template_path.display().to_string(),
        "output_root": summary.output_root.display().to_string(),
        "path": summary.path_pattern,
        "fields": summary.fields,
        "groups": summary.groups.iter().map(|g| json!({
            "axes": g.axes,
            "paired": g.paired,
            "positions": g.positions,
        })).collect::<Vec<_>>(),
        "combinations": summary.combination_count,
        "inert_placeholders": summary.inert_placeholders,
        "verify": summary.verify,
    })
}

fn print_summary(summary: &sweep_runner::PlanSummary) {
    println!("plan: {}", summary.plan_path.display());
    println!("template: {}", summary.template_path.display());
    println!("output_root: {}", summary.output_root.display());
    println!("path: {}", summary.path_pattern);
    for group in &summary.groups {
        let kind = if group.paired { "paired" } else { "free" };
        println!(
            "axis_group: {} [{}] x{}",
            kind,
            group.axes.join(", "),
            group.positions
        );
    }
    println!("combinations: {}", summary.combination_count);
    if !summary.inert_placeholders.is_empty() {
        println!("inert_placeholders: {}", summary.inert_placeholders.join(", "));
    }
    println!("verify: {}", summary.verify);
}

fn expand_result_to_json(result: &sweep_runner::ExpandResult) -> Value {
    json!({
        "output_root": result.output_root.display().to_string(),
        "dry_run": result.dry_run,
        "count": result.generated.len(),
        "generated": result.generated.iter().map(|g| json!({
            "path": g.path.display().to_string(),
            "sha256": g.sha256,
        })).collect::<Vec<_>>(),
        "manifest": result.manifest_path.as_ref().map(|p| p.display().to_string()),
        "verify_failures": result.verify_failures,
    })
}

fn key_to_json(key: &ClassificationKey) -> Value {
    json!({
        "source_dataset": key.source_dataset,
        "target_dataset": key.target_dataset,
        "source_preprocessor": key.source_preprocessor,
        "target_preprocessor": key.target_preprocessor,
        "embedding_model": key.embedding_model,
        "classifier": key.classifier.name(),
        "classifier_model": key.classifier.model(),
        "result_limit": key.result_limit.to_string(),
        "file_stem": key.file_stem(),
    })
}

fn archive_summary_to_json(summary: &sweep_runner::ArchiveSummary) -> Value {
    json!({
        "dry_run": summary.dry_run,
        "archived_count": summary.archived_count(),
        "archived": summary.archived.iter().map(|a| json!({
            "source": a.source.display().to_string(),
            "destination": a.destination.display().to_string(),
            "key": key_to_json(&a.key),
        })).collect::<Vec<_>>(),
        "unclassified": summary.unclassified.iter().map(|s| json!({
            "path": s.path.display().to_string(),
            "reason": s.reason,
        })).collect::<Vec<_>>(),
        "failed": summary.failed.iter().map(|s| json!({
            "path": s.path.display().to_string(),
            "reason": s.reason,
        })).collect::<Vec<_>>(),
    })
}

fn print_archive_summary(summary: &sweep_runner::ArchiveSummary) {
    let verb = if summary.dry_run { "would move" } else { "moved" };
    for a in &summary.archived {
        println!("{}: {} -> {}", verb, a.source.display(), a.destination.display());
    }
    for s in &summary.unclassified {
        println!("unclassified: {} ({})", s.path.display(), s.reason);
    }
    for s in &summary.failed {
        println!("failed: {} ({})", s.path.display(), s.reason);
    }
    println!("archived: {}", summary.archived_count());
}
