//! Command-line renderer: run one workflow file against ComfyUI and save
//! its outputs to disk.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde_json::Value;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use illustrify_comfyui::{JobWatcher, WatchStrategy, WatcherConfig};
use illustrify_core::generation::random_seed;
use illustrify_core::workflow::{FieldPath, Workflow};

#[derive(Debug, Parser)]
#[command(name = "illustrify-render")]
#[command(about = "Render a ComfyUI workflow and save its outputs")]
#[command(version)]
struct Args {
    /// Workflow file in ComfyUI API format.
    #[arg(long)]
    workflow: PathBuf,

    /// Positive prompt.
    #[arg(long)]
    prompt: String,

    #[arg(long = "prompt-field", default_value = "100.inputs.text")]
    prompt_field: FieldPath,

    #[arg(long = "seed-field", default_value = "95.inputs.seed")]
    seed_field: FieldPath,

    /// Random when omitted.
    #[arg(long)]
    seed: Option<u64>,

    #[arg(long, default_value = "auto", env = "WATCH_STRATEGY")]
    strategy: WatchStrategy,

    #[arg(long = "timeout-secs", default_value = "300", env = "GENERATION_TIMEOUT_SECS")]
    timeout_secs: u64,

    #[arg(long = "out-dir", default_value = "image_outputs")]
    out_dir: PathBuf,

    #[arg(long = "comfyui-url", default_value = "http://127.0.0.1:8188", env = "COMFYUI_URL")]
    comfyui_url: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "illustrify_render=info,illustrify_comfyui=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    if args.timeout_secs == 0 {
        anyhow::bail!("--timeout-secs must be at least 1");
    }

    let workflow = Workflow::load(&args.workflow)
        .with_context(|| format!("Failed to load workflow {}", args.workflow.display()))?;
    let job = build_job(&workflow, &args)?;

    let mut config = WatcherConfig::from_api_url(args.comfyui_url.trim_end_matches('/'));
    config.timeout = Duration::from_secs(args.timeout_secs);
    config.strategy = args.strategy;
    let watcher = JobWatcher::new(config);

    tracing::info!(
        workflow = %args.workflow.display(),
        strategy = %args.strategy,
        url = %watcher.config().api_url,
        "Rendering",
    );
    let completed = watcher.execute(&job.to_value()).await?;
    if let Some(message) = completed.execution_error() {
        anyhow::bail!("ComfyUI reported an execution error: {message}");
    }

    let outputs = completed.outputs();
    if outputs.is_empty() {
        println!(
            "Job {} finished in {:.1}s with no outputs",
            completed.prompt_id,
            completed.elapsed.as_secs_f64()
        );
        return Ok(());
    }

    tokio::fs::create_dir_all(&args.out_dir)
        .await
        .with_context(|| format!("Failed to create {}", args.out_dir.display()))?;

    let mut saved = Vec::with_capacity(outputs.len());
    for (idx, output) in outputs.iter().enumerate() {
        let bytes = watcher
            .resolve(output)
            .await
            .with_context(|| format!("Failed to download {}", output.filename))?;
        let extension = output.extension().unwrap_or_else(|| "png".to_string());
        let path = args
            .out_dir
            .join(format!("{}_{idx}.{extension}", output.node_id));
        tokio::fs::write(&path, &bytes)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        tracing::debug!(path = %path.display(), bytes = bytes.len(), "Saved output");
        saved.push(path);
    }

    println!(
        "Job {} finished in {:.1}s via {}, saved {} file(s):",
        completed.prompt_id,
        completed.elapsed.as_secs_f64(),
        completed.strategy,
        saved.len()
    );
    for path in &saved {
        println!("  {}", path.display());
    }
    Ok(())
}

/// Apply the prompt and seed to a copy of the template.
fn build_job(workflow: &Workflow, args: &Args) -> anyhow::Result<Workflow> {
    let job = workflow
        .with_field(&args.prompt_field, Value::from(args.prompt.as_str()))
        .with_context(|| format!("Cannot set prompt at {}", args.prompt_field))?;

    let seed = args.seed.unwrap_or_else(random_seed);
    let job = job
        .with_field(&args.seed_field, Value::from(seed))
        .with_context(|| format!("Cannot set seed at {}", args.seed_field))?;
    tracing::info!(seed, "Seed applied");
    Ok(job)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec![
            "illustrify-render",
            "--workflow",
            "wf.json",
            "--prompt",
            "a lighthouse",
        ];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    fn template() -> Workflow {
        Workflow::from_value(json!({
            "100": {"class_type": "CLIPTextEncode", "inputs": {"text": "old"}},
            "95": {"class_type": "KSampler", "inputs": {"seed": 0}}
        }))
        .unwrap()
    }

    #[test]
    fn defaults_match_the_bundled_workflow() {
        let args = args(&[]);
        assert_eq!(args.prompt_field.to_string(), "100.inputs.text");
        assert_eq!(args.seed_field.to_string(), "95.inputs.seed");
        assert_eq!(args.out_dir, PathBuf::from("image_outputs"));
    }

    #[test]
    fn invalid_field_path_is_rejected() {
        let argv = [
            "illustrify-render",
            "--workflow",
            "wf.json",
            "--prompt",
            "x",
            "--seed-field",
            "95",
        ];
        assert!(Args::try_parse_from(argv).is_err());
        assert!(Args::try_parse_from(["illustrify-render", "--workflow", "wf.json"]).is_err());
    }

    #[test]
    fn job_gets_prompt_and_seed() {
        let args = args(&["--seed", "42"]);
        let job = build_job(&template(), &args).unwrap();
        let value = job.to_value();
        assert_eq!(value["100"]["inputs"]["text"], "a lighthouse");
        assert_eq!(value["95"]["inputs"]["seed"], 42);
    }

    #[test]
    fn seed_is_random_when_omitted() {
        let job = build_job(&template(), &args(&[])).unwrap();
        assert!(job.to_value()["95"]["inputs"]["seed"].as_u64().unwrap() >= 1);
    }

    #[test]
    fn unknown_node_is_an_error() {
        let args = args(&["--seed-field", "7.inputs.seed"]);
        assert!(build_job(&template(), &args).is_err());
    }
}
