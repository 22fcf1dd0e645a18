//! ppe_detect - run images through the PPE pipeline and print JSON reports
//!
//! Images are processed in order with one tracker, so a sequence of frames
//! from the same camera yields stable track ids.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;

use ppe_guard::{DetectOptions, ServiceConfig, ServiceContext};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// JPEG or PNG frames, processed in order.
    #[arg(required = true)]
    images: Vec<PathBuf>,
    /// Config file (JSON, or TOML by extension).
    #[arg(long, env = "PPE_CONFIG")]
    config: Option<PathBuf>,
    /// Confidence threshold for these frames (default: from config).
    #[arg(long)]
    confidence: Option<f32>,
    /// Zone file (YAML, TOML or JSON) replacing the configured one.
    #[arg(long)]
    zones: Option<PathBuf>,
    /// Pretty-print each report.
    #[arg(long)]
    pretty: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let mut config = ServiceConfig::load_from(args.config.as_deref())?;
    if let Some(path) = args.zones {
        config.zones.enabled = true;
        config.zones.config_path = Some(path);
    }
    let ctx = ServiceContext::from_config(config)?;
    if !ctx.is_ready() {
        return Err(anyhow!(
            "no inference backend could be loaded (model {})",
            ctx.config().model.path.display()
        ));
    }

    let options = DetectOptions {
        confidence_threshold: args.confidence,
    };
    for path in &args.images {
        let bytes =
            std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        let report = ctx
            .detect_image(&bytes, options)
            .map_err(|err| anyhow!("{}: {}", path.display(), err))?;
        let line = serde_json::json!({
            "image": path.display().to_string(),
            "report": report,
        });
        if args.pretty {
            println!("{}", serde_json::to_string_pretty(&line)?);
        } else {
            println!("{}", serde_json::to_string(&line)?);
        }
    }
    Ok(())
}
