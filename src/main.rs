use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use detr_batch::common::ModelSpec;
use detr_batch::config::{InferenceConfig, TrainConfig, DEFAULT_CONFIG_PATH};
use detr_batch::detection_runners::OrtDetr;
use detr_batch::pipeline::{InferenceContext, Pipeline};
use detr_batch::result_writer::ResultWriter;
use detr_batch::{InferError, Palette};

/// Runs a trained DETR-family detector over a directory of images.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Inference configuration file
    #[arg(long, value_name = "CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,
    /// Override `[parameter] threshold`
    #[arg(long)]
    pub threshold: Option<f32>,
    /// Override `gpu` (negative for CPU)
    #[arg(long, allow_hyphen_values = true)]
    pub gpu: Option<i32>,
    /// Also write annotated PNG copies of every image
    #[arg(long)]
    pub visualize: bool,
    /// Debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

/// Regular files directly under `dir`, sorted by path.
fn list_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("reading input directory {}", dir.display()))? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            paths.push(entry.path());
        }
    }
    paths.sort();
    Ok(paths)
}

fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();

    let mut cfg = InferenceConfig::load(&args.config)?;
    if let Some(threshold) = args.threshold {
        cfg = cfg.with_threshold(threshold)?;
    }
    if let Some(gpu) = args.gpu {
        cfg = cfg.with_gpu(gpu);
    }
    if args.visualize {
        cfg.output.save_visualization = true;
    }

    let model_cfg = cfg.model_config()?;
    log::debug!("Model config:\n{model_cfg}");
    let input_size = TrainConfig::load(&cfg.train_result_path)?.input_size();
    let preprocess = cfg.preprocess_config(input_size)?;
    let spec = ModelSpec::from_file(model_cfg.architecture_path())?;

    let output_dir = cfg.output_dir();
    fs::create_dir_all(&output_dir).with_context(|| format!("creating {}", output_dir.display()))?;

    log::info!("Train result: {}", cfg.train_result_path.display());
    log::info!("Input: {} | Output: {}", cfg.input_path.display(), output_dir.display());
    log::info!(
        "Requested device: {} | Threshold: {} | Input size: {}x{}",
        model_cfg.inference_device,
        cfg.threshold(),
        input_size.0,
        input_size.1
    );

    let mut writer = ResultWriter::new(&output_dir);
    if cfg.output.save_visualization {
        writer = writer.with_visualization(Palette::seeded(cfg.seed, spec.num_classes));
    }
    let ctx = InferenceContext::new(cfg.threshold(), preprocess, model_cfg.inference_device, &output_dir)
        .with_writer(writer);

    let mut pipeline = Pipeline::new(ctx);
    pipeline.load(|| OrtDetr::load(spec, &model_cfg))?;
    if let Some((h, w)) = pipeline.model().and_then(|m| m.static_input_size()) {
        if (h as u32, w as u32) != input_size {
            return Err(InferError::Config(format!(
                "checkpoint expects {h}x{w} input but train_config.toml says {}x{}",
                input_size.0, input_size.1
            ))
            .into());
        }
    }

    let images = list_images(&cfg.input_path)?;
    log::info!("Found {} input files", images.len());

    let cancel = Arc::new(AtomicBool::new(false));
    let flag = cancel.clone();
    ctrlc::set_handler(move || {
        log::warn!("Interrupt received, stopping after the current image");
        flag.store(true, Ordering::SeqCst);
    })
    .context("installing Ctrl-C handler")?;

    let summary = pipeline.run_batch(&images, &cancel)?;
    summary.log();
    pipeline.finish();

    Ok(())
}
