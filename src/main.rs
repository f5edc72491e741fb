mod cli;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands, TransformArgs};
use pf_pipeline::{
    ConvertFormatStep, CropStep, GrayscaleStep, LoggingHook, QualityStep, ResizeStep, StripExifStep, ThumbnailStep,
};
use pixelforge::{
    config, AdaptiveTarget, Config, EncodeOptions, Format, LocalStorage, ProcessingResult, Processor, Scope, Source,
    StepRef, StorageAdapter, StorageKey,
};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = match &cli.command {
        Commands::Validate { config } => config.clone().or(cli.config.clone()),
        _ => cli.config.clone(),
    };
    let config = config::load_config_or_default(config_path.as_deref());

    // Respect RUST_LOG env var if set, otherwise use the verbose flag or the
    // configured level
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        let level = match (&config, cli.verbose) {
            (_, true) => "debug",
            (Ok(config), false) => config.log_level.as_str(),
            (Err(_), false) => "info",
        };
        format!("pixelforge={level},pf_core={level},pf_codec={level},pf_pipeline={level}")
    });

    tracing_subscriber::fmt().with_env_filter(&env_filter).init();

    match cli.command {
        Commands::Process {
            input,
            output,
            transform,
        } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(process_file(config?, &input, &output, &transform))
        }
        Commands::Batch {
            inputs,
            out_dir,
            bucket,
            transform,
        } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(batch_files(config?, inputs, out_dir, &bucket, &transform))
        }
        Commands::Validate { .. } => validate_config(config_path.as_deref(), config),
        Commands::Version => {
            println!("pixelforge {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Root scope cancelled on Ctrl-C.
fn interruptible_scope() -> Scope {
    let scope = Scope::new();
    let on_signal = scope.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, cancelling");
            on_signal.cancel();
        }
    });
    scope
}

fn build_processor(config: Config) -> Result<Processor> {
    let processor = Processor::with_default_codecs(config)?;
    processor.add_hook(Arc::new(LoggingHook));
    Ok(processor)
}

/// Output format: `--format`, else the output file's extension, else the
/// configured default.
fn output_format(args: &TransformArgs, output: Option<&Path>, default: Format) -> Format {
    args.format
        .or_else(|| {
            output
                .and_then(|path| path.extension())
                .and_then(|ext| ext.to_str())
                .and_then(|ext| ext.parse().ok())
        })
        .unwrap_or(default)
}

/// Step list for the requested transforms, ending in an encode.
fn build_steps(processor: &Processor, args: &TransformArgs, format: Format) -> Vec<StepRef> {
    let mut steps: Vec<StepRef> = vec![processor.decode_step()];

    if let Some((x, y, w, h)) = args.crop {
        steps.push(Arc::new(CropStep::new(x, y, w, h)));
    }
    if let Some((w, h)) = args.resize {
        steps.push(Arc::new(ResizeStep::new(w, h)));
    }
    if let Some(size) = args.thumbnail {
        steps.push(Arc::new(ThumbnailStep::new(size)));
    }
    if args.grayscale {
        steps.push(Arc::new(GrayscaleStep));
    }
    if args.strip_exif {
        steps.push(Arc::new(StripExifStep));
    }
    steps.push(Arc::new(ConvertFormatStep::new(format)));
    if let Some(quality) = args.quality {
        steps.push(Arc::new(QualityStep::new(quality)));
    }

    let adaptive = &processor.config().adaptive;
    let target = args
        .target_size
        .or((adaptive.enabled && adaptive.target_size_bytes > 0).then_some(adaptive.target_size_bytes));
    match target {
        Some(bytes) => steps.push(processor.adaptive_step(AdaptiveTarget::Bytes(bytes))),
        None => steps.push(processor.encode_step(EncodeOptions {
            strip_metadata: args.strip_exif,
            ..EncodeOptions::default()
        })),
    }
    steps
}

async fn open_source(path: &Path) -> Result<Source> {
    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("Failed to open input: {:?}", path))?;
    let size = file.metadata().await?.len();
    Ok(Source::from_reader(file)
        .with_name(path.display().to_string())
        .with_size(size))
}

fn encoded_bytes(result: &ProcessingResult) -> Result<bytes::Bytes> {
    result
        .primary
        .encoded()
        .cloned()
        .context("pipeline produced no encoded output")
}

fn print_summary(label: &str, result: &ProcessingResult) {
    let (width, height) = result.primary.dimensions();
    println!(
        "{}: {}x{} {} {} bytes in {:?}",
        label,
        width,
        height,
        result.primary.format(),
        result.primary.metadata().size_bytes,
        result.duration
    );
    let mut timings: Vec<_> = result.step_timings.iter().collect();
    timings.sort_by(|a, b| b.1.cmp(a.1));
    for (step, elapsed) in timings {
        println!("  {:<20} {:?}", step, elapsed);
    }
}

async fn process_file(config: Config, input: &Path, output: &Path, args: &TransformArgs) -> Result<()> {
    let format = output_format(args, Some(output), config.default_format);
    let processor = build_processor(config)?;
    let steps = build_steps(&processor, args, format);
    let scope = interruptible_scope();

    let source = open_source(input).await?;
    let result = processor.process(&scope, source, &steps).await?;

    tokio::fs::write(output, encoded_bytes(&result)?)
        .await
        .with_context(|| format!("Failed to write output: {:?}", output))?;
    print_summary(&output.display().to_string(), &result);
    Ok(())
}

async fn batch_files(
    config: Config,
    inputs: Vec<PathBuf>,
    out_dir: Option<PathBuf>,
    bucket: &str,
    args: &TransformArgs,
) -> Result<()> {
    let root = out_dir.unwrap_or_else(|| config.storage.root_dir.clone());
    let storage = LocalStorage::new(root);
    let format = output_format(args, None, config.default_format);
    let processor = build_processor(config)?;
    let steps = build_steps(&processor, args, format);
    let scope = interruptible_scope();

    let mut sources = Vec::with_capacity(inputs.len());
    for input in &inputs {
        sources.push(open_source(input).await?);
    }

    let results = processor.batch(&scope, sources, &steps).await;

    let mut failures = 0usize;
    for (input, result) in inputs.iter().zip(results) {
        let result = match result {
            Ok(result) => result,
            Err(e) => {
                failures += 1;
                eprintln!("{}: {}", input.display(), e);
                continue;
            }
        };
        let stem = input
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("image");
        let key = StorageKey::new(bucket, format!("{}.{}", stem, result.primary.format().extension()));
        storage.put(&key, encoded_bytes(&result)?).await?;
        print_summary(&storage.root().join(&key.bucket).join(&key.path).display().to_string(), &result);
    }

    let stats = processor.stats();
    println!("\n{} processed, {} failed", stats.processed, stats.errors);
    if failures > 0 {
        anyhow::bail!("{} of {} inputs failed", failures, inputs.len());
    }
    Ok(())
}

fn validate_config(path: Option<&Path>, config: Result<Config>) -> Result<()> {
    match path {
        Some(p) => println!("Validating config: {:?}", p),
        None => println!("No config file specified, checking default locations"),
    }
    let config = config?;
    println!("✓ Configuration is valid");
    println!("  Workers: {}", config.workers());
    println!("  Queue capacity: {}", config.queue_capacity);
    println!("  Job timeout: {:?}", config.job_timeout());
    println!("  Retries: {} (delay {:?})", config.max_retries, config.retry_delay());
    println!("  Default: {} at quality {}", config.default_format, config.default_quality);
    println!(
        "  Adaptive: {}",
        if config.adaptive.enabled { "enabled" } else { "disabled" }
    );
    println!("  Storage root: {:?}", config.storage.root_dir);
    Ok(())
}
