use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use officecam::camera::video_file_source;
use officecam::offline::{process_image, process_video, wants_mjpeg, InputKind, OfflineProcessor};
use officecam::preview::{send_stage, MjpegRecorder};
use officecam::{
    FrameProcessor, OfficecamConfig, OfficecamOrchestrator, OutputStage, PassthroughTracker,
    PreviewClient,
};
use std::path::PathBuf;
use tracing::{debug, error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;

#[derive(Parser, Debug)]
#[command(name = "officecam")]
#[command(about = "Office occupancy camera agent with live preview streaming")]
#[command(version)]
#[command(long_about = "Captures frames from the office camera, counts people with a pluggable \
tracker, reports a debounced occupancy estimate to the core service and mirrors a chosen \
processing stage to a local preview viewer. Intended to run under systemd.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "officecam.toml", help = "Path to TOML configuration file")]
    config: PathBuf,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit without starting the agent")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the monitoring agent (default)
    Run,

    /// Switch the preview stage of a running agent
    Preview {
        #[arg(long, value_parser = parse_stage, help = "off, captured, downscaled or annotated")]
        output: OutputStage,
    },

    /// Watch the preview stream of a running agent
    View {
        /// Switch to this stage before connecting
        #[arg(long, value_parser = parse_stage)]
        output: Option<OutputStage>,

        /// Append received frames to a Motion JPEG file
        #[arg(long, value_name = "FILE")]
        record: Option<PathBuf>,

        /// Write the last received frame as a JPEG
        #[arg(long, value_name = "FILE")]
        snapshot: Option<PathBuf>,

        /// Stop after this many frames
        #[arg(long)]
        frames: Option<u64>,
    },

    /// Run an image or video file through the processing stages and save the chosen one
    Process {
        /// Input image (jpg, png, bmp, tiff) or video file (needs the camera feature)
        input: PathBuf,

        #[arg(long, value_parser = parse_stage, default_value = "annotated")]
        output: OutputStage,

        /// Output path: a JPEG of the last frame, or every frame for .mjpeg/.mjpg
        #[arg(long)]
        out: PathBuf,
    },
}

fn parse_stage(token: &str) -> std::result::Result<OutputStage, String> {
    token.parse().map_err(|e: officecam::error::PreviewError| e.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print_default_config()?;
        return Ok(());
    }

    let config = OfficecamConfig::load_from_file(&args.config)
        .with_context(|| format!("Failed to load configuration from {}", args.config.display()))?;

    let _log_guard = init_logging(&args, &config)?;
    info!("Starting officecam v{}", env!("CARGO_PKG_VERSION"));

    if args.validate_config {
        match config.validate() {
            Ok(()) => {
                info!("Configuration validation successful");
                println!("✓ Configuration is valid");
                return Ok(());
            }
            Err(e) => {
                error!("Configuration validation failed: {}", e);
                eprintln!("✗ Configuration validation failed: {}", e);
                std::process::exit(1);
            }
        }
    }

    match args.command.unwrap_or(Command::Run) {
        Command::Run => run_agent(config).await,
        Command::Preview { output } => {
            let addr = config.preview.command_addr()?;
            if let Err(e) = send_stage(addr, output).await {
                eprintln!("Could not reach officecam at {}: {}", addr, e);
                std::process::exit(1);
            }
            println!("Preview stage set to {}", output);
            Ok(())
        }
        Command::View {
            output,
            record,
            snapshot,
            frames,
        } => view(&config, output, record, snapshot, frames).await,
        Command::Process { input, output, out } => process_file(&config, input, output, out).await,
    }
}

async fn run_agent(config: OfficecamConfig) -> Result<()> {
    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        bail!("invalid configuration: {}", e);
    }

    let mut orchestrator = OfficecamOrchestrator::from_config(config)
        .await
        .map_err(|e| {
            error!("Failed to create orchestrator: {}", e);
            e
        })?;

    let exit_code = orchestrator.run().await.map_err(|e| {
        error!("System error during execution: {}", e);
        e
    })?;

    info!("Officecam exited with code: {}", exit_code);

    // Exit with appropriate code for systemd
    std::process::exit(exit_code);
}

async fn view(
    config: &OfficecamConfig,
    output: Option<OutputStage>,
    record: Option<PathBuf>,
    snapshot: Option<PathBuf>,
    max_frames: Option<u64>,
) -> Result<()> {
    if let Some(stage) = output {
        send_stage(config.preview.command_addr()?, stage)
            .await
            .context("Could not reach the control port")?;
    }

    let addr = config.preview.stream_addr()?;
    let mut client = PreviewClient::connect(addr)
        .await
        .with_context(|| format!("Could not connect to preview stream at {}", addr))?;

    let mut recorder = match record {
        Some(path) => Some(MjpegRecorder::create(path, config.report.jpeg_quality).await?),
        None => None,
    };
    let mut last = None;

    loop {
        let frame = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            frame = client.next_frame() => frame,
        };

        let frame = match frame {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                info!("Preview stream closed by the agent");
                break;
            }
            Err(e) => {
                warn!("Preview stream error: {}", e);
                break;
            }
        };

        debug!("Frame {} shape {:?}", frame.id, frame.shape());
        if let Some(recorder) = recorder.as_mut() {
            recorder.record(&frame).await?;
        }
        last = Some(frame);

        if max_frames.is_some_and(|max| client.frames_received() >= max) {
            break;
        }
    }

    if let Some(recorder) = recorder {
        recorder.finish().await?;
    }

    if let (Some(path), Some(frame)) = (snapshot, last) {
        let jpeg = FrameProcessor::encode_jpeg(&frame, config.report.jpeg_quality)?;
        tokio::fs::write(&path, jpeg).await?;
        println!("Saved last frame to {}", path.display());
    }

    println!("Received {} frames", client.frames_received());
    Ok(())
}

async fn process_file(
    config: &OfficecamConfig,
    input: PathBuf,
    output: OutputStage,
    out: PathBuf,
) -> Result<()> {
    let mut processor = OfflineProcessor::new(
        Box::new(PassthroughTracker::new()),
        config.pipeline.downscaled_resolution,
        output,
    )?;

    let last = match InputKind::from_path(&input) {
        InputKind::Image => {
            let bytes = tokio::fs::read(&input)
                .await
                .with_context(|| format!("Failed to read {}", input.display()))?;
            Some(process_image(&mut processor, &bytes)?)
        }
        InputKind::Video => {
            let mut source = video_file_source(config.camera.clone(), &input)?;
            let mut recorder = if wants_mjpeg(&out) {
                Some(MjpegRecorder::create(&out, config.report.jpeg_quality).await?)
            } else {
                None
            };

            let last = process_video(
                source.as_mut(),
                &mut processor,
                recorder.as_mut(),
                config.camera.capture_timeout(),
            )
            .await
            .with_context(|| format!("Failed to process video {}", input.display()))?;

            if let Some(recorder) = recorder {
                let frames = recorder.finish().await?;
                println!("Wrote {} {} frames to {}", frames, output, out.display());
                return Ok(());
            }
            last
        }
    };

    let Some(frame) = last else {
        bail!("{} produced no frames", input.display());
    };

    info!(
        "Processed {}: {} frames, peak count {}",
        input.display(),
        processor.frames_processed(),
        processor.peak_count()
    );

    let jpeg = FrameProcessor::encode_jpeg(&frame, config.report.jpeg_quality)?;
    tokio::fs::write(&out, jpeg)
        .await
        .with_context(|| format!("Failed to write {}", out.display()))?;
    println!("Wrote {} stage to {}", output, out.display());
    Ok(())
}

fn init_logging(args: &Args, config: &OfficecamConfig) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let log_level = if args.debug {
        "debug"
    } else if args.quiet {
        "error"
    } else {
        config.logging.level.as_str()
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("officecam={}", log_level)));

    let format = args
        .log_format
        .as_deref()
        .unwrap_or(config.logging.format.as_str());

    let fmt_layer = match format {
        "json" => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        "compact" => fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed(),
        "pretty" => fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        other => {
            eprintln!("Warning: Unknown log format '{}', using default", other);
            fmt::layer().with_target(true).boxed()
        }
    };

    let (file_layer, guard) = match &config.logging.directory {
        Some(directory) => {
            let appender = tracing_appender::rolling::Builder::new()
                .rotation(tracing_appender::rolling::Rotation::DAILY)
                .filename_prefix("officecam")
                .filename_suffix("log")
                .max_log_files(7)
                .build(directory)
                .with_context(|| format!("Failed to open log directory {}", directory))?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(file_layer)
        .with(env_filter)
        .init();

    Ok(guard)
}

/// Print default configuration in TOML format
fn print_default_config() -> Result<()> {
    println!("# Officecam Configuration File");
    println!("# Default values for every option. Optional keys:");
    println!("#   report.core_url    base URL of the core service (reporting disabled when unset)");
    println!("#   upload.sink        rtmp://, udp://host:port or tcp://host:port");
    println!("#   logging.directory  directory for the daily rolling log file");
    println!();
    println!("{}", toml::to_string_pretty(&OfficecamConfig::default())?);
    Ok(())
}
