use anyhow::Result;
use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;

use panexam::{
    sensor_event_channel, AcquisitionOrchestrator, ErrorType, ExamEvent, ExamSpecification,
    ExamState, ExamType, PanexamConfig, PatientSize, SensorEventPump, SimulatedDevice,
    SimulatedSensor,
};

#[derive(Parser, Debug)]
#[command(name = "panexam")]
#[command(about = "Panoramic dental X-ray acquisition against simulated hardware")]
#[command(version)]
#[command(long_about = "Runs one panoramic exam through validation, preparation, \
configuration, acquisition, reconstruction and post-processing using the simulated \
positioning device and imaging sensor. The stored image path and exam result are \
printed when the run ends.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "panexam.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit without running an exam")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    /// Also write logs to daily rolling files in this directory
    #[arg(long, value_name = "DIR")]
    log_dir: Option<String>,

    /// Exam program
    #[arg(long, default_value = "pan_standard", help = "pan_standard, pan_child, bitewing or tmj")]
    exam_type: String,

    /// Patient size used for the recommended factors
    #[arg(long, default_value = "medium", help = "child, small, medium or large")]
    patient_size: String,

    /// Tube voltage override in kV
    #[arg(long)]
    kv: Option<f32>,

    /// Tube current override in mA
    #[arg(long)]
    ma: Option<f32>,

    /// Enable modulated radiation
    #[arg(long)]
    mrt: bool,

    /// Abort once this many frames have been accepted
    #[arg(long, value_name = "N")]
    abort_after_frames: Option<u32>,

    /// Simulate lost readouts for these frame indices
    #[arg(long, value_name = "INDEX")]
    drop_frame: Vec<u32>,

    /// Simulate a sensor error with this code at --sensor-error-frame
    #[arg(long, value_name = "CODE", requires = "sensor_error_frame")]
    sensor_error_code: Option<i32>,

    #[arg(long, value_name = "INDEX")]
    sensor_error_frame: Option<u32>,

    /// Give up waiting for the exam after this many seconds
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    // Handle special modes that don't require full initialization
    if args.print_config {
        print_default_config()?;
        return Ok(ExitCode::SUCCESS);
    }

    // Held until main returns so the file writer flushes
    let _log_guard = init_logging(&args)?;

    info!("Starting panexam v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let config = match PanexamConfig::load_from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    match config.validate() {
        Ok(()) if args.validate_config => {
            info!("Configuration validation successful");
            println!("✓ Configuration is valid");
            return Ok(ExitCode::SUCCESS);
        }
        Ok(()) => {}
        Err(e) => {
            error!("Configuration validation failed: {}", e);
            eprintln!("✗ Configuration validation failed: {}", e);
            return Ok(ExitCode::FAILURE);
        }
    }

    let exam_type: ExamType = args.exam_type.parse().map_err(anyhow::Error::msg)?;
    let patient_size: PatientSize = args.patient_size.parse().map_err(anyhow::Error::msg)?;

    let (sender, receiver) = sensor_event_channel(config.system.sensor_queue_capacity);
    let sensor = Arc::new(SimulatedSensor::autonomous(sender));
    let device = Arc::new(SimulatedDevice::from_config(&config.device));
    sensor.update_faults(|faults| {
        faults.drop_frames.extend(args.drop_frame.iter().copied());
        if let (Some(code), Some(index)) = (args.sensor_error_code, args.sensor_error_frame) {
            faults.error_at = Some((index, code));
        }
    });

    let orchestrator = Arc::new(
        AcquisitionOrchestrator::builder()
            .config(config)
            .device(device)
            .sensor(sensor)
            .build()
            .map_err(|e| {
                error!("Failed to create orchestrator: {}", e);
                e
            })?,
    );
    let pump = SensorEventPump::spawn(receiver, Arc::clone(&orchestrator))?;
    let monitor = spawn_event_monitor(Arc::clone(&orchestrator), args.abort_after_frames);

    let state = run_exam(&orchestrator, &args, exam_type, patient_size).await;

    let delivered = pump.shutdown();
    monitor.abort();
    info!("Sensor event pump delivered {} events", delivered);

    let result = orchestrator.exam_result();
    println!("{}", serde_json::to_string_pretty(&result)?);

    let exit_code = exit_status(state);
    info!("panexam exited with code: {}", exit_code);
    Ok(ExitCode::from(exit_code))
}

fn exit_status(state: ExamState) -> u8 {
    match state {
        ExamState::Completed => 0,
        ExamState::Aborted => 2,
        _ => 1,
    }
}

/// Drive one exam from validation to a terminal state
async fn run_exam(
    orchestrator: &Arc<AcquisitionOrchestrator>,
    args: &Args,
    exam_type: ExamType,
    patient_size: PatientSize,
) -> ExamState {
    let validation = orchestrator.validate_prerequisites(patient_size);
    if !validation.valid {
        error!("Prerequisites not met: {}", validation.message);
        return orchestrator.get_exam_state();
    }

    let recommended = orchestrator.get_recommended_factors(patient_size);
    let specification = ExamSpecification::new(exam_type, patient_size, recommended);
    if !orchestrator.prepare_exam(specification) {
        return orchestrator.get_exam_state();
    }

    if args.kv.is_some() || args.ma.is_some() || args.mrt {
        let kv = args.kv.unwrap_or(recommended.kv);
        let ma = args.ma.unwrap_or(recommended.ma);
        if !orchestrator.configure_technical_factors(kv, ma, args.mrt) {
            warn!("Factor override {} kV / {} mA rejected", kv, ma);
            orchestrator.abort_acquisition();
            return orchestrator.get_exam_state();
        }
    }

    if !orchestrator.start_acquisition() {
        error!("Acquisition could not be started");
        orchestrator.abort_acquisition();
        return orchestrator.get_exam_state();
    }

    let wait = wait_for_terminal(orchestrator);
    tokio::select! {
        outcome = tokio::time::timeout(Duration::from_secs(args.timeout_secs), wait) => {
            match outcome {
                Ok(state) => state,
                Err(_) => {
                    error!("No terminal state after {} seconds", args.timeout_secs);
                    orchestrator.handle_error(
                        ErrorType::AcquisitionTimeout,
                        "Exam did not finish in time",
                        0,
                    );
                    orchestrator.get_exam_state()
                }
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, aborting exam");
            if !orchestrator.abort_acquisition() {
                // Reconstruction in flight; let it finish
                return wait_for_terminal(orchestrator).await;
            }
            orchestrator.get_exam_state()
        }
    }
}

async fn wait_for_terminal(orchestrator: &AcquisitionOrchestrator) -> ExamState {
    let mut interval = tokio::time::interval(Duration::from_millis(20));
    loop {
        interval.tick().await;
        let state = orchestrator.get_exam_state();
        if state.is_terminal() {
            return state;
        }
    }
}

/// Log bus events; optionally abort after a number of accepted frames
fn spawn_event_monitor(
    orchestrator: Arc<AcquisitionOrchestrator>,
    abort_after_frames: Option<u32>,
) -> tokio::task::JoinHandle<()> {
    let mut receiver = orchestrator.subscribe();
    tokio::spawn(async move {
        let mut accepted = 0u32;
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    info!("{}", event.description());
                    if let ExamEvent::FrameAccepted { .. } = event {
                        accepted += 1;
                        if abort_after_frames == Some(accepted) {
                            info!("Aborting after {} frames as requested", accepted);
                            orchestrator.abort_acquisition();
                        }
                    }
                }
                Err(RecvError::Lagged(n)) => warn!("Event monitor lagged behind by {} events", n),
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn init_logging(args: &Args) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    // Determine log level based on flags
    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("panexam={}", log_level)));

    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer()
                .with_target(true)
                .with_thread_ids(args.debug)
                .boxed()
        }
    };

    let (file_layer, guard) = match &args.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "panexam.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_thread_names(true)
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
    println!("# Panexam Configuration File");
    println!("# This is the default configuration with all available options");
    println!("# Every key can be overridden from the environment, e.g. PANEXAM_DEVICE__KV_MAX=85");
    println!();
    println!("{}", toml::to_string_pretty(&PanexamConfig::default())?);
    Ok(())
}
