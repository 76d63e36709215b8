//! Ergo CLI - Command-line interface for Synheart Ergo
//!
//! Commands:
//! - replay: Analyse recorded landmark frames (batch mode)
//! - run: Analyse landmark frames streamed on stdin through the monitor loop
//! - validate: Validate landmark frame schema
//! - doctor: Diagnose configuration and environment
//! - schema: Print input/output schema information
//! - config: Print the effective configuration

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use synheart_ergo::config::ErgoConfig;
use synheart_ergo::context::MonitorContext;
use synheart_ergo::error::DeliveryError;
use synheart_ergo::events::{StreamMessage, Topic};
use synheart_ergo::monitor::spawn_monitor_thread;
use synheart_ergo::pipeline::FrameAnalyzer;
use synheart_ergo::schema::{FrameRecordAdapter, NdjsonFrameSource, SCHEMA_VERSION};
use synheart_ergo::sink::Subscriber;
use synheart_ergo::types::MonitorSelection;
use synheart_ergo::{ErgoError, ERGO_VERSION, PRODUCER_NAME};

/// Ergo - On-device posture and blink-rate monitoring
#[derive(Parser)]
#[command(name = "ergo")]
#[command(author = "Synheart AI Inc")]
#[command(version = ERGO_VERSION)]
#[command(about = "Turn landmark streams into ergonomic warnings", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyse recorded landmark frames (batch mode)
    Replay {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long)]
        output: PathBuf,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Output format
        #[arg(long, default_value = "ndjson")]
        output_format: OutputFormat,

        #[command(flatten)]
        engine: EngineArgs,

        /// Print a session summary to stderr when done
        #[arg(long)]
        summary: bool,
    },

    /// Analyse landmark frames streamed on stdin (streaming mode)
    Run {
        #[command(flatten)]
        engine: EngineArgs,

        /// Flush output after each message
        #[arg(long, default_value = "true")]
        flush: bool,

        /// Print a session summary to stderr on exit
        #[arg(long)]
        summary: bool,
    },

    /// Validate landmark frame schema
    Validate {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Output validation report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Diagnose configuration and environment
    Doctor {
        /// Configuration file to check
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print schema information
    Schema {
        /// Schema to print (input or output)
        #[arg(value_enum)]
        schema_type: SchemaType,

        /// Output as JSON schema
        #[arg(long)]
        json_schema: bool,
    },

    /// Print the effective configuration as TOML
    Config {
        /// Configuration file to load (defaults apply when omitted)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

/// Options shared by the analysing commands
#[derive(clap::Args)]
struct EngineArgs {
    /// Configuration file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Camera frame rate used to size the posture window
    #[arg(long)]
    fps: Option<f64>,

    /// Topics to emit (posture, blink, events)
    #[arg(long, value_delimiter = ',', default_value = "posture,blink,events")]
    topics: Vec<String>,

    /// Disable the posture monitor
    #[arg(long)]
    no_posture: bool,

    /// Disable the eye-strain (blink rate) monitor
    #[arg(long)]
    no_eye_strain: bool,
}

impl EngineArgs {
    fn load_config(&self) -> Result<ErgoConfig, ErgoCliError> {
        load_config(self.config.as_deref())
    }

    fn topics(&self) -> Result<Vec<Topic>, ErgoCliError> {
        self.topics
            .iter()
            .map(|t| t.parse::<Topic>().map_err(ErgoCliError::from))
            .collect()
    }

    fn selection(&self) -> MonitorSelection {
        MonitorSelection {
            posture: !self.no_posture,
            eye_strain: !self.no_eye_strain,
        }
    }
}

#[derive(Clone, ValueEnum)]
enum InputFormat {
    /// Newline-delimited JSON (one frame per line)
    Ndjson,
    /// JSON array of frames
    Json,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Newline-delimited JSON (one message per line)
    Ndjson,
    /// JSON array of messages
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

#[derive(Clone, ValueEnum)]
enum SchemaType {
    /// Input schema (ergo.landmark_frame.v1)
    Input,
    /// Output stream messages
    Output,
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

/// Logs go to stderr so stdout stays valid NDJSON
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("synheart_ergo=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<(), ErgoCliError> {
    match cli.command {
        Commands::Replay {
            input,
            output,
            input_format,
            output_format,
            engine,
            summary,
        } => cmd_replay(&input, &output, input_format, output_format, &engine, summary),

        Commands::Run {
            engine,
            flush,
            summary,
        } => cmd_run(&engine, flush, summary),

        Commands::Validate {
            input,
            input_format,
            json,
        } => cmd_validate(&input, input_format, json),

        Commands::Doctor { config, json } => cmd_doctor(config.as_deref(), json),

        Commands::Schema {
            schema_type,
            json_schema,
        } => cmd_schema(schema_type, json_schema),

        Commands::Config { config } => cmd_config(config.as_deref()),
    }
}

fn cmd_replay(
    input: &Path,
    output: &Path,
    input_format: InputFormat,
    output_format: OutputFormat,
    engine: &EngineArgs,
    summary: bool,
) -> Result<(), ErgoCliError> {
    let config = engine.load_config()?;
    let topics = engine.topics()?;

    let input_data = read_input(input)?;
    let records = match input_format {
        InputFormat::Ndjson => FrameRecordAdapter::parse_ndjson(&input_data)?,
        InputFormat::Json => FrameRecordAdapter::parse_array(&input_data)?,
    };
    if records.is_empty() {
        return Err(ErgoCliError::NoFrames);
    }
    let frames = FrameRecordAdapter::to_landmark_frames(&records)?;

    let fps = engine
        .fps
        .or_else(|| records[0].source.as_ref().and_then(|s| s.fps));
    let mut analyzer = FrameAnalyzer::new(&config, fps)?;

    let ctx = MonitorContext::new();
    ctx.start(engine.selection());

    let mut messages: Vec<StreamMessage> = Vec::new();
    for frame in &frames {
        let analysis = analyzer.analyze(frame, ctx.selection());
        ctx.record(&analysis);
        messages.extend(
            analysis
                .messages()
                .into_iter()
                .filter(|m| topics.contains(&m.topic())),
        );
    }

    let output_data = format_output(&messages, &output_format)?;
    if output.to_string_lossy() == "-" {
        print!("{}", output_data);
    } else {
        fs::write(output, output_data)?;
    }

    if let Some(stopped) = ctx.stop() {
        if summary {
            eprintln!("{}", serde_json::to_string(&stopped)?);
        }
    }
    Ok(())
}

/// Writes each message as one NDJSON line on stdout
struct StdoutSubscriber {
    flush: bool,
}

impl Subscriber for StdoutSubscriber {
    fn deliver(&self, message: &StreamMessage) -> Result<(), DeliveryError> {
        let line = message
            .to_json()
            .map_err(|e| DeliveryError::Other(e.to_string()))?;
        let mut stdout = io::stdout().lock();
        writeln!(stdout, "{line}").map_err(|e| DeliveryError::Other(e.to_string()))?;
        if self.flush {
            stdout
                .flush()
                .map_err(|e| DeliveryError::Other(e.to_string()))?;
        }
        Ok(())
    }
}

fn cmd_run(engine: &EngineArgs, flush: bool, summary: bool) -> Result<(), ErgoCliError> {
    let config = engine.load_config()?;
    let topics = engine.topics()?;

    let ctx = Arc::new(MonitorContext::new());
    ctx.sink()
        .subscribe(&topics, Arc::new(StdoutSubscriber { flush }));

    let mut source = NdjsonFrameSource::new(BufReader::new(io::stdin()));
    if let Some(fps) = engine.fps {
        source = source.with_frame_rate(fps);
    }

    let handle = spawn_monitor_thread(ctx.clone(), source, &config)?;
    ctx.start(engine.selection());

    let result = handle.join().map_err(|_| ErgoCliError::MonitorPanicked)?;
    let stopped = ctx.stop();
    result?;

    if let (true, Some(stopped)) = (summary, stopped) {
        eprintln!("{}", serde_json::to_string(&stopped)?);
    }
    Ok(())
}

fn cmd_validate(input: &Path, input_format: InputFormat, json: bool) -> Result<(), ErgoCliError> {
    let input_data = read_input(input)?;

    let records = match input_format {
        InputFormat::Ndjson => FrameRecordAdapter::parse_ndjson(&input_data)?,
        InputFormat::Json => FrameRecordAdapter::parse_array(&input_data)?,
    };

    let results = FrameRecordAdapter::validate_records(&records);

    let report = ValidationReport {
        total_frames: records.len(),
        valid_frames: records.len() - results.len(),
        invalid_frames: results.len(),
        errors: results
            .iter()
            .map(|r| ValidationErrorDetail {
                index: r.index,
                frame_id: r.frame_id.clone(),
                error: r.result.as_ref().map(|e| e.to_string()).unwrap_or_default(),
            })
            .collect(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validation Report");
        println!("=================");
        println!("Total frames:   {}", report.total_frames);
        println!("Valid frames:   {}", report.valid_frames);
        println!("Invalid frames: {}", report.invalid_frames);

        if !report.errors.is_empty() {
            println!("\nErrors:");
            for err in &report.errors {
                println!(
                    "  - Frame {} (index {}): {}",
                    err.frame_id.as_deref().unwrap_or("unknown"),
                    err.index,
                    err.error
                );
            }
        }
    }

    if report.invalid_frames > 0 {
        Err(ErgoCliError::ValidationFailed(report.invalid_frames))
    } else {
        Ok(())
    }
}

fn cmd_doctor(config: Option<&Path>, json: bool) -> Result<(), ErgoCliError> {
    let mut checks: Vec<DoctorCheck> = vec![
        DoctorCheck {
            name: "ergo_version".to_string(),
            status: CheckStatus::Ok,
            message: format!("Ergo version {}", ERGO_VERSION),
        },
        DoctorCheck {
            name: "schema_version".to_string(),
            status: CheckStatus::Ok,
            message: format!("Input schema: {}", SCHEMA_VERSION),
        },
    ];

    let config_check = match config {
        Some(path) if !path.exists() => DoctorCheck {
            name: "config".to_string(),
            status: CheckStatus::Error,
            message: format!("Config file {} does not exist", path.display()),
        },
        Some(path) => match ErgoConfig::load(path) {
            Ok(config) => DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Ok,
                message: describe_config(&config, &format!("Config file {} valid", path.display())),
            },
            Err(e) => DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Error,
                message: e.to_string(),
            },
        },
        None => DoctorCheck {
            name: "config".to_string(),
            status: CheckStatus::Warning,
            message: describe_config(&ErgoConfig::default(), "No config file, using defaults"),
        },
    };
    checks.push(config_check);

    // Check stdin is available (for streaming mode)
    let stdin_check = if atty::is(atty::Stream::Stdin) {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a TTY (interactive mode)".to_string(),
        }
    } else {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a pipe (streaming mode ready)".to_string(),
        }
    };
    checks.push(stdin_check);

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: ERGO_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Ergo Doctor Report");
        println!("==================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report
        .checks
        .iter()
        .any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(ErgoCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

fn describe_config(config: &ErgoConfig, prefix: &str) -> String {
    format!(
        "{} (posture warning after {}s, blink warning after {}s below {}/min)",
        prefix,
        config.posture.prolonged_seconds,
        config.blink.prolonged_seconds,
        config.blink.low_rate_per_min
    )
}

fn cmd_schema(schema_type: SchemaType, json_schema: bool) -> Result<(), ErgoCliError> {
    match schema_type {
        SchemaType::Input => {
            if json_schema {
                println!("{}", get_input_json_schema());
            } else {
                println!("Input Schema: {}", SCHEMA_VERSION);
                println!();
                println!("One record per camera frame:");
                println!();
                println!("- timestamp: capture time (RFC 3339, UTC)");
                println!("- width, height: frame size in pixels");
                println!("- pose: null, or normalized [x, y, z] for");
                println!("  nose, left_shoulder, right_shoulder, left_hip, right_hip");
                println!("  (x by width, y by height, z by width)");
                println!("- face: null, or six normalized [x, y] contour points per eye");
                println!("  (left_eye, right_eye; outer corner, two upper, inner corner, two lower)");
                println!("- source: optional {{ device_id, model, fps }}");
            }
        }
        SchemaType::Output => {
            if json_schema {
                println!("{}", get_output_json_schema());
            } else {
                println!("Output: stream messages, one per line");
                println!();
                println!("Topic posture (every frame):");
                println!("  {{\"posture\": \"good\" | \"bad\" | \"unknown\"}}");
                println!("Topic blink (every frame):");
                println!("  {{\"blink\": <blinks in last 60s> | \"unknown\"}}");
                println!("Topic events (on state changes):");
                println!("  {{\"type\": \"posture_warning\", \"status\": \"prolonged_bad\", \"bad_duration_sec\": n}}");
                println!("  {{\"type\": \"posture_resolved\", \"status\": \"back_to_good_or_unknown\"}}");
                println!("  {{\"type\": \"blink_warning\", \"status\": \"prolonged_low_rate\", \"blink_rate_per_min\": n, \"low_duration_sec\": n}}");
                println!("  {{\"type\": \"blink_resolved\", \"status\": \"back_to_normal\" | \"face_not_visible\", \"blink_rate_per_min\": n?}}");
            }
        }
    }

    Ok(())
}

fn cmd_config(config: Option<&Path>) -> Result<(), ErgoCliError> {
    let config = load_config(config)?;
    print!("{}", config.to_toml_string()?);
    Ok(())
}

// Helper functions

fn load_config(path: Option<&Path>) -> Result<ErgoConfig, ErgoCliError> {
    match path {
        Some(path) => Ok(ErgoConfig::load(path)?),
        None => Ok(ErgoConfig::default()),
    }
}

fn read_input(input: &Path) -> Result<String, ErgoCliError> {
    if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(input)?)
    }
}

fn format_output(messages: &[StreamMessage], format: &OutputFormat) -> Result<String, ErgoCliError> {
    match format {
        OutputFormat::Ndjson => {
            let mut lines: Vec<String> = Vec::new();
            for message in messages {
                lines.push(serde_json::to_string(message)?);
            }
            Ok(lines.join("\n") + "\n")
        }
        OutputFormat::Json => Ok(serde_json::to_string(messages)?),
        OutputFormat::JsonPretty => Ok(serde_json::to_string_pretty(messages)?),
    }
}

fn get_input_json_schema() -> String {
    let point3 = serde_json::json!({
        "type": "array",
        "items": { "type": "number" },
        "minItems": 3,
        "maxItems": 3
    });
    let eye = serde_json::json!({
        "type": "array",
        "items": {
            "type": "array",
            "items": { "type": "number" },
            "minItems": 2,
            "maxItems": 2
        },
        "minItems": 6,
        "maxItems": 6
    });

    serde_json::json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "$id": "https://synheart.ai/schemas/ergo.landmark_frame.v1.json",
        "title": "ergo.landmark_frame.v1",
        "description": "Synheart landmark frame schema",
        "type": "object",
        "required": ["schema_version", "timestamp", "width", "height"],
        "properties": {
            "schema_version": {
                "type": "string",
                "const": "ergo.landmark_frame.v1"
            },
            "frame_id": { "type": "string" },
            "timestamp": { "type": "string", "format": "date-time" },
            "width": { "type": "integer", "minimum": 1 },
            "height": { "type": "integer", "minimum": 1 },
            "source": {
                "type": "object",
                "properties": {
                    "device_id": { "type": "string" },
                    "model": { "type": "string" },
                    "fps": { "type": "number" }
                }
            },
            "pose": {
                "type": ["object", "null"],
                "required": ["nose", "left_shoulder", "right_shoulder", "left_hip", "right_hip"],
                "properties": {
                    "nose": point3,
                    "left_shoulder": point3,
                    "right_shoulder": point3,
                    "left_hip": point3,
                    "right_hip": point3
                }
            },
            "face": {
                "type": ["object", "null"],
                "required": ["left_eye", "right_eye"],
                "properties": {
                    "left_eye": eye,
                    "right_eye": eye
                }
            }
        }
    })
    .to_string()
}

fn get_output_json_schema() -> String {
    serde_json::json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "$id": "https://synheart.ai/schemas/ergo.stream_message.v1.json",
        "title": "ergo.stream_message.v1",
        "description": "Synheart Ergo stream message",
        "oneOf": [
            {
                "type": "object",
                "required": ["posture"],
                "properties": {
                    "posture": { "enum": ["good", "bad", "unknown"] }
                }
            },
            {
                "type": "object",
                "required": ["blink"],
                "properties": {
                    "blink": {
                        "oneOf": [
                            { "type": "integer", "minimum": 0 },
                            { "const": "unknown" }
                        ]
                    }
                }
            },
            {
                "type": "object",
                "required": ["type", "status"],
                "properties": {
                    "type": {
                        "enum": ["posture_warning", "posture_resolved", "blink_warning", "blink_resolved"]
                    },
                    "status": {
                        "enum": [
                            "prolonged_bad",
                            "back_to_good_or_unknown",
                            "prolonged_low_rate",
                            "back_to_normal",
                            "face_not_visible"
                        ]
                    },
                    "bad_duration_sec": { "type": "integer" },
                    "blink_rate_per_min": { "type": "integer" },
                    "low_duration_sec": { "type": "integer" }
                }
            }
        ]
    })
    .to_string()
}

// Error types

#[derive(Debug)]
enum ErgoCliError {
    Io(io::Error),
    Engine(ErgoError),
    Json(serde_json::Error),
    NoFrames,
    ValidationFailed(usize),
    DoctorFailed,
    MonitorPanicked,
}

impl From<io::Error> for ErgoCliError {
    fn from(e: io::Error) -> Self {
        ErgoCliError::Io(e)
    }
}

impl From<ErgoError> for ErgoCliError {
    fn from(e: ErgoError) -> Self {
        ErgoCliError::Engine(e)
    }
}

impl From<serde_json::Error> for ErgoCliError {
    fn from(e: serde_json::Error) -> Self {
        ErgoCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<ErgoCliError> for CliError {
    fn from(e: ErgoCliError) -> Self {
        match e {
            ErgoCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            ErgoCliError::Engine(e) => engine_error(e),
            ErgoCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            ErgoCliError::NoFrames => CliError {
                code: "NO_FRAMES".to_string(),
                message: "No frames found in input".to_string(),
                hint: Some("Ensure input file is not empty".to_string()),
            },
            ErgoCliError::ValidationFailed(count) => CliError {
                code: "VALIDATION_FAILED".to_string(),
                message: format!("{} frames failed validation", count),
                hint: Some("Fix validation errors and retry".to_string()),
            },
            ErgoCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
            ErgoCliError::MonitorPanicked => CliError {
                code: "MONITOR_PANICKED".to_string(),
                message: "The analysis thread panicked".to_string(),
                hint: None,
            },
        }
    }
}

fn engine_error(e: ErgoError) -> CliError {
    let (code, hint) = match &e {
        ErgoError::InvalidConfig(_) | ErgoError::ConfigParse(_) | ErgoError::ConfigSerialize(_) => {
            ("CONFIG_ERROR", Some("Run 'ergo doctor --config <file>' for details"))
        }
        ErgoError::JsonError(_) | ErgoError::ParseError(_) => {
            ("PARSE_ERROR", Some("Ensure input matches ergo.landmark_frame.v1 schema"))
        }
        ErgoError::CameraUnavailable(_) => ("CAMERA_UNAVAILABLE", Some("Check the frame source is connected")),
        ErgoError::Runtime(_) => ("RUNTIME_ERROR", None),
    };
    CliError {
        code: code.to_string(),
        message: e.to_string(),
        hint: hint.map(str::to_string),
    }
}

// Report types

#[derive(serde::Serialize)]
struct ValidationReport {
    total_frames: usize,
    valid_frames: usize,
    invalid_frames: usize,
    errors: Vec<ValidationErrorDetail>,
}

#[derive(serde::Serialize)]
struct ValidationErrorDetail {
    index: usize,
    frame_id: Option<String>,
    error: String,
}

#[derive(serde::Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(serde::Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
