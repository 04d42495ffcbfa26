//! Minerscope CLI - Command-line interface for the Minerscope detection engine
//!
//! Commands:
//! - scan: Replay recorded samples and write a scan report (batch mode)
//! - run: Process streaming samples from stdin, one detection per line (streaming mode)
//! - validate: Validate raw sample schema and physical ranges
//! - doctor: Diagnose configuration, store and track files
//! - schema: Print input/output schema information

use chrono::{DateTime, Duration, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, BufRead, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use minerscope::encoder::ReportEncoder;
use minerscope::ingest::validate_sample_ranges;
use minerscope::schema::{RawSample, RawSampleAdapter, SCHEMA_VERSION};
use minerscope::store::{DetectionStore, MemoryStore, NdjsonLogStore, StoreError};
use minerscope::{
    Detection, DetectError, DetectionEngine, EngineConfig, ManualClock, ReplaySchedule,
    ENGINE_VERSION, PRODUCER_NAME,
};

/// Minerscope - Locate cryptocurrency mining devices from field sensor data
#[derive(Parser)]
#[command(name = "minerscope")]
#[command(version = ENGINE_VERSION)]
#[command(about = "Fuse RF, magnetic, thermal and network samples into mining device detections", long_about = None)]
struct Cli {
    /// Log pipeline decisions to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay recorded samples and write a scan report (batch mode)
    Scan {
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
        #[arg(long, default_value = "json-pretty")]
        output_format: OutputFormat,

        /// Evaluate a window every N seconds of sample time
        #[arg(long, default_value = "30")]
        eval_every_secs: i64,

        /// Engine configuration file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Append detections to an NDJSON log file
        #[arg(long)]
        store: Option<PathBuf>,

        /// Load tracks from file
        #[arg(long)]
        load_tracks: Option<PathBuf>,

        /// Save tracks to file after processing
        #[arg(long)]
        save_tracks: Option<PathBuf>,
    },

    /// Process streaming NDJSON samples from stdin (streaming mode)
    Run {
        /// Evaluate a window every N seconds of sample time
        #[arg(long, default_value = "30")]
        eval_every_secs: i64,

        /// Engine configuration file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Append detections to an NDJSON log file
        #[arg(long)]
        store: Option<PathBuf>,

        /// Load tracks from file
        #[arg(long)]
        load_tracks: Option<PathBuf>,

        /// Save tracks to file on exit
        #[arg(long)]
        save_tracks: Option<PathBuf>,

        /// Flush output after each record
        #[arg(long, default_value = "true")]
        flush: bool,
    },

    /// Validate raw sample schema and physical ranges
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

    /// Diagnose configuration, store and track files
    Doctor {
        /// Check an engine configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Check an NDJSON detection log
        #[arg(long)]
        store: Option<PathBuf>,

        /// Check a saved tracks file
        #[arg(long)]
        tracks: Option<PathBuf>,

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
}

#[derive(Clone, ValueEnum)]
enum InputFormat {
    /// Newline-delimited JSON (one sample per line)
    Ndjson,
    /// JSON array of samples
    Json,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Single-line JSON followed by a newline
    Ndjson,
    /// Compact JSON
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

#[derive(Clone, ValueEnum)]
enum SchemaType {
    /// Input schema (mine.raw_sample.v1)
    Input,
    /// Output schema (scan report)
    Output,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

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

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<(), MinerscopeCliError> {
    match cli.command {
        Commands::Scan {
            input,
            output,
            input_format,
            output_format,
            eval_every_secs,
            config,
            store,
            load_tracks,
            save_tracks,
        } => cmd_scan(
            &input,
            &output,
            input_format,
            output_format,
            eval_every_secs,
            &EngineFiles {
                config: config.as_deref(),
                store: store.as_deref(),
                load_tracks: load_tracks.as_deref(),
                save_tracks: save_tracks.as_deref(),
            },
        ),

        Commands::Run {
            eval_every_secs,
            config,
            store,
            load_tracks,
            save_tracks,
            flush,
        } => cmd_run(
            eval_every_secs,
            &EngineFiles {
                config: config.as_deref(),
                store: store.as_deref(),
                load_tracks: load_tracks.as_deref(),
                save_tracks: save_tracks.as_deref(),
            },
            flush,
        ),

        Commands::Validate {
            input,
            input_format,
            json,
        } => cmd_validate(&input, input_format, json),

        Commands::Doctor {
            config,
            store,
            tracks,
            json,
        } => cmd_doctor(config.as_deref(), store.as_deref(), tracks.as_deref(), json),

        Commands::Schema {
            schema_type,
            json_schema,
        } => cmd_schema(schema_type, json_schema),
    }
}

/// Files shared by the scan and run commands
struct EngineFiles<'a> {
    config: Option<&'a Path>,
    store: Option<&'a Path>,
    load_tracks: Option<&'a Path>,
    save_tracks: Option<&'a Path>,
}

/// Engine driven by sample time rather than wall time
struct ReplayEngine {
    engine: DetectionEngine,
    clock: Arc<ManualClock>,
    schedule: ReplaySchedule,
    last_eval: Option<DateTime<Utc>>,
}

impl ReplayEngine {
    fn open(files: &EngineFiles<'_>, eval_every_secs: i64) -> Result<Self, MinerscopeCliError> {
        if eval_every_secs <= 0 {
            return Err(MinerscopeCliError::Usage(
                "--eval-every-secs must be positive".to_string(),
            ));
        }

        let config = match files.config {
            Some(path) => EngineConfig::from_json(&fs::read_to_string(path)?)?,
            None => EngineConfig::default(),
        };
        let store: Arc<dyn DetectionStore> = match files.store {
            Some(path) => Arc::new(NdjsonLogStore::open(path)?),
            None => Arc::new(MemoryStore::new()),
        };
        let clock = Arc::new(ManualClock::new(DateTime::<Utc>::UNIX_EPOCH));
        let engine = DetectionEngine::new(config, store, clock.clone())?;

        if let Some(path) = files.load_tracks {
            engine.load_tracks(&fs::read_to_string(path)?)?;
        }

        let schedule = ReplaySchedule::new(
            Duration::seconds(eval_every_secs),
            Duration::seconds(engine.config().features.window_secs),
        );
        Ok(Self {
            engine,
            clock,
            schedule,
            last_eval: None,
        })
    }

    /// Evaluate every window boundary the sample moves past, then ingest it
    ///
    /// Invalid samples are rejected before they can move the schedule.
    fn push(&mut self, sample: RawSample) -> Vec<Detection> {
        if let Err(err) = sample.validate().and_then(|_| validate_sample_ranges(&sample)) {
            warn!(sample_id = ?sample.sample_id, error = %err, "sample rejected");
            return Vec::new();
        }

        let ts = sample.timestamp;
        let mut detections = Vec::new();
        for window_end in self.schedule.advance(ts) {
            detections.extend(self.evaluate(window_end));
        }

        match self.engine.ingest(sample) {
            Ok(_) => self.schedule.record(ts),
            Err(err) => warn!(error = %err, "sample rejected"),
        }
        detections
    }

    /// Evaluate the trailing window ending at the last sample
    fn finish(&mut self) -> Vec<Detection> {
        let mut detections = Vec::new();
        if let Some(last) = self.schedule.last_sample() {
            if self.last_eval.map_or(true, |at| at < last) {
                detections.extend(self.evaluate(last));
            }
        }
        if self.engine.pending_commits() > 0 {
            if let Err(err) = self.engine.retry_pending() {
                warn!(error = %err, pending = self.engine.pending_commits(), "detections left uncommitted");
            }
        }
        self.engine.refresh_statuses();
        detections
    }

    fn evaluate(&mut self, window_end: DateTime<Utc>) -> Option<Detection> {
        self.clock.set(window_end);
        self.last_eval = Some(window_end);
        match self.engine.evaluate_window(window_end) {
            Ok(evaluation) => Some(evaluation.detection),
            Err(DetectError::InsufficientWindow { .. }) => {
                debug!(%window_end, "window skipped");
                None
            }
            Err(err) => {
                warn!(%window_end, error = %err, "window evaluation failed");
                None
            }
        }
    }

    fn save_tracks(&self, path: Option<&Path>) -> Result<(), MinerscopeCliError> {
        if let Some(path) = path {
            fs::write(path, self.engine.save_tracks()?)?;
        }
        Ok(())
    }
}

fn read_input(input: &Path) -> Result<String, MinerscopeCliError> {
    if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(input)?)
    }
}

fn parse_samples(data: &str, format: &InputFormat) -> Result<Vec<RawSample>, MinerscopeCliError> {
    let samples = match format {
        InputFormat::Ndjson => RawSampleAdapter::parse_ndjson(data)?,
        InputFormat::Json => RawSampleAdapter::parse_array(data)?,
    };
    Ok(samples)
}

fn cmd_scan(
    input: &Path,
    output: &Path,
    input_format: InputFormat,
    output_format: OutputFormat,
    eval_every_secs: i64,
    files: &EngineFiles<'_>,
) -> Result<(), MinerscopeCliError> {
    let samples = parse_samples(&read_input(input)?, &input_format)?;
    if samples.is_empty() {
        return Err(MinerscopeCliError::NoSamples);
    }

    let mut replay = ReplayEngine::open(files, eval_every_secs)?;
    let mut detections = Vec::new();
    for sample in samples {
        detections.extend(replay.push(sample));
    }
    detections.extend(replay.finish());

    replay.save_tracks(files.save_tracks)?;

    let encoder = ReportEncoder::new();
    let report = encoder.encode_engine(&replay.engine, detections);
    let mut output_data = match output_format {
        OutputFormat::JsonPretty => encoder.to_json(&report, true)?,
        OutputFormat::Ndjson | OutputFormat::Json => encoder.to_json(&report, false)?,
    };
    output_data.push('\n');

    if output.to_string_lossy() == "-" {
        print!("{}", output_data);
    } else {
        fs::write(output, output_data)?;
    }

    Ok(())
}

fn cmd_run(eval_every_secs: i64, files: &EngineFiles<'_>, flush: bool) -> Result<(), MinerscopeCliError> {
    let mut replay = ReplayEngine::open(files, eval_every_secs)?;

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let sample: RawSample = serde_json::from_str(trimmed)
            .map_err(|e| MinerscopeCliError::ParseError(format!("Failed to parse sample: {}", e)))?;

        for detection in replay.push(sample) {
            writeln!(stdout, "{}", serde_json::to_string(&detection)?)?;
            if flush {
                stdout.flush()?;
            }
        }
    }

    for detection in replay.finish() {
        writeln!(stdout, "{}", serde_json::to_string(&detection)?)?;
    }
    stdout.flush()?;

    replay.save_tracks(files.save_tracks)?;

    Ok(())
}

fn cmd_validate(input: &Path, input_format: InputFormat, json: bool) -> Result<(), MinerscopeCliError> {
    let samples = parse_samples(&read_input(input)?, &input_format)?;

    // Structural failures first; range checks only make sense on well-formed samples
    let mut errors: Vec<ValidationErrorDetail> = RawSampleAdapter::validate_samples(&samples)
        .into_iter()
        .map(|r| ValidationErrorDetail {
            index: r.index,
            sample_id: r.sample_id,
            error: r.error.to_string(),
        })
        .collect();
    for (index, sample) in samples.iter().enumerate() {
        if errors.iter().any(|e| e.index == index) {
            continue;
        }
        if let Err(e) = validate_sample_ranges(sample) {
            errors.push(ValidationErrorDetail {
                index,
                sample_id: sample.sample_id.clone(),
                error: e.to_string(),
            });
        }
    }
    errors.sort_by_key(|e| e.index);

    let report = ValidationReport {
        total_samples: samples.len(),
        valid_samples: samples.len() - errors.len(),
        invalid_samples: errors.len(),
        errors,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validation Report");
        println!("=================");
        println!("Total samples:   {}", report.total_samples);
        println!("Valid samples:   {}", report.valid_samples);
        println!("Invalid samples: {}", report.invalid_samples);

        if !report.errors.is_empty() {
            println!("\nErrors:");
            for err in &report.errors {
                println!(
                    "  - Sample {} (index {}): {}",
                    err.sample_id.as_deref().unwrap_or("unknown"),
                    err.index,
                    err.error
                );
            }
        }
    }

    if report.invalid_samples > 0 {
        Err(MinerscopeCliError::ValidationFailed(report.invalid_samples))
    } else {
        Ok(())
    }
}

fn cmd_doctor(
    config: Option<&Path>,
    store: Option<&Path>,
    tracks: Option<&Path>,
    json: bool,
) -> Result<(), MinerscopeCliError> {
    let mut checks: Vec<DoctorCheck> = vec![
        DoctorCheck::ok("engine_version", format!("Minerscope version {}", ENGINE_VERSION)),
        DoctorCheck::ok("schema_version", format!("Input schema: {}", SCHEMA_VERSION)),
    ];

    if let Some(path) = config {
        checks.push(match fs::read_to_string(path) {
            Ok(content) => match EngineConfig::from_json(&content) {
                Ok(cfg) => DoctorCheck::ok(
                    "config",
                    format!(
                        "Config valid (window {}s, merge radius {}m, merge gap {}s)",
                        cfg.features.window_secs, cfg.tracking.radius_m, cfg.tracking.max_gap_secs
                    ),
                ),
                Err(e) => DoctorCheck::error("config", format!("Invalid config: {}", e)),
            },
            Err(e) => DoctorCheck::error("config", format!("Cannot read config file: {}", e)),
        });
    } else {
        checks.push(DoctorCheck::ok("config", "Using built-in defaults".to_string()));
    }

    if let Some(path) = store {
        checks.push(if path.exists() {
            match NdjsonLogStore::open(path).and_then(|s| s.records()) {
                Ok(records) => DoctorCheck::ok(
                    "store",
                    format!("Detection log readable ({} records)", records.len()),
                ),
                Err(e) => DoctorCheck::error("store", format!("Detection log unusable: {}", e)),
            }
        } else {
            DoctorCheck::warning("store", "Detection log does not exist yet".to_string())
        });
    }

    if let Some(path) = tracks {
        checks.push(if path.exists() {
            match fs::read_to_string(path) {
                Ok(content) => match serde_json::from_str::<Vec<minerscope::DeviceTrack>>(&content) {
                    Ok(loaded) => DoctorCheck::ok(
                        "tracks",
                        format!("Tracks file valid ({} tracks)", loaded.len()),
                    ),
                    Err(e) => DoctorCheck::error("tracks", format!("Invalid tracks JSON: {}", e)),
                },
                Err(e) => DoctorCheck::error("tracks", format!("Cannot read tracks file: {}", e)),
            }
        } else {
            DoctorCheck::warning("tracks", "Tracks file does not exist".to_string())
        });
    }

    // Check stdin is available (for streaming mode)
    checks.push(if atty::is(atty::Stream::Stdin) {
        DoctorCheck::ok("stdin", "stdin is a TTY (interactive mode)".to_string())
    } else {
        DoctorCheck::ok("stdin", "stdin is a pipe (streaming mode ready)".to_string())
    });

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: ENGINE_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Minerscope Doctor Report");
        println!("========================");
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

    let has_errors = report.checks.iter().any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(MinerscopeCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

fn cmd_schema(schema_type: SchemaType, json_schema: bool) -> Result<(), MinerscopeCliError> {
    match schema_type {
        SchemaType::Input => {
            if json_schema {
                println!("{}", get_input_json_schema());
            } else {
                println!("Input Schema: {}", SCHEMA_VERSION);
                println!();
                println!("Each sample carries schema_version, timestamp, sensor and a payload");
                println!("keyed by the sensor kind. sample_id, source and location are optional.");
                println!();
                println!("1. rf - Spectrum peak reading");
                println!("   - frequency_hz (1 MHz - 6 GHz), power_dbm (-120 - 0)");
                println!();
                println!("2. magnetic - Three-axis magnetometer reading");
                println!("   - x_ut, y_ut, z_ut (microtesla, +/-5000 per axis)");
                println!();
                println!("3. thermal - Thermal camera summary");
                println!("   - max_temp_c, hotspot_count, optional frame {{ width, height, pixels_c }}");
                println!();
                println!("4. network - Flow metadata");
                println!("   - remote_ip, ports, bytes_per_sec, optional protocol");
            }
        }
        SchemaType::Output => {
            if json_schema {
                println!("{}", get_output_json_schema());
            } else {
                println!("Output Schema: scan report");
                println!();
                println!("- report_version: Schema version");
                println!("- producer: {{ name, version, instance_id }}");
                println!("- generated_at_utc: Report time (sample time for replays)");
                println!("- summary: {{ detections, tracks, active_tracks, stale_tracks, clusters, tracks_by_device_type, max_confidence }}");
                println!("- detections: {{ id, location, confidence, device_type_guess, contributing_sensors, partial_scores, created_at }}");
                println!("- tracks: {{ track_id, representative_location, best_confidence, status, member_detection_ids, decayed_confidence, ... }}");
                println!("- clusters: {{ index, track_ids, centroid, bbox, max_confidence, device_types }}");
            }
        }
    }
    Ok(())
}

fn get_input_json_schema() -> String {
    let geo_point = serde_json::json!({
        "type": "object",
        "required": ["lat", "lng"],
        "properties": {
            "lat": { "type": "number", "minimum": -90, "maximum": 90 },
            "lng": { "type": "number", "minimum": -180, "maximum": 180 },
            "accuracy_m": { "type": "number", "minimum": 0 }
        }
    });

    serde_json::json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "title": SCHEMA_VERSION,
        "description": "Minerscope raw sensor sample",
        "type": "object",
        "required": ["schema_version", "timestamp", "sensor", "payload"],
        "properties": {
            "schema_version": { "type": "string", "const": SCHEMA_VERSION },
            "sample_id": { "type": "string" },
            "timestamp": { "type": "string", "format": "date-time" },
            "sensor": { "type": "string", "enum": ["rf", "magnetic", "thermal", "network"] },
            "source": {
                "type": "object",
                "properties": {
                    "device_model": { "type": "string" },
                    "device_id": { "type": "string" },
                    "firmware_version": { "type": "string" }
                }
            },
            "location": geo_point,
            "payload": {
                "type": "object",
                "minProperties": 1,
                "maxProperties": 1,
                "properties": {
                    "rf": {
                        "type": "object",
                        "required": ["frequency_hz", "power_dbm"],
                        "properties": {
                            "frequency_hz": { "type": "number" },
                            "power_dbm": { "type": "number" }
                        }
                    },
                    "magnetic": {
                        "type": "object",
                        "required": ["x_ut", "y_ut", "z_ut"],
                        "properties": {
                            "x_ut": { "type": "number" },
                            "y_ut": { "type": "number" },
                            "z_ut": { "type": "number" }
                        }
                    },
                    "thermal": {
                        "type": "object",
                        "required": ["max_temp_c", "hotspot_count"],
                        "properties": {
                            "max_temp_c": { "type": "number" },
                            "hotspot_count": { "type": "integer", "minimum": 0 },
                            "frame": {
                                "type": "object",
                                "required": ["width", "height", "pixels_c"],
                                "properties": {
                                    "width": { "type": "integer" },
                                    "height": { "type": "integer" },
                                    "pixels_c": { "type": "array", "items": { "type": "number" } }
                                }
                            }
                        }
                    },
                    "network": {
                        "type": "object",
                        "required": ["remote_ip", "ports", "bytes_per_sec"],
                        "properties": {
                            "remote_ip": { "type": "string" },
                            "ports": { "type": "array", "items": { "type": "integer", "minimum": 1, "maximum": 65535 } },
                            "bytes_per_sec": { "type": "number", "minimum": 0 },
                            "protocol": { "type": "string" }
                        }
                    }
                }
            }
        }
    })
    .to_string()
}

fn get_output_json_schema() -> String {
    serde_json::json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "title": "minerscope scan report",
        "type": "object",
        "required": ["report_version", "producer", "generated_at_utc", "summary", "detections", "tracks", "clusters"],
        "properties": {
            "report_version": { "type": "string" },
            "producer": {
                "type": "object",
                "required": ["name", "version", "instance_id"],
                "properties": {
                    "name": { "type": "string" },
                    "version": { "type": "string" },
                    "instance_id": { "type": "string" }
                }
            },
            "generated_at_utc": { "type": "string", "format": "date-time" },
            "summary": {
                "type": "object",
                "properties": {
                    "detections": { "type": "integer" },
                    "tracks": { "type": "integer" },
                    "active_tracks": { "type": "integer" },
                    "stale_tracks": { "type": "integer" },
                    "clusters": { "type": "integer" },
                    "tracks_by_device_type": { "type": "object", "additionalProperties": { "type": "integer" } },
                    "max_confidence": { "type": ["number", "null"] }
                }
            },
            "detections": { "type": "array", "items": { "type": "object" } },
            "tracks": { "type": "array", "items": { "type": "object" } },
            "clusters": { "type": "array", "items": { "type": "object" } }
        }
    })
    .to_string()
}

// Error types

#[derive(Debug)]
enum MinerscopeCliError {
    Io(io::Error),
    Detect(DetectError),
    Json(serde_json::Error),
    NoSamples,
    ValidationFailed(usize),
    DoctorFailed,
    ParseError(String),
    Usage(String),
}

impl From<io::Error> for MinerscopeCliError {
    fn from(e: io::Error) -> Self {
        MinerscopeCliError::Io(e)
    }
}

impl From<DetectError> for MinerscopeCliError {
    fn from(e: DetectError) -> Self {
        MinerscopeCliError::Detect(e)
    }
}

impl From<StoreError> for MinerscopeCliError {
    fn from(e: StoreError) -> Self {
        MinerscopeCliError::Detect(DetectError::StoreUnavailable(e))
    }
}

impl From<serde_json::Error> for MinerscopeCliError {
    fn from(e: serde_json::Error) -> Self {
        MinerscopeCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<MinerscopeCliError> for CliError {
    fn from(e: MinerscopeCliError) -> Self {
        match e {
            MinerscopeCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            MinerscopeCliError::Detect(e) => {
                let (code, hint) = match &e {
                    DetectError::InvalidConfig(_) => ("CONFIG_ERROR", "Run 'minerscope doctor --config <file>'"),
                    DetectError::StoreUnavailable(_) => ("STORE_UNAVAILABLE", "Check the detection log path"),
                    DetectError::Validation(_) => ("VALIDATION_ERROR", "Run 'minerscope validate' for details"),
                    _ => ("PARSE_ERROR", "Ensure input matches mine.raw_sample.v1 schema"),
                };
                CliError {
                    code: code.to_string(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
            MinerscopeCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            MinerscopeCliError::NoSamples => CliError {
                code: "NO_SAMPLES".to_string(),
                message: "No samples found in input".to_string(),
                hint: Some("Ensure input file is not empty".to_string()),
            },
            MinerscopeCliError::ValidationFailed(count) => CliError {
                code: "VALIDATION_FAILED".to_string(),
                message: format!("{} samples failed validation", count),
                hint: Some("Fix validation errors and retry".to_string()),
            },
            MinerscopeCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
            MinerscopeCliError::ParseError(msg) => CliError {
                code: "PARSE_ERROR".to_string(),
                message: msg,
                hint: Some("Check input format".to_string()),
            },
            MinerscopeCliError::Usage(msg) => CliError {
                code: "USAGE_ERROR".to_string(),
                message: msg,
                hint: Some("Run 'minerscope --help'".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct ValidationReport {
    total_samples: usize,
    valid_samples: usize,
    invalid_samples: usize,
    errors: Vec<ValidationErrorDetail>,
}

#[derive(serde::Serialize)]
struct ValidationErrorDetail {
    index: usize,
    sample_id: Option<String>,
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

impl DoctorCheck {
    fn ok(name: &str, message: String) -> Self {
        Self::with_status(name, CheckStatus::Ok, message)
    }

    fn warning(name: &str, message: String) -> Self {
        Self::with_status(name, CheckStatus::Warning, message)
    }

    fn error(name: &str, message: String) -> Self {
        Self::with_status(name, CheckStatus::Error, message)
    }

    fn with_status(name: &str, status: CheckStatus, message: String) -> Self {
        Self {
            name: name.to_string(),
            status,
            message,
        }
    }
}

#[derive(serde::Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
