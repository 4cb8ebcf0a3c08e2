use clap::{Parser, Subcommand};
use ring_generator::composition;
use ring_generator::config::AppConfig;
use ring_generator::decode::RodioDecoder;
use ring_generator::encode::{Encoder, FfmpegEncoder, WavEncoder};
use ring_generator::error::ExportError;
use ring_generator::export::{
    progress_channel, CancellationToken, ExportOptions, ExportPipeline, ExportReport,
    ExportRequest, ExportTarget,
};
use ring_generator::logging;
use ring_generator::model::{AudioFormat, ExportSettings};
use ring_generator::preflight::{check_export, estimate_export_size};
use ring_generator::project::{self, ProjectFile};
use ring_generator::time::{format_clock, seconds_of_day};
use ring_generator::timing;
use ring_generator::validation;
use std::collections::HashMap;
use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "ring-generator", about = "Announcement schedule renderer")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a project and report every problem found
    Check {
        /// Project file (.rgen)
        project: PathBuf,
    },
    /// Show the composed segment list of one record
    Compose {
        /// Project file (.rgen)
        project: PathBuf,
        /// Record name
        #[arg(short, long)]
        record: String,
    },
    /// Render records and write one audio file per record
    Export {
        /// Project file (.rgen)
        project: PathBuf,
        /// Export only this record
        #[arg(short, long)]
        record: Option<String>,
        /// Output directory (overrides config)
        #[arg(short, long)]
        out: Option<PathBuf>,
        /// Output format: mp3, ogg, flac, wav (overrides project)
        #[arg(short, long)]
        format: Option<String>,
        /// Bitrate in kbps (overrides project)
        #[arg(short, long)]
        bitrate: Option<u32>,
        /// Mix sample rate in Hz (overrides config)
        #[arg(long)]
        sample_rate: Option<u32>,
        /// ffmpeg binary (overrides config)
        #[arg(long)]
        ffmpeg: Option<PathBuf>,
        /// Render records in parallel
        #[arg(long)]
        parallel: bool,
        /// Encode WAV in-process instead of calling ffmpeg
        #[arg(long)]
        in_process: bool,
    },
    /// Snap anchored announcements to their source length
    Reconcile {
        /// Project file (.rgen)
        project: PathBuf,
        /// Save the adjusted times back into the project
        #[arg(long)]
        apply: bool,
    },
    /// Estimate output size and duration
    Estimate {
        /// Project file (.rgen)
        project: PathBuf,
        /// Output format (overrides project)
        #[arg(short, long)]
        format: Option<String>,
        /// Bitrate in kbps (overrides project)
        #[arg(short, long)]
        bitrate: Option<u32>,
    },
    /// List sources with their cut and file duration
    Sources {
        /// Project file (.rgen)
        project: PathBuf,
    },
    /// Renderer configuration
    Config {
        #[command(subcommand)]
        action: ConfigCmd,
    },
}

#[derive(Subcommand)]
enum ConfigCmd {
    /// Show current configuration
    Show,
    /// Set one value (sample_rate, ffmpeg_path, output_dir, parallel_records)
    Set { key: String, value: String },
}

fn exit_with(message: impl Display) -> ! {
    eprintln!("Error: {}", message);
    std::process::exit(1);
}

fn open_project(path: &Path) -> ProjectFile {
    project::load_project(path).unwrap_or_else(|e| exit_with(e))
}

/// Directory relative source paths are resolved against.
fn project_dir(path: &Path) -> PathBuf {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn settings_with(project: &ProjectFile, format: Option<String>, bitrate: Option<u32>) -> ExportSettings {
    let mut settings = project.export_settings.clone();
    if let Some(f) = format {
        settings.extension = f;
    }
    if let Some(b) = bitrate {
        settings.bitrate = b;
    }
    match settings.format() {
        Ok(parsed) => settings.extension = parsed.extension().to_string(),
        Err(e) => exit_with(e),
    }
    settings
}

fn main() {
    logging::init(true);
    let cli = Cli::parse();

    match cli.command {
        Commands::Check { project: path } => {
            let project = open_project(&path);
            let files = project::load_source_files(&project, &project_dir(&path));

            let mut report = project::check_project(&project);
            let export_report = check_export(&project.sources, &project.schedule(), &files);
            for line in export_report.errors {
                if !report.errors.contains(&line) {
                    report.errors.push(line);
                }
            }
            for line in export_report.warnings {
                if !report.warnings.contains(&line) {
                    report.warnings.push(line);
                }
            }

            let results = validation::validate_all(&project.schedule());
            let summary = validation::summarize(&results);
            report.errors.extend(validation::detailed_errors(&results));
            report.warnings.extend(validation::detailed_warnings(&results));

            println!(
                "Project '{}': {} sources, {} records, {} issues ({} critical)",
                project.metadata.project_name,
                project.sources.len(),
                project.time_of_records.len(),
                summary.total_issues,
                summary.critical_issues
            );
            for e in &report.errors {
                println!("  error:   {}", e);
            }
            for w in &report.warnings {
                println!("  warning: {}", w);
            }
            if !report.is_valid() {
                std::process::exit(1);
            }
            println!("OK");
        }
        Commands::Compose {
            project: path,
            record,
        } => {
            let project = open_project(&path);
            let schedule = project.schedule();
            let Some(view) = schedule.record(&record) else {
                exit_with(format!("record '{}' not found", record));
            };
            let segments = composition::build(view.arrangements, &project.sources, view.window);
            println!(
                "Record '{}' ({} - {}): {} of {} announcements playable",
                record,
                format_clock(seconds_of_day(&view.window.start) as f64, true),
                format_clock(seconds_of_day(&view.window.end) as f64, true),
                segments.len(),
                view.arrangements.len()
            );
            println!(
                "{:<10} {:<10} {:<24} {:<12} {:<6} {}",
                "Start", "End", "Source", "Arrangement", "Gain", "Fades"
            );
            println!("{}", "-".repeat(72));
            for s in &segments {
                let fades = match (s.arrangement.fade_in, s.arrangement.fade_out) {
                    (true, true) => "in/out",
                    (true, false) => "in",
                    (false, true) => "out",
                    (false, false) => "-",
                };
                println!(
                    "{:<10} {:<10} {:<24} {:<12} {:<6} {}",
                    format_clock(s.start_time as f64, true),
                    format_clock(s.end_time as f64, true),
                    truncate(&s.source.title, 23),
                    truncate(&s.arrangement.id, 11),
                    format!("{}%", s.arrangement.loudness),
                    fades
                );
            }
        }
        Commands::Export {
            project: path,
            record,
            out,
            format,
            bitrate,
            sample_rate,
            ffmpeg,
            parallel,
            in_process,
        } => {
            let config = AppConfig::load_default();
            let project = open_project(&path);
            let base_dir = project_dir(&path);
            let settings = settings_with(&project, format, bitrate);
            let files = project::load_source_files(&project, &base_dir);

            let options = ExportOptions {
                sample_rate: sample_rate.unwrap_or(config.sample_rate),
                parallel_records: parallel || config.parallel_records,
            };
            if options.sample_rate == 0 {
                exit_with("sample rate must be positive");
            }
            let target = match record {
                Some(name) => ExportTarget::Record(name),
                None => ExportTarget::All,
            };
            let request = ExportRequest {
                sources: &project.sources,
                source_files: &files,
                arrangements: &project.arrangements,
                records: &project.time_of_records,
                settings: &settings,
                target: &target,
            };

            let result = if in_process {
                run_export(WavEncoder, options, &request)
            } else {
                let program = ffmpeg.unwrap_or_else(|| config.ffmpeg_path.clone());
                run_export(FfmpegEncoder::new(program), options, &request)
            };
            let report = result.unwrap_or_else(|e| exit_with(e));

            let out_dir = out.or(config.output_dir).unwrap_or(base_dir);
            if let Err(e) = fs::create_dir_all(&out_dir) {
                exit_with(format!("cannot create '{}': {}", out_dir.display(), e));
            }
            let written = write_outputs(&report, &out_dir);

            for w in &report.warnings {
                println!("  warning: {}", w);
            }
            for (name, err) in &report.failures {
                println!("  failed:  {}: {}", name, err);
            }
            println!(
                "Wrote {} file(s) to {}",
                written,
                out_dir.display()
            );
            if !report.is_complete() || written < report.outputs.len() {
                std::process::exit(1);
            }
        }
        Commands::Reconcile { project: path, apply } => {
            let mut project = open_project(&path);
            let adjustments = timing::reconcile_all(&mut project.arrangements, &project.sources);
            if adjustments.is_empty() {
                println!("All anchored announcements already match their sources.");
                return;
            }
            for a in &adjustments {
                println!(
                    "  [{}] {}: {} - {}  ->  {} - {}",
                    a.record_name,
                    a.arrangement_id,
                    format_clock(seconds_of_day(&a.before.start) as f64, true),
                    format_clock(seconds_of_day(&a.before.end) as f64, true),
                    format_clock(seconds_of_day(&a.after.start) as f64, true),
                    format_clock(seconds_of_day(&a.after.end) as f64, true)
                );
            }
            if apply {
                let name = project.metadata.project_name.clone();
                if let Err(e) = project::save_project(&mut project, &path, &name) {
                    exit_with(e);
                }
                println!("Saved {} adjustment(s) to {}", adjustments.len(), path.display());
            } else {
                println!("{} adjustment(s); rerun with --apply to save", adjustments.len());
            }
        }
        Commands::Estimate {
            project: path,
            format,
            bitrate,
        } => {
            let project = open_project(&path);
            let settings = settings_with(&project, format, bitrate);
            let format = AudioFormat::from_str_loose(&settings.extension).unwrap_or_else(|e| exit_with(e));
            let estimate = estimate_export_size(&project.time_of_records, format, settings.bitrate);
            let bitrate_label = if format.is_lossless() {
                "lossless".to_string()
            } else {
                format!("{} kbps", settings.bitrate)
            };
            println!(
                "{} records, {:.2} min total, ~{:.2} MB as {} ({})",
                project.time_of_records.len(),
                estimate.duration_minutes,
                estimate.size_mb,
                format,
                bitrate_label
            );
        }
        Commands::Sources { project: path } => {
            let project = open_project(&path);
            let base_dir = project_dir(&path);
            if project.sources.is_empty() {
                println!("No sources.");
                return;
            }
            println!(
                "{:<10} {:<24} {:<10} {:<16} {:<10} {}",
                "ID", "Title", "Type", "Cut", "Length", "File"
            );
            println!("{}", "-".repeat(90));
            for source in &project.sources {
                let file = source.file_path.as_ref().map(|p| {
                    if p.is_absolute() {
                        p.clone()
                    } else {
                        base_dir.join(p)
                    }
                });
                let length = file
                    .as_deref()
                    .map(project::probe_duration)
                    .and_then(Result::ok);
                println!(
                    "{:<10} {:<24} {:<10} {:<16} {:<10} {}",
                    truncate(&source.id, 9),
                    truncate(&source.title, 23),
                    source.type_id.as_deref().unwrap_or("-"),
                    format!(
                        "{:.1}-{:.1}s",
                        source.cut.start, source.cut.end
                    ),
                    length
                        .map(|d| format_clock(d, false))
                        .unwrap_or_else(|| "?".to_string()),
                    file.as_ref()
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|| "(none)".to_string())
                );
                if let Some(d) = length {
                    if source.cut.end > d + 0.05 {
                        println!("  warning: cut ends after the file ({:.1}s)", d);
                    }
                }
            }
        }
        Commands::Config { action } => match action {
            ConfigCmd::Show => {
                let config = AppConfig::load_default();
                match AppConfig::default_path() {
                    Some(p) => println!("Config file: {}", p.display()),
                    None => println!("Config file: (no config directory)"),
                }
                println!("Sample rate: {} Hz", config.sample_rate);
                println!("ffmpeg: {}", config.ffmpeg_path.display());
                println!(
                    "Output dir: {}",
                    config
                        .output_dir
                        .as_ref()
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|| "(project directory)".to_string())
                );
                println!("Parallel records: {}", config.parallel_records);
            }
            ConfigCmd::Set { key, value } => {
                let mut config = AppConfig::load_default();
                if let Err(e) = config.set(&key, &value) {
                    exit_with(e);
                }
                match config.save_default() {
                    Ok(p) => println!("Set {} = {} ({})", key, value, p.display()),
                    Err(e) => exit_with(e),
                }
            }
        },
    }
}

fn run_export<E: Encoder>(
    encoder: E,
    options: ExportOptions,
    request: &ExportRequest<'_>,
) -> Result<ExportReport, ExportError> {
    let pipeline = ExportPipeline::new(RodioDecoder::new(options.sample_rate), encoder, options);
    let (progress, rx) = progress_channel();
    let printer = std::thread::spawn(move || {
        for event in rx {
            let record = event
                .record_name
                .map(|r| format!(" [{}]", r))
                .unwrap_or_default();
            println!("[{:>5.1}%]{} {}", event.progress, record, event.message);
        }
    });

    let result = pipeline.export_all(request, &progress, &CancellationToken::new());
    drop(progress);
    let _ = printer.join();
    result
}

/// Write each encoded record next to the others. Returns how many were written.
fn write_outputs(report: &ExportReport, out_dir: &Path) -> usize {
    let mut written = 0;
    let mut names: HashMap<String, usize> = HashMap::new();
    for (record, blob) in &report.outputs {
        let mut file_name = blob.file_name(record);
        let seen = names.entry(file_name.clone()).or_insert(0);
        *seen += 1;
        if *seen > 1 {
            file_name = format!("{}-{}.{}", record.replace(['/', '\\', ':'], "_"), seen, blob.extension());
        }
        let target = out_dir.join(&file_name);
        match fs::write(&target, &blob.bytes) {
            Ok(()) => {
                println!("  {} -> {}", record, target.display());
                written += 1;
            }
            Err(e) => eprintln!("Error: cannot write '{}': {}", target.display(), e),
        }
    }
    written
}

/// Truncate a string to `max` characters, appending "…" if shortened.
fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
        out.push('…');
        out
    }
}
