use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use fieldconv_config::{AppConfig, ConfigError};
use fieldconv_engine::{
    BatchReport, ConversionOptions, ItemOutcome, Reconciler, SourceKind, convert_files,
    recover_interrupted,
};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser, Debug)]
#[command(version, about = "Convert GNSS guidance field data into WGS84 shapefiles", long_about = None)]
struct Cli {
    /// Configuration file (defaults to $FIELDCONV_CONFIG or ./config/default.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log filter overriding `logging.level`, e.g. `debug` or `fieldconv_engine=trace`
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert every field directory under ROOT in place
    Tree {
        root: PathBuf,
        /// Write the batch report as JSON
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Convert .crv curve files
    Curves(FilesArgs),
    /// Convert .ini AB-line files
    AbLines(FilesArgs),
    /// Repair boundary shapefiles
    Boundaries(FilesArgs),
    /// Finish or roll back swaps interrupted by an earlier run
    Recover { root: PathBuf },
}

#[derive(Args, Debug)]
struct FilesArgs {
    #[arg(required = true)]
    files: Vec<PathBuf>,
    /// Output directory
    #[arg(long)]
    out: PathBuf,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match load_configuration(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error: {err:#}");
            return ExitCode::from(1);
        }
    };
    init_logging(&config, cli.log_level.as_deref());

    match run(cli.command, &config) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(2),
        Err(err) => {
            error!(error = %format!("{err:#}"), "执行失败");
            eprintln!("error: {err:#}");
            ExitCode::from(1)
        }
    }
}

/// 执行子命令；返回 `Ok(false)` 表示有条目转换失败。
fn run(command: Command, config: &AppConfig) -> Result<bool> {
    let options = ConversionOptions::from(&config.conversion);
    match command {
        Command::Tree { root, report } => {
            let batch = Reconciler::new(options)
                .convert_tree(&root)
                .with_context(|| format!("无法转换目录树 {}", root.display()))?;
            print_batch(&batch);
            if let Some(path) = report {
                write_report(&batch, &path)?;
            }
            Ok(batch.is_clean())
        }
        Command::Curves(args) => run_files(SourceKind::Curve, args, &options),
        Command::AbLines(args) => run_files(SourceKind::Line, args, &options),
        Command::Boundaries(args) => run_files(SourceKind::Boundary, args, &options),
        Command::Recover { root } => {
            let handled = recover_interrupted(&root)
                .with_context(|| format!("无法恢复 {}", root.display()))?;
            println!("recovered {handled}");
            Ok(true)
        }
    }
}

fn run_files(kind: SourceKind, args: FilesArgs, options: &ConversionOptions) -> Result<bool> {
    let outcomes = convert_files(kind, &args.files, &args.out, options)
        .with_context(|| format!("无法写入输出目录 {}", args.out.display()))?;
    let failed: Vec<&ItemOutcome> = outcomes.iter().filter(|item| !item.is_success()).collect();
    println!(
        "converted {}, failed {}",
        outcomes.len() - failed.len(),
        failed.len()
    );
    for item in &failed {
        println!("  {}", item.describe());
    }
    Ok(failed.is_empty())
}

fn print_batch(batch: &BatchReport) {
    println!(
        "converted {}, failed {} ({} fields)",
        batch.converted(),
        batch.failed(),
        batch.fields.len()
    );
    if batch.recovered > 0 {
        println!("recovered {} interrupted work directories", batch.recovered);
    }
    for (path, err) in batch.field_errors() {
        println!("  field {}: {err}", path.display());
    }
    for item in batch.failures() {
        println!("  {}", item.describe());
    }
}

fn write_report(batch: &BatchReport, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(batch).context("无法序列化转换报告")?;
    fs::write(path, json).with_context(|| format!("无法写入报告 {}", path.display()))?;
    info!(path = %path.display(), "已写出转换报告");
    Ok(())
}

fn load_configuration(override_path: Option<&Path>) -> Result<AppConfig> {
    match override_path {
        Some(path) => AppConfig::from_file(path)
            .with_context(|| format!("无法加载配置 {}", path.display())),
        None => match AppConfig::discover() {
            Ok(cfg) => Ok(cfg),
            Err(err) => {
                match &err {
                    ConfigError::Io { path, .. } | ConfigError::Parse { path, .. } => {
                        eprintln!(
                            "warning: 加载配置 {} 失败，使用内建默认值: {err}",
                            path.display()
                        );
                    }
                    ConfigError::Context { .. } | ConfigError::Invalid { .. } => {
                        eprintln!("warning: 加载配置失败，使用内建默认值: {err}");
                    }
                }
                Ok(AppConfig::default())
            }
        },
    }
}

fn init_logging(config: &AppConfig, override_level: Option<&str>) {
    let level = override_level.unwrap_or(&config.logging.level);
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| {
        eprintln!("warning: 无效的日志过滤器 `{level}`，改用 info");
        EnvFilter::new("info")
    });
    let subscriber = fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if subscriber.try_init().is_err() {
        // 已初始化，忽略
    }
}
