//! hostfacts: host fact collection agent
//!
//! Entry point for one-shot collection runs:
//! - full or partial collection into a unified report on stdout
//! - single-module collection
//! - environment and configuration checks

use clap::{Args, Parser, Subcommand};
use hf_common::{Error, ModuleId, StructuredError, SCHEMA_VERSION};
use hf_config::{load_config, AgentConfig, LoadedConfig};
use hf_core::exit_codes::ExitCode;
use hf_core::logging::{self, LogConfig, LogFormat, LogLevel};
use hf_core::query::extension::ExtensionLocator;
use hf_core::sink::{JsonStdoutSink, ReportSink};
use hf_core::DataCollectionService;
use serde_json::json;
use std::path::PathBuf;
use tracing::{error, info};

/// Collect host facts through the local query engine.
#[derive(Parser)]
#[command(name = "hostfacts")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalOpts,
}

/// Global options available to all commands
#[derive(Args, Debug)]
struct GlobalOpts {
    /// Path to config.json
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,

    /// Log format on stderr (human, jsonl)
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    /// Pretty-print JSON output
    #[arg(long, global = true)]
    pretty: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a collection and print the unified report
    Collect(CollectArgs),

    /// Collect a single module and print its result
    Module(ModuleArgs),

    /// List registered module ids
    Modules,

    /// Validate configuration and environment
    Check,
}

#[derive(Args, Debug)]
struct CollectArgs {
    /// Comma-separated module ids (default: configured modules)
    #[arg(long, value_delimiter = ',')]
    modules: Vec<String>,
}

#[derive(Args, Debug)]
struct ModuleArgs {
    /// Module id
    id: String,
}

fn main() {
    let cli = Cli::parse();
    logging::init_logging(&LogConfig::from_env(
        cli.global.log_level,
        cli.global.log_format,
    ));

    let exit_code = match &cli.command {
        Commands::Collect(args) => run_collect(&cli.global, args),
        Commands::Module(args) => run_module(&cli.global, args),
        Commands::Modules => run_modules(&cli.global),
        Commands::Check => run_check(&cli.global),
    };

    std::process::exit(exit_code.as_i32());
}

fn load(global: &GlobalOpts) -> Result<LoadedConfig, ExitCode> {
    load_config(global.config.as_deref()).map_err(|e| {
        let err = Error::from(e);
        report_error(&err);
        ExitCode::from(&err)
    })
}

fn run_collect(global: &GlobalOpts, args: &CollectArgs) -> ExitCode {
    let loaded = match load(global) {
        Ok(loaded) => loaded,
        Err(code) => return code,
    };
    let service = DataCollectionService::from_config(&loaded.config);

    let requested: Vec<String> = if args.modules.is_empty() {
        loaded.config.enabled_modules.clone()
    } else {
        args.modules.clone()
    };
    let report = service.collect_all(&requested);

    let mut expected: Vec<ModuleId> = requested
        .iter()
        .map(ModuleId::new)
        .filter(|id| service.registry().contains(id.as_str()))
        .collect();
    expected.sort();
    expected.dedup();

    if let Err(e) = JsonStdoutSink::new(global.pretty).deliver(&report) {
        report_error(&e);
        return ExitCode::InternalError;
    }

    let code = ExitCode::for_report(report.module_count(), expected.len());
    info!(
        run_id = %report.metadata.run_id,
        exit = %code,
        "collect finished"
    );
    code
}

fn run_module(global: &GlobalOpts, args: &ModuleArgs) -> ExitCode {
    let loaded = match load(global) {
        Ok(loaded) => loaded,
        Err(code) => return code,
    };
    let service = DataCollectionService::from_config(&loaded.config);

    match service.collect_module(&args.id) {
        Ok(Some(result)) => {
            print_json(global, &json!(result));
            ExitCode::Clean
        }
        Ok(None) => {
            error!(module = %args.id, "module produced no result");
            ExitCode::PartialReport
        }
        Err(e) => {
            report_error(&e);
            ExitCode::from(&e)
        }
    }
}

fn run_modules(global: &GlobalOpts) -> ExitCode {
    let registry = hf_core::modules::ModuleRegistry::with_builtin();
    let ids: Vec<String> = registry.ids().iter().map(|id| id.to_string()).collect();
    print_json(global, &json!({ "schema_version": SCHEMA_VERSION, "modules": ids }));
    ExitCode::Clean
}

fn run_check(global: &GlobalOpts) -> ExitCode {
    let mut checks: Vec<serde_json::Value> = Vec::new();
    let mut all_ok = true;

    let config = match load_config(global.config.as_deref()) {
        Ok(loaded) => {
            checks.push(json!({
                "check": "config",
                "status": "ok",
                "source": loaded.source.to_string(),
                "path": loaded.path.as_ref().map(|p| p.display().to_string()),
            }));
            Some(loaded.config)
        }
        Err(e) => {
            all_ok = false;
            checks.push(json!({
                "check": "config",
                "status": "error",
                "error": e.to_string(),
            }));
            None
        }
    };

    if let Some(config) = &config {
        checks.extend(environment_checks(config));
    }

    print_json(
        global,
        &json!({
            "schema_version": SCHEMA_VERSION,
            "generated_at": chrono::Utc::now().to_rfc3339(),
            "status": if all_ok { "ok" } else { "error" },
            "checks": checks,
        }),
    );

    if all_ok {
        ExitCode::Clean
    } else {
        ExitCode::ConfigError
    }
}

/// Engine, shell, and extension availability. Missing tools are informational.
fn environment_checks(config: &AgentConfig) -> Vec<serde_json::Value> {
    let binary = |check: &str, path: &std::path::Path| {
        let present = path.is_file();
        json!({
            "check": check,
            "status": if present { "ok" } else { "info" },
            "path": path.display().to_string(),
        })
    };

    let extension = if config.extension_enabled {
        let resolved = ExtensionLocator::for_current_process(config.extension_path.clone()).resolve();
        json!({
            "check": "extension",
            "status": if resolved.is_some() { "ok" } else { "info" },
            "path": resolved.map(|p| p.display().to_string()),
        })
    } else {
        json!({ "check": "extension", "status": "info", "note": "disabled" })
    };

    vec![
        binary("engine", &config.engine_path),
        binary("shell", &config.shell),
        extension,
    ]
}

fn print_json(global: &GlobalOpts, value: &serde_json::Value) {
    let text = if global.pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    };
    match text {
        Ok(text) => println!("{}", text),
        Err(e) => error!(error = %e, "failed to serialize output"),
    }
}

/// Structured error on stderr.
fn report_error(err: &Error) {
    let structured = StructuredError::from(err);
    match serde_json::to_string(&structured) {
        Ok(text) => eprintln!("{}", text),
        Err(_) => eprintln!("error: {}", err),
    }
}
