mod logging;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tune_runner::{
    BatchOptions, FuncRegistry, HostFacts, PlanReport, RunnerConfig, Scheme, SchemeBatch,
    SchemeParser,
};

#[derive(Parser)]
#[command(name = "tunebench", version = "0.3.0", about = "System tuning benchmark scheme runner")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one or more schemes in order.
    Run {
        #[arg(required = true)]
        schemes: Vec<PathBuf>,
        /// Directory receiving report.json for every scheme.
        #[arg(short = 'f', long)]
        report_path: Option<PathBuf>,
        #[arg(long)]
        config: Option<PathBuf>,
        /// Per-command timeout in seconds.
        #[arg(long)]
        timeout: Option<u64>,
        #[arg(long)]
        log_level: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Parse a scheme and list its generated cases without running anything.
    Describe {
        scheme: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let json_mode = command_json_mode(&cli.command);
    let result = run_command(cli.command);
    match result {
        Ok(Some(payload)) => {
            emit_json(&payload);
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(err) => {
            if json_mode {
                emit_json(&json_error("command_failed", err.to_string(), json!({})));
                std::process::exit(1);
            }
            Err(err)
        }
    }
}

fn run_command(command: Commands) -> Result<Option<Value>> {
    match command {
        Commands::Run {
            schemes,
            report_path,
            config,
            timeout,
            log_level,
            json,
        } => {
            let mut runner_config =
                logging::during_startup(log_level.as_deref(), || RunnerConfig::load(config.as_deref()))?;
            if let Some(dir) = &report_path {
                runner_config = runner_config
                    .with_override("/main/report_path", json!(dir.display().to_string()));
            }
            let logging = logging::init(
                log_level.as_deref(),
                runner_config.log_level(),
                runner_config.log_file(),
            )?;
            if let Some(source) = runner_config.source() {
                info!(config = %source.display(), "runner config loaded");
            }

            let stop = Arc::new(AtomicBool::new(false));
            let handler_flag = Arc::clone(&stop);
            ctrlc::set_handler(move || {
                handler_flag.store(true, Ordering::Relaxed);
                warn!("interrupt received, stopping after the current case");
            })
            .context("failed to install interrupt handler")?;

            let mut options = BatchOptions::from_config(&runner_config);
            options.timeout = timeout.map(Duration::from_secs);
            let funcs = FuncRegistry::with_builtins(HostFacts::probe(), runner_config.clone());
            let mut batch = SchemeBatch::new(runner_config, funcs, options)
                .with_stop_flag(stop)
                .with_plan_hook(move |scheme| logging.apply_scheme(scheme));
            let reports = batch.run(&schemes);

            let all_failed = !reports.is_empty() && reports.iter().all(PlanReport::failed);
            if json {
                let payload = json!({
                    "ok": !all_failed,
                    "command": "run",
                    "schemes": reports.iter().map(plan_report_to_json).collect::<Vec<_>>(),
                });
                if all_failed {
                    emit_json(&payload);
                    std::process::exit(1);
                }
                return Ok(Some(payload));
            }
            print_reports(&reports);
            if all_failed {
                bail!("all {} scheme(s) failed", reports.len());
            }
        }
        Commands::Describe {
            scheme,
            config,
            json,
        } => {
            let parsed = logging::during_startup(None, || -> Result<Scheme> {
                let runner_config = RunnerConfig::load(config.as_deref())?;
                describe_scheme(&scheme, &runner_config)
            })?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "describe",
                    "scheme": parsed.to_data(),
                    "testcases": parsed.testcases.iter().map(|c| c.to_data()).collect::<Vec<_>>(),
                })));
            }
            print_scheme(&parsed);
        }
    }
    Ok(None)
}

fn describe_scheme(path: &Path, config: &RunnerConfig) -> Result<Scheme> {
    SchemeParser::new(config)
        .parse_file(path)
        .with_context(|| format!("cannot load scheme {}", path.display()))
}

fn emit_json(value: &Value) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{}", s),
        Err(_) => println!(
            "{{\"ok\":false,\"error\":{{\"code\":\"serialization_error\",\"message\":\"failed to serialize JSON payload\",\"details\":{{}}}}}}"
        ),
    }
}

fn json_error(code: &str, message: String, details: Value) -> Value {
    json!({
        "ok": false,
        "error": {
            "code": code,
            "message": message,
            "details": details
        }
    })
}

fn command_json_mode(command: &Commands) -> bool {
    match command {
        Commands::Run { json, .. } | Commands::Describe { json, .. } => *json,
    }
}

fn plan_report_to_json(report: &PlanReport) -> Value {
    let mut out = json!({
        "path": report.path.display().to_string(),
        "project": report.project,
        "report_file": report.report_file.as_ref().map(|p| p.display().to_string()),
    });
    match &report.result {
        Ok(summary) => out["summary"] = summary.to_json(),
        Err(e) => out["error"] = json!(e.to_string()),
    }
    out
}

fn print_reports(reports: &[PlanReport]) {
    for report in reports {
        println!("scheme: {}", report.path.display());
        if let Some(project) = &report.project {
            println!("project: {}", project);
        }
        match &report.result {
            Ok(summary) => {
                println!("outcome: {:?}", summary.outcome);
                println!(
                    "cases: {} run, {} skipped, {} failed (of {})",
                    summary.cases_run,
                    summary.cases_skipped,
                    summary.failures.len(),
                    summary.cases_total
                );
                for failure in &summary.failures {
                    println!("  failed: {}", failure.error);
                }
                println!("records: {}", summary.exported);
            }
            Err(e) => println!("error: {}", e),
        }
        if let Some(file) = &report.report_file {
            println!("report: {}", file.display());
        }
    }
}

fn print_scheme(scheme: &Scheme) {
    println!("project: {}", scheme.project);
    println!("test_type: {}", scheme.test_type);
    println!("base_path: {}", scheme.base_path.display());
    println!("run_path: {}", scheme.run_path.display());
    println!("ret_path: {}", scheme.ret_path.display());
    println!("tool_dir: {}", scheme.tool_dir.display());
    println!("maxiterations: {}", scheme.max_iterations);
    if !scheme.rpm_list.is_empty() {
        println!("rpm_list: {}", scheme.rpm_list.join(" "));
    }
    for cfg in &scheme.configs {
        println!("global config: {} = {}", cfg.name(), cfg.target_value());
    }
    println!("digest: {}", scheme.digest);
    println!("testcases: {}", scheme.testcases.len());
    for case in &scheme.testcases {
        let values: Vec<String> = case
            .configs
            .iter()
            .map(|c| format!("{}={}", c.name(), c.target_value()))
            .collect();
        println!("  {} [{}]", case.name, values.join(", "));
    }
}
