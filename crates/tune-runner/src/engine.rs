use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::adapter::ResultAdapter;
use crate::case::TestCase;
use crate::deps::{DependencyManager, PackageCommands};
use crate::env::{EnvCollector, HostEnvCollector};
use crate::error::{CaseError, SchemeError};
use crate::exec::Shell;
use crate::funcs::{FuncRegistry, HostFacts};
use crate::report::{JsonReport, ResultSink};
use crate::scheme::Scheme;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Completed,
    Aborted,
}

#[derive(Debug)]
pub struct CaseFailure {
    pub case: String,
    pub error: CaseError,
}

#[derive(Debug)]
pub struct RunSummary {
    pub project: String,
    pub outcome: Outcome,
    pub cases_total: usize,
    pub cases_run: usize,
    pub cases_skipped: usize,
    pub failures: Vec<CaseFailure>,
    /// Iteration records handed to the result sink.
    pub exported: usize,
}

impl RunSummary {
    pub fn to_json(&self) -> Value {
        json!({
            "project": self.project,
            "outcome": self.outcome,
            "cases_total": self.cases_total,
            "cases_run": self.cases_run,
            "cases_skipped": self.cases_skipped,
            "exported": self.exported,
            "failures": self.failures.iter().map(|f| json!({
                "case": f.case,
                "error": f.error.to_string(),
            })).collect::<Vec<_>>(),
        })
    }
}

/// Drives one [`Scheme`] end to end.
///
/// Case failures are isolated: each failing case is logged, cleaned and
/// reset, then the next case runs. Only `prepare` failures abort the plan.
pub struct SchemeRunner {
    scheme: Scheme,
    shell: Shell,
    funcs: FuncRegistry,
    adapter: Box<dyn ResultAdapter>,
    env: Box<dyn EnvCollector>,
    sink: Option<Box<dyn ResultSink>>,
    package_commands: PackageCommands,
    deps: Option<DependencyManager>,
    tool_dir: Option<PathBuf>,
    result_dir: Option<PathBuf>,
    stop: Arc<AtomicBool>,
}

impl SchemeRunner {
    pub fn new(scheme: Scheme, funcs: FuncRegistry) -> Self {
        let adapter = scheme.test_type.adapter();
        Self {
            scheme,
            shell: Shell::new(),
            funcs,
            adapter,
            env: Box::new(HostEnvCollector::new(HostFacts::probe(), Shell::new())),
            sink: None,
            package_commands: PackageCommands::default(),
            deps: None,
            tool_dir: None,
            result_dir: None,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_shell(mut self, shell: Shell) -> Self {
        self.shell = shell;
        self
    }

    pub fn with_adapter(mut self, adapter: Box<dyn ResultAdapter>) -> Self {
        self.adapter = adapter;
        self
    }

    pub fn with_env_collector(mut self, env: Box<dyn EnvCollector>) -> Self {
        self.env = env;
        self
    }

    pub fn with_sink(mut self, sink: Box<dyn ResultSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_package_commands(mut self, commands: PackageCommands) -> Self {
        self.package_commands = commands;
        self
    }

    /// Checked between cases; once raised the remaining cases are skipped.
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    pub fn scheme(&self) -> &Scheme {
        &self.scheme
    }

    pub fn tool_dir(&self) -> Option<&Path> {
        self.tool_dir.as_deref()
    }

    /// Timestamped result directory, when the runner created its own report.
    pub fn result_dir(&self) -> Option<&Path> {
        self.result_dir.as_deref()
    }

    /// Creates directories, unpacks the tool and pins child processes to
    /// the tool directory. Failure here is fatal to the plan.
    pub fn prepare(&mut self) -> Result<(), SchemeError> {
        info!(project = %self.scheme.project, phase = "prepare", "preparing scheme");
        let tool_dir = self.scheme.prepare(&self.shell)?;
        self.shell = self.shell.clone().with_cwd(&tool_dir);
        self.tool_dir = Some(tool_dir);
        if self.sink.is_none() {
            let report = JsonReport::create(&self.scheme.ret_path).map_err(|e| SchemeError::Report {
                path: self.scheme.ret_path.clone(),
                message: e.to_string(),
            })?;
            self.result_dir = Some(report.result_dir().to_path_buf());
            self.sink = Some(Box::new(report));
        }
        self.deps = Some(DependencyManager::with_commands(
            &self.scheme.rpm_list,
            self.shell.clone(),
            self.package_commands.clone(),
        ));
        Ok(())
    }

    pub fn do_test(&mut self) -> Result<RunSummary, SchemeError> {
        let Some(tool_dir) = self.tool_dir.clone() else {
            return Err(SchemeError::NotPrepared {
                project: self.scheme.project.clone(),
            });
        };
        let mut summary = RunSummary {
            project: self.scheme.project.clone(),
            outcome: Outcome::Completed,
            cases_total: self.scheme.testcases.len(),
            cases_run: 0,
            cases_skipped: 0,
            failures: Vec::new(),
            exported: 0,
        };

        self.collect_env();
        self.install_dependencies();
        self.apply_global_config();

        let total = self.scheme.testcases.len();
        for idx in 0..total {
            if self.stop.load(Ordering::Relaxed) {
                warn!(remaining = total - idx, "stop requested, skipping remaining cases");
                summary.cases_skipped += total - idx;
                summary.outcome = Outcome::Aborted;
                break;
            }
            if self.adapter.should_skip(&self.scheme.testcases[idx]) {
                info!(case = %self.scheme.testcases[idx].name, "case not supported by benchmark, skipped");
                summary.cases_skipped += 1;
                continue;
            }
            info!("#### run {}/{} testcase start", idx + 1, total);
            let mut case = self.scheme.testcases[idx].clone();
            let result = self.run_case(&mut case, &tool_dir, &mut summary.exported);
            summary.cases_run += 1;
            if let Err(err) = result {
                error!(case = %case.name, error = %err, "testcase failed");
                summary.failures.push(CaseFailure {
                    case: case.name.clone(),
                    error: err,
                });
            }
            self.scheme.testcases[idx] = case;
            info!("#### run {}/{} testcase done", idx + 1, total);
        }

        self.backup_results(&tool_dir);
        self.restore_global_config();
        self.remove_dependencies();
        info!(
            project = %summary.project,
            outcome = ?summary.outcome,
            run = summary.cases_run,
            failed = summary.failures.len(),
            "scheme finished"
        );
        Ok(summary)
    }

    /// Writes the consolidated report into `dir`.
    pub fn export(&mut self, dir: &Path) -> Result<Option<PathBuf>> {
        match self.sink.as_mut() {
            Some(sink) => Ok(Some(sink.export(dir)?)),
            None => Ok(None),
        }
    }

    fn collect_env(&mut self) {
        info!(phase = "collect_env", "collecting environment");
        let env = match self.env.collect() {
            Ok(env) => env,
            Err(e) => {
                warn!(error = %e, "collect env failed");
                return;
            }
        };
        if let Some(sink) = self.sink.as_mut() {
            if let Err(e) = sink.save_env(&env) {
                warn!(error = %e, "saving env failed");
            }
        }
    }

    fn install_dependencies(&mut self) {
        if let Some(deps) = self.deps.as_mut() {
            if let Err(e) = deps.install() {
                warn!(error = %e, "install dependent packages failed");
            }
        }
    }

    fn remove_dependencies(&mut self) {
        if let Some(deps) = self.deps.as_mut() {
            if let Err(e) = deps.uninstall() {
                warn!(error = %e, "uninstall dependent packages failed");
            }
        }
    }

    fn apply_global_config(&mut self) {
        let shell = &self.shell;
        for cfg in self.scheme.configs.iter_mut() {
            if let Err(e) = cfg.save(shell) {
                warn!(config = %cfg.name(), error = %e, "saving global config failed, setup skipped");
                continue;
            }
            if let Err(e) = cfg.setup(shell) {
                warn!(config = %cfg.name(), error = %e, "setup global config failed");
            }
        }
    }

    fn restore_global_config(&mut self) {
        for cfg in self.scheme.configs.iter().rev() {
            if let Err(e) = cfg.reset(&self.shell) {
                warn!(config = %cfg.name(), error = %e, "reset global config failed");
            }
        }
    }

    /// Full lifecycle of one case. Cleanup always runs; its failure only
    /// becomes the case's error when the body itself succeeded.
    fn run_case(
        &mut self,
        case: &mut TestCase,
        tool_dir: &Path,
        exported: &mut usize,
    ) -> Result<(), CaseError> {
        let body = self.case_body(case, tool_dir, exported);
        let clean = case.clean(&self.shell);
        let reset = case.reset_config(&self.shell);
        match body {
            Err(err) => {
                for cleanup in [clean, reset].into_iter().filter_map(Result::err) {
                    warn!(case = %case.name, error = %cleanup, "cleanup after failure also failed");
                }
                Err(err)
            }
            Ok(()) => clean.and(reset),
        }
    }

    fn case_body(
        &mut self,
        case: &mut TestCase,
        tool_dir: &Path,
        exported: &mut usize,
    ) -> Result<(), CaseError> {
        case.save_config(&self.shell)?;
        for cfg in case.configs.iter().filter(|c| c.captured_baseline().is_none()) {
            warn!(case = %case.name, config = %cfg.name(), "no baseline captured, value will not be restored");
        }
        case.setup_config(&self.shell)?;
        case.build(&self.shell)?;

        let max = self.scheme.max_iterations;
        for idx in 0..max {
            info!("###### run testcase's {}/{} times...", idx + 1, max);
            let stdout = case.run(&self.shell, &self.funcs)?;
            let name = format!("{}-{}", case.name, idx);
            let mut tinf = self.scheme.to_data();
            if let Value::Object(map) = &mut tinf {
                map.insert("testcase".to_string(), case.to_data());
            }
            let data = self
                .adapter
                .locate_result(tool_dir, &stdout)
                .map_err(|e| CaseError::Other {
                    case: case.name.clone(),
                    message: format!("reading result failed: {}", e),
                })?
                .unwrap_or(stdout);
            if let Some(sink) = self.sink.as_mut() {
                sink.save_result(&name, &tinf, &data)
                    .map_err(|e| CaseError::Other {
                        case: case.name.clone(),
                        message: format!("exporting result failed: {}", e),
                    })?;
                *exported += 1;
            }
            info!("###### run testcase's {}/{} times done", idx + 1, max);
        }
        Ok(())
    }

    /// Copies the first existing result folder of the tool into `run_path`.
    fn backup_results(&self, tool_dir: &Path) {
        for folder in self.adapter.result_folders() {
            let src = tool_dir.join(folder);
            if !src.is_dir() {
                continue;
            }
            if let Err(e) = copy_dir(&src, &self.scheme.run_path) {
                warn!(folder = %src.display(), error = %e, "backup results failed");
            }
            break;
        }
    }
}

/// Recursive copy; symlinks are followed and copied as their targets.
fn copy_dir(src: &Path, dst: &Path) -> Result<()> {
    for entry in walkdir::WalkDir::new(src) {
        let entry = entry?;
        let path = entry.path();
        let rel = path.strip_prefix(src)?;
        if rel.as_os_str().is_empty() {
            continue;
        }
        let target = dst.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry.file_type().is_symlink() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            match fs::canonicalize(path) {
                Ok(real) if real.is_dir() => copy_dir(&real, &target)?,
                Ok(real) if real.is_file() => {
                    fs::copy(real, &target)?;
                }
                _ => warn!(path = %path.display(), "dangling symlink in results, not copied"),
            }
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(path, &target)?;
        } else {
            warn!(path = %path.display(), "special file in results, not copied");
        }
    }
    Ok(())
}
