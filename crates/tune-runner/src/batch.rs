use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::config::RunnerConfig;
use crate::deps::PackageCommands;
use crate::engine::{RunSummary, SchemeRunner};
use crate::error::PlanError;
use crate::exec::Shell;
use crate::funcs::FuncRegistry;
use crate::parser::SchemeParser;
use crate::scheme::Scheme;

pub const DEFAULT_SETTLE_SECONDS: u64 = 10;
pub const DEFAULT_RECOVERY_COMMAND: &str = "sync; echo 3 > /proc/sys/vm/drop_caches";

#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Per-command timeout applied to every child of every plan.
    pub timeout: Option<Duration>,
    /// Pause between two plans after the recovery command.
    pub settle: Duration,
    pub recovery_command: String,
    /// Directory receiving `report.json`; falls back to each plan's result dir.
    pub report_path: Option<PathBuf>,
    pub package_commands: PackageCommands,
}

impl BatchOptions {
    pub fn from_config(config: &RunnerConfig) -> Self {
        Self {
            timeout: None,
            settle: Duration::from_secs(config.settle_seconds().unwrap_or(DEFAULT_SETTLE_SECONDS)),
            recovery_command: DEFAULT_RECOVERY_COMMAND.to_string(),
            report_path: config.report_path().map(PathBuf::from),
            package_commands: PackageCommands::default(),
        }
    }
}

#[derive(Debug)]
pub struct PlanReport {
    pub path: PathBuf,
    /// Known once the document parsed.
    pub project: Option<String>,
    pub result: Result<RunSummary, PlanError>,
    pub report_file: Option<PathBuf>,
}

impl PlanReport {
    pub fn failed(&self) -> bool {
        self.result.is_err()
    }
}

type PlanHook = Box<dyn FnMut(&Scheme) + Send>;

/// Runs several plans in sequence. A failing plan is reported and the
/// next one still runs.
pub struct SchemeBatch {
    config: RunnerConfig,
    funcs: FuncRegistry,
    options: BatchOptions,
    stop: Arc<AtomicBool>,
    plan_hook: Option<PlanHook>,
}

impl SchemeBatch {
    pub fn new(config: RunnerConfig, funcs: FuncRegistry, options: BatchOptions) -> Self {
        Self {
            config,
            funcs,
            options,
            stop: Arc::new(AtomicBool::new(false)),
            plan_hook: None,
        }
    }

    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    /// Called with each parsed plan before it is prepared.
    pub fn with_plan_hook(mut self, hook: impl FnMut(&Scheme) + Send + 'static) -> Self {
        self.plan_hook = Some(Box::new(hook));
        self
    }

    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn run<P: AsRef<Path>>(&mut self, paths: &[P]) -> Vec<PlanReport> {
        let mut reports = Vec::with_capacity(paths.len());
        for (idx, path) in paths.iter().enumerate() {
            if self.stop.load(Ordering::Relaxed) {
                warn!(remaining = paths.len() - idx, "stop requested, remaining schemes skipped");
                break;
            }
            if idx > 0 {
                self.recover();
            }
            let path = path.as_ref();
            info!(scheme = %path.display(), "## run scheme {}/{}", idx + 1, paths.len());
            let report = self.run_one(path);
            match &report.result {
                Ok(summary) => info!(
                    scheme = %path.display(),
                    cases = summary.cases_run,
                    failed = summary.failures.len(),
                    "## scheme done"
                ),
                Err(e) => error!(scheme = %path.display(), error = %e, "## scheme failed"),
            }
            reports.push(report);
        }
        reports
    }

    fn run_one(&mut self, path: &Path) -> PlanReport {
        let mut project = None;
        let mut report_file = None;
        let result = self.execute(path, &mut project, &mut report_file);
        PlanReport {
            path: path.to_path_buf(),
            project,
            result,
            report_file,
        }
    }

    fn execute(
        &mut self,
        path: &Path,
        project: &mut Option<String>,
        report_file: &mut Option<PathBuf>,
    ) -> Result<RunSummary, PlanError> {
        let scheme = SchemeParser::new(&self.config).parse_file(path)?;
        *project = Some(scheme.project.clone());
        if let Some(hook) = self.plan_hook.as_mut() {
            hook(&scheme);
        }

        let shell = Shell::new().with_timeout(self.options.timeout);
        let mut runner = SchemeRunner::new(scheme, self.funcs.clone())
            .with_shell(shell)
            .with_package_commands(self.options.package_commands.clone())
            .with_stop_flag(Arc::clone(&self.stop));
        runner.prepare()?;
        let summary = runner.do_test()?;

        let export_dir = self
            .options
            .report_path
            .clone()
            .or_else(|| runner.result_dir().map(Path::to_path_buf));
        if let Some(dir) = export_dir {
            match runner.export(&dir) {
                Ok(file) => *report_file = file,
                Err(e) => warn!(dir = %dir.display(), error = %e, "report export failed"),
            }
        }
        Ok(summary)
    }

    /// Flushes page cache and waits so the next plan starts from a quiet host.
    fn recover(&self) {
        if !self.options.recovery_command.trim().is_empty() {
            match Shell::new().run(&self.options.recovery_command) {
                Ok(out) if !out.success() => {
                    warn!(code = ?out.code, stderr = %out.stderr.trim(), "recovery command failed")
                }
                Err(e) => warn!(error = %e, "recovery command failed"),
                Ok(_) => {}
            }
        }
        if !self.options.settle.is_zero() {
            info!(seconds = self.options.settle.as_secs(), "settling before next scheme");
            std::thread::sleep(self.options.settle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::funcs::HostFacts;

    #[test]
    fn options_read_settle_and_report_path_from_config() {
        let config = RunnerConfig::from_yaml_str("main:\n  settle_seconds: 3\n  report_path: /tmp/out\n")
            .expect("config");
        let opts = BatchOptions::from_config(&config);
        assert_eq!(opts.settle, Duration::from_secs(3));
        assert_eq!(opts.report_path, Some(PathBuf::from("/tmp/out")));

        let opts = BatchOptions::from_config(&RunnerConfig::empty());
        assert_eq!(opts.settle, Duration::from_secs(DEFAULT_SETTLE_SECONDS));
        assert_eq!(opts.recovery_command, DEFAULT_RECOVERY_COMMAND);
    }

    #[test]
    fn missing_scheme_file_is_reported_not_fatal() {
        let config = RunnerConfig::empty();
        let facts = HostFacts {
            cpu_count: 1,
            mem_total_bytes: 0,
            arch: "x86_64".to_string(),
        };
        let mut options = BatchOptions::from_config(&config);
        options.settle = Duration::ZERO;
        options.recovery_command = "true".to_string();
        let mut batch = SchemeBatch::new(config.clone(), FuncRegistry::empty(facts, config), options);
        let reports = batch.run(&["/nonexistent/a.yaml", "/nonexistent/b.yaml"]);
        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(PlanReport::failed));
        assert!(reports[0].project.is_none());
    }

    fn write_plan(dir: &Path, project: &str) -> PathBuf {
        let path = dir.join(format!("{}.yaml", project));
        let doc = format!(
            "project: {project}\n\
             test_type: netperf\n\
             base_path: {base}/{{project}}\n\
             tool_tgz: \"{{src_path}}/tool.tgz\"\n\
             tool_dir: \"{{base_path}}/tool\"\n\
             tool_decompression: \"mkdir -p {{tool_dir}}\"\n\
             testcase:\n  run: \"true\"\n",
            project = project,
            base = dir.display(),
        );
        std::fs::write(&path, doc).expect("write plan");
        path
    }

    fn counting_batch(counter: &Path) -> SchemeBatch {
        let config = RunnerConfig::empty();
        let facts = HostFacts {
            cpu_count: 1,
            mem_total_bytes: 0,
            arch: "x86_64".to_string(),
        };
        let mut options = BatchOptions::from_config(&config);
        options.settle = Duration::ZERO;
        options.recovery_command = format!("echo x >> {}", counter.display());
        SchemeBatch::new(config.clone(), FuncRegistry::empty(facts, config), options)
    }

    fn recoveries(counter: &Path) -> usize {
        std::fs::read_to_string(counter)
            .map(|s| s.lines().count())
            .unwrap_or(0)
    }

    #[test]
    fn recovery_runs_only_between_plans() {
        let dir = tempfile::tempdir().expect("tempdir");
        let plans: Vec<PathBuf> = ["a", "b", "c"]
            .iter()
            .map(|p| write_plan(dir.path(), p))
            .collect();

        let single = dir.path().join("single.count");
        let reports = counting_batch(&single).run(&plans[..1]);
        assert!(reports.iter().all(|r| !r.failed()), "{:?}", reports[0].result);
        assert_eq!(recoveries(&single), 0);

        let triple = dir.path().join("triple.count");
        let reports = counting_batch(&triple).run(&plans);
        assert_eq!(reports.len(), 3);
        assert!(reports.iter().all(|r| !r.failed()));
        assert_eq!(recoveries(&triple), 2);
    }
}
