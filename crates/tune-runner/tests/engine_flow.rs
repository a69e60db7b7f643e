use std::fs;
use std::path::Path;
use std::time::Duration;

use tune_runner::{
    BatchOptions, CaseError, FuncRegistry, HostFacts, Outcome, PlanError, PlanParseError,
    RunnerConfig, SchemeBatch, SchemeParser, SchemeRunner,
};

fn facts() -> HostFacts {
    HostFacts {
        cpu_count: 4,
        mem_total_bytes: 8 << 30,
        arch: "x86_64".to_string(),
    }
}

fn quiet_options(config: &RunnerConfig) -> BatchOptions {
    let mut options = BatchOptions::from_config(config);
    options.settle = Duration::ZERO;
    options.recovery_command = "true".to_string();
    options
}

/// A plan whose single parameter writes into `knob`; build fails when the
/// knob holds 2. `run` appends the observed value to `runs.log`.
fn knob_plan(base: &Path, project: &str, iterations: usize) -> String {
    let knob = base.join("knob");
    fs::write(&knob, "0\n").expect("seed knob");
    format!(
        r#"
project: {project}
test_type: netperf
base_path: {base}/{{project}}
tool_tgz: "{{src_path}}/tool.tgz"
tool_dir: "{{base_path}}/tool"
tool_decompression: "mkdir -p {{tool_dir}}"
maxiterations: {iterations}
testcase:
  name: knob
  clean: "echo clean >> clean.log"
  build: "test \"$(cat {knob})\" != 2"
  run: "echo $(cat {knob}) >> runs.log; echo threads={{FUNC_THREAD_NUM:multi}}"
  configs:
    - name: level
      get: "cat {knob}"
      set: "echo {{value}} > {knob}"
      values: [1, 2, 3]
"#,
        project = project,
        base = base.display(),
        iterations = iterations,
        knob = knob.display(),
    )
}

#[test]
fn failing_case_is_isolated_and_baseline_restored() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = RunnerConfig::empty();
    let scheme = SchemeParser::new(&config)
        .parse_str(&knob_plan(dir.path(), "demo", 1))
        .expect("parse plan");
    assert_eq!(
        scheme.case_names().collect::<Vec<_>>(),
        vec!["demo-knob-level-0", "demo-knob-level-1", "demo-knob-level-2"]
    );

    let mut runner = SchemeRunner::new(scheme, FuncRegistry::with_builtins(facts(), config));
    runner.prepare().expect("prepare");
    let summary = runner.do_test().expect("do_test");

    assert_eq!(summary.outcome, Outcome::Completed);
    assert_eq!(summary.cases_run, 3);
    assert_eq!(summary.failures.len(), 1);
    let failure = &summary.failures[0];
    assert_eq!(failure.case, "demo-knob-level-1");
    match &failure.error {
        CaseError::CommandFailed { phase, .. } => assert_eq!(*phase, "build"),
        other => panic!("unexpected failure: {}", other),
    }

    let tool = dir.path().join("demo/tool");
    let runs = fs::read_to_string(tool.join("runs.log")).expect("runs.log");
    assert_eq!(runs.lines().collect::<Vec<_>>(), vec!["1", "3"]);
    let cleans = fs::read_to_string(tool.join("clean.log")).expect("clean.log");
    assert_eq!(cleans.lines().count(), 3, "failed case must still be cleaned");
    let knob = fs::read_to_string(dir.path().join("knob")).expect("knob");
    assert_eq!(knob.trim(), "0");
    assert_eq!(summary.exported, 2);
}

#[test]
fn each_iteration_is_exported_with_rendered_functions() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = RunnerConfig::empty();
    let scheme = SchemeParser::new(&config)
        .parse_str(&knob_plan(dir.path(), "iter", 2))
        .expect("parse plan");
    let mut runner = SchemeRunner::new(scheme, FuncRegistry::with_builtins(facts(), config));
    runner.prepare().expect("prepare");
    let summary = runner.do_test().expect("do_test");
    assert_eq!(summary.exported, 4);

    let result_dir = runner.result_dir().expect("result dir").to_path_buf();
    let report = runner
        .export(&result_dir)
        .expect("export")
        .expect("report file");
    let report: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(report).expect("read report")).expect("json");
    let datas = report["datas"].as_array().expect("datas");
    assert_eq!(datas.len(), 4);
    assert_eq!(datas[0]["name"], "iter-knob-level-0-0");
    assert_eq!(datas[0]["data"], "threads=4\n");
    assert_eq!(datas[0]["tinf"]["testcase"]["name"], "iter-knob-level-0");
}

#[test]
fn batch_continues_after_a_broken_plan() {
    let dir = tempfile::tempdir().expect("tempdir");
    let broken = dir.path().join("broken.yaml");
    fs::write(&broken, "project: broken\ntest_type: nosuchbench\n").expect("write broken");
    let good = dir.path().join("good.yaml");
    fs::write(&good, knob_plan(dir.path(), "good", 1)).expect("write good");

    let config = RunnerConfig::empty();
    let mut seen = Vec::new();
    let (tx, rx) = std::sync::mpsc::channel();
    let mut batch = SchemeBatch::new(
        config.clone(),
        FuncRegistry::with_builtins(facts(), config.clone()),
        quiet_options(&config),
    )
    .with_plan_hook(move |scheme| {
        let _ = tx.send(scheme.project.clone());
    });
    let reports = batch.run(&[broken.as_path(), good.as_path()]);
    seen.extend(rx.try_iter());

    assert_eq!(reports.len(), 2);
    assert!(matches!(
        reports[0].result,
        Err(PlanError::Parse(PlanParseError::UnknownTestType(_)))
    ));
    let summary = reports[1].result.as_ref().expect("good plan runs");
    assert_eq!(summary.cases_run, 3);
    assert_eq!(summary.failures.len(), 1);
    assert!(reports[1].report_file.as_ref().map(|p| p.is_file()).unwrap_or(false));
    assert_eq!(seen, vec!["good".to_string()]);
}
