//! Benchmark kinds and their result locators.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::SystemTime;

use anyhow::Result;
use serde_json::json;

use crate::case::TestCase;
use crate::error::PlanParseError;

/// Per-benchmark hooks used by the execution engine.
pub trait ResultAdapter: Send {
    /// Folders (relative to the tool directory) backed up after a plan.
    fn result_folders(&self) -> &[&'static str];

    /// Raw result for the latest run. `None` means "use the run's stdout".
    fn locate_result(&self, tool_dir: &Path, stdout: &str) -> Result<Option<String>>;

    /// Cases the benchmark cannot run are skipped before their lifecycle.
    fn should_skip(&self, _case: &TestCase) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TestKind {
    Unixbench,
    Lmbench,
    Fio,
    Iozone,
    Stream,
    SpecJvm2008,
    SpecCpu2006,
    SpecCpu2017,
    Netperf,
}

impl TestKind {
    pub const ALL: [TestKind; 9] = [
        TestKind::Unixbench,
        TestKind::Lmbench,
        TestKind::Fio,
        TestKind::Iozone,
        TestKind::Stream,
        TestKind::SpecJvm2008,
        TestKind::SpecCpu2006,
        TestKind::SpecCpu2017,
        TestKind::Netperf,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TestKind::Unixbench => "unixbench",
            TestKind::Lmbench => "lmbench",
            TestKind::Fio => "fio",
            TestKind::Iozone => "iozone",
            TestKind::Stream => "stream",
            TestKind::SpecJvm2008 => "specjvm2008",
            TestKind::SpecCpu2006 => "speccpu2006",
            TestKind::SpecCpu2017 => "speccpu2017",
            TestKind::Netperf => "netperf",
        }
    }

    pub fn adapter(self) -> Box<dyn ResultAdapter> {
        Box::new(self)
    }
}

impl fmt::Display for TestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TestKind {
    type Err = PlanParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        TestKind::ALL
            .into_iter()
            .find(|k| k.as_str() == wanted)
            .ok_or_else(|| PlanParseError::UnknownTestType(s.to_string()))
    }
}

impl ResultAdapter for TestKind {
    fn result_folders(&self) -> &[&'static str] {
        match self {
            TestKind::Lmbench => &["results_last"],
            TestKind::Iozone | TestKind::SpecCpu2006 | TestKind::SpecCpu2017 => &["result"],
            TestKind::Netperf => &[],
            _ => &["results"],
        }
    }

    fn locate_result(&self, tool_dir: &Path, _stdout: &str) -> Result<Option<String>> {
        match self {
            TestKind::Unixbench => {
                let dir = tool_dir.join("results");
                read_newest(&dir, |name| !name.ends_with(".html") && !name.ends_with(".log"))
            }
            TestKind::Lmbench => {
                let summary = tool_dir.join("results").join("summary.out");
                Ok(Some(fs::read_to_string(summary).unwrap_or_default()))
            }
            TestKind::Fio => read_newest(&tool_dir.join("results"), |_| true),
            TestKind::Iozone => read_newest(&tool_dir.join("result"), |name| name.ends_with(".log")),
            TestKind::Stream => locate_stream(&tool_dir.join("results")),
            TestKind::SpecJvm2008 => locate_specjvm(&tool_dir.join("results")),
            TestKind::SpecCpu2006 => locate_speccpu(
                &tool_dir.join("result"),
                &[("int", "CINT2006.{seq}"), ("fp", "CFP2006.{seq}")],
            ),
            TestKind::SpecCpu2017 => locate_speccpu(
                &tool_dir.join("result"),
                &[
                    ("intrate", "CPU2017.{seq}.intrate"),
                    ("intspeed", "CPU2017.{seq}.intspeed"),
                    ("fprate", "CPU2017.{seq}.fprate"),
                    ("fpspeed", "CPU2017.{seq}.fpspeed"),
                ],
            ),
            TestKind::Netperf => Ok(None),
        }
    }

    fn should_skip(&self, case: &TestCase) -> bool {
        match self {
            TestKind::Iozone => ["half", "full", "double"]
                .iter()
                .any(|m| case.run_cmd.contains(m)),
            _ => false,
        }
    }
}

/// Entries of `dir` accepted by `keep`, newest last. Later directory
/// entries win ties.
fn newest_entry(dir: &Path, keep: impl Fn(&str) -> bool) -> Result<Option<PathBuf>> {
    if !dir.is_dir() {
        return Ok(None);
    }
    let mut best: Option<(PathBuf, SystemTime)> = None;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !keep(&name) {
            continue;
        }
        let mtime = entry.metadata()?.modified()?;
        let newer = best.as_ref().map(|(_, t)| mtime >= *t).unwrap_or(true);
        if newer {
            best = Some((entry.path(), mtime));
        }
    }
    Ok(best.map(|(p, _)| p))
}

fn read_newest(dir: &Path, keep: impl Fn(&str) -> bool) -> Result<Option<String>> {
    match newest_entry(dir, keep)? {
        Some(path) if path.is_file() => Ok(Some(fs::read_to_string(path)?)),
        _ => Ok(None),
    }
}

fn locate_stream(dir: &Path) -> Result<Option<String>> {
    if !dir.is_dir() {
        return Ok(None);
    }
    let single = read_newest(dir, |name| name.starts_with("Single"))?;
    let multiple = read_newest(dir, |name| !name.starts_with("Single"))?;
    Ok(Some(json!({ "single": single, "multiple": multiple }).to_string()))
}

fn locate_specjvm(dir: &Path) -> Result<Option<String>> {
    let Some(newest) = newest_entry(dir, |_| true)? else {
        return Ok(None);
    };
    if newest.is_file() {
        return Ok(Some(fs::read_to_string(newest)?));
    }
    read_newest(&newest, |name| name.ends_with(".txt"))
}

fn locate_speccpu(dir: &Path, parts: &[(&str, &str)]) -> Result<Option<String>> {
    let Some(newest) = newest_entry(dir, |name| name.ends_with(".txt"))? else {
        return Ok(None);
    };
    let seq = newest
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| n.split('.').nth(1))
        .unwrap_or_default()
        .to_string();
    let mut data = serde_json::Map::new();
    for (key, _) in parts {
        data.insert(key.to_string(), json!(""));
    }
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.ends_with(".txt") {
            continue;
        }
        for (key, pattern) in parts {
            if name.starts_with(&pattern.replace("{seq}", &seq)) {
                data.insert(key.to_string(), json!(fs::read_to_string(entry.path())?));
            }
        }
    }
    Ok(Some(serde_json::Value::Object(data).to_string()))
}
