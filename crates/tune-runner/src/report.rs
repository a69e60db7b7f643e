use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use chrono::{Local, Utc};
use serde_json::{json, Value};
use tracing::debug;

/// Destination for per-iteration records.
pub trait ResultSink: Send {
    fn save_env(&mut self, env: &Value) -> Result<()>;
    fn save_result(&mut self, name: &str, tinf: &Value, data: &str) -> Result<()>;
    /// Writes a consolidated report into `dir`.
    fn export(&mut self, dir: &Path) -> Result<PathBuf>;
}

/// JSON files under `{ret_path}/{timestamp}/`.
#[derive(Debug)]
pub struct JsonReport {
    result_dir: PathBuf,
    env: Option<Value>,
    records: Vec<Value>,
}

impl JsonReport {
    /// Creates a fresh timestamped result directory under `ret_path`.
    pub fn create(ret_path: &Path) -> Result<Self> {
        let stamp = Local::now().format("%Y-%m-%d-%H-%M-%S").to_string();
        let mut result_dir = ret_path.join(&stamp);
        let mut n = 1;
        while result_dir.exists() {
            result_dir = ret_path.join(format!("{}.{}", stamp, n));
            n += 1;
        }
        for sub in ["testcases", "result", "logs"] {
            fs::create_dir_all(result_dir.join(sub))?;
        }
        Ok(Self {
            result_dir,
            env: None,
            records: Vec::new(),
        })
    }

    pub fn result_dir(&self) -> &Path {
        &self.result_dir
    }

    pub fn records(&self) -> &[Value] {
        &self.records
    }
}

/// File stem for a record. Path separators and NULs become `_`, so case
/// names derived from paths such as `/proc/sys/vm/swappiness` stay inside
/// the result directory.
fn record_file_name(name: &str) -> Result<String> {
    let stem: String = name
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | '\0') { '_' } else { c })
        .collect();
    if stem.is_empty() || stem == "." || stem == ".." {
        return Err(anyhow!("invalid record name: {:?}", name));
    }
    Ok(stem)
}

fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("tmpfile");
    let tmp = path.with_file_name(format!(
        ".{}.tmp.{}.{}",
        name,
        std::process::id(),
        Utc::now().timestamp_micros()
    ));
    let mut file = fs::File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn atomic_write_json_pretty(path: &Path, value: &Value) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    atomic_write_bytes(path, &bytes)
}

impl ResultSink for JsonReport {
    fn save_env(&mut self, env: &Value) -> Result<()> {
        atomic_write_json_pretty(&self.result_dir.join("env.json"), env)?;
        self.env = Some(env.clone());
        Ok(())
    }

    fn save_result(&mut self, name: &str, tinf: &Value, data: &str) -> Result<()> {
        let stem = record_file_name(name)?;
        atomic_write_json_pretty(
            &self
                .result_dir
                .join("testcases")
                .join(format!("testcase-{}.json", stem)),
            tinf,
        )?;
        let raw_dir = self.result_dir.join("result");
        atomic_write_bytes(&raw_dir.join(&stem), data.as_bytes())?;
        let record = json!({
            "name": name,
            "tinf": tinf,
            "data": data,
            "recorded_at": Utc::now().to_rfc3339(),
        });
        atomic_write_json_pretty(&raw_dir.join(format!("{}.json", stem)), &record)?;
        debug!(record = name, file = %stem, dir = %raw_dir.display(), "result saved");
        self.records.push(record);
        Ok(())
    }

    fn export(&mut self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join("report.json");
        let report = json!({
            "schema_version": "tunebench_report_v1",
            "exported_at": Utc::now().to_rfc3339(),
            "result_dir": self.result_dir.display().to_string(),
            "env": self.env,
            "datas": self.records,
        });
        atomic_write_json_pretty(&path, &report)?;
        Ok(path)
    }
}
