use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{json, Value};
use tracing::info;

use crate::adapter::TestKind;
use crate::case::TestCase;
use crate::error::SchemeError;
use crate::exec::Shell;
use crate::param::TestConfig;

/// A parsed, fully path-resolved test plan.
#[derive(Debug, Clone)]
pub struct Scheme {
    pub project: String,
    pub test_type: TestKind,
    pub base_path: PathBuf,
    /// Raw benchmark output is backed up here.
    pub run_path: PathBuf,
    /// Processed per-iteration records are written here.
    pub ret_path: PathBuf,
    /// Tool archives live here.
    pub src_path: PathBuf,
    pub tool_tgz: PathBuf,
    pub tool_dir: PathBuf,
    pub tool_decompression: String,
    pub log_level: Option<String>,
    pub log_file: Option<PathBuf>,
    pub rpm_list: Vec<String>,
    pub configs: Vec<TestConfig>,
    pub max_iterations: usize,
    pub testcases: Vec<TestCase>,
    /// sha256 of the canonical JSON of the source document.
    pub digest: String,
}

impl Scheme {
    /// Creates the plan directories and unpacks the tool archive when the
    /// tool directory is missing. Returns the tool directory, which every
    /// later child process uses as its working directory.
    pub fn prepare(&self, shell: &Shell) -> Result<PathBuf, SchemeError> {
        for dir in [&self.base_path, &self.run_path, &self.ret_path, &self.src_path] {
            ensure_dir(dir)?;
        }
        if !self.tool_dir.exists() {
            info!(
                project = %self.project,
                archive = %self.tool_tgz.display(),
                "decompressing benchmark tool"
            );
            let out = shell
                .clone()
                .with_cwd(&self.src_path)
                .run(&self.tool_decompression)?;
            if !out.success() {
                return Err(SchemeError::Decompress {
                    command: self.tool_decompression.clone(),
                    code: out.code,
                    stderr: out.stderr.trim().to_string(),
                });
            }
        }
        if !self.tool_dir.is_dir() {
            return Err(SchemeError::MissingToolDir(self.tool_dir.clone()));
        }
        Ok(self.tool_dir.clone())
    }

    pub fn case_names(&self) -> impl Iterator<Item = &str> {
        self.testcases.iter().map(|c| c.name.as_str())
    }

    /// Plan identity used in every exported record.
    pub fn to_data(&self) -> Value {
        json!({
            "project": self.project,
            "test_type": self.test_type.as_str(),
            "base_path": self.base_path.display().to_string(),
            "run_path": self.run_path.display().to_string(),
            "ret_path": self.ret_path.display().to_string(),
            "src_path": self.src_path.display().to_string(),
            "tool_tgz": self.tool_tgz.display().to_string(),
            "tool_dir": self.tool_dir.display().to_string(),
            "rpm_list": self.rpm_list,
            "maxiterations": self.max_iterations,
            "configs": self.configs.iter().map(|c| c.to_data()).collect::<Vec<_>>(),
            "testcase_count": self.testcases.len(),
            "digest": self.digest,
        })
    }
}

pub(crate) fn ensure_dir(path: &Path) -> Result<(), SchemeError> {
    fs::create_dir_all(path).map_err(|source| SchemeError::CreateDir {
        path: path.to_path_buf(),
        source,
    })
}
