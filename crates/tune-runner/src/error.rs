use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failure to obtain any exit status from a child process.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{command}` timed out after {after:?}")]
    Timeout { command: String, after: Duration },
    #[error("i/o error while waiting on `{command}`: {source}")]
    Wait {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

/// A parameter handle's get/set command failed.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config '{name}': `{command}` exited with code {code}: {stderr}")]
    CommandFailed {
        name: String,
        command: String,
        code: i32,
        stderr: String,
    },
    #[error("config '{name}': `{command}` was killed by a signal")]
    Killed { name: String, command: String },
    #[error("config '{name}': `{command}` produced no output")]
    EmptyOutput { name: String, command: String },
    #[error("config '{name}': {source}")]
    Exec {
        name: String,
        #[source]
        source: ExecError,
    },
}

impl ConfigError {
    /// Exit code of the failing command, when the process produced one.
    pub fn code(&self) -> Option<i32> {
        match self {
            ConfigError::CommandFailed { code, .. } => Some(*code),
            ConfigError::EmptyOutput { .. } => Some(0),
            ConfigError::Killed { .. } | ConfigError::Exec { .. } => None,
        }
    }
}

/// Failure isolated to a single test case.
#[derive(Debug, Error)]
pub enum CaseError {
    #[error("case '{case}': {phase} `{command}` exited with code {code:?}: {stderr}")]
    CommandFailed {
        case: String,
        phase: &'static str,
        command: String,
        code: Option<i32>,
        stderr: String,
    },
    #[error("case '{case}': {phase} failed: {source}")]
    Exec {
        case: String,
        phase: &'static str,
        #[source]
        source: ExecError,
    },
    #[error("case '{case}': {source}")]
    Config {
        case: String,
        #[source]
        source: ConfigError,
    },
    #[error("case '{case}': {message}")]
    Other { case: String, message: String },
}

impl CaseError {
    pub fn case(&self) -> &str {
        match self {
            CaseError::CommandFailed { case, .. }
            | CaseError::Exec { case, .. }
            | CaseError::Config { case, .. }
            | CaseError::Other { case, .. } => case,
        }
    }
}

/// Plan-level runtime failure; aborts the plan it belongs to.
#[derive(Debug, Error)]
pub enum SchemeError {
    #[error("cannot create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("decompressing tool with `{command}` failed (code {code:?}): {stderr}")]
    Decompress {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
    #[error("tool directory {0} does not exist after decompression")]
    MissingToolDir(PathBuf),
    #[error("scheme '{project}' has not been prepared")]
    NotPrepared { project: String },
    #[error("cannot create report under {path}: {message}")]
    Report { path: PathBuf, message: String },
    #[error(transparent)]
    Exec(#[from] ExecError),
}

/// Malformed or incomplete plan document. No cases are produced.
#[derive(Debug, Error)]
pub enum PlanParseError {
    #[error("cannot read scheme {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid scheme document: {0}")]
    Syntax(String),
    #[error("scheme is missing required field '{0}'")]
    MissingField(String),
    #[error("field '{field}' is invalid: {reason}")]
    InvalidField { field: String, reason: String },
    #[error("no test named '{0}'")]
    UnknownTestType(String),
    #[error("field '{field}' still contains an unresolved template: {value}")]
    UnresolvedTemplate { field: String, value: String },
    #[error("duplicate case name '{0}'")]
    DuplicateCase(String),
}

/// Anything that stops a whole plan.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error(transparent)]
    Parse(#[from] PlanParseError),
    #[error(transparent)]
    Scheme(#[from] SchemeError),
}

impl From<serde_yaml::Error> for PlanParseError {
    fn from(err: serde_yaml::Error) -> Self {
        PlanParseError::Syntax(err.to_string())
    }
}

impl From<serde_json::Error> for PlanParseError {
    fn from(err: serde_json::Error) -> Self {
        PlanParseError::Syntax(err.to_string())
    }
}
