use serde_json::{json, Value};
use tracing::info;

use crate::error::CaseError;
use crate::exec::{CommandOutput, Shell};
use crate::funcs::FuncRegistry;
use crate::param::TestConfig;

/// A named unit of work: clean/build/run commands plus the parameter
/// handles applied together for it.
#[derive(Debug, Clone, PartialEq)]
pub struct TestCase {
    pub name: String,
    pub clean_cmd: String,
    pub build_cmd: String,
    pub run_cmd: String,
    pub configs: Vec<TestConfig>,
}

impl TestCase {
    pub fn new(
        name: impl Into<String>,
        clean_cmd: impl Into<String>,
        build_cmd: impl Into<String>,
        run_cmd: impl Into<String>,
        configs: Vec<TestConfig>,
    ) -> Self {
        Self {
            name: name.into(),
            clean_cmd: clean_cmd.into(),
            build_cmd: build_cmd.into(),
            run_cmd: run_cmd.into(),
            configs,
        }
    }

    pub fn build(&self, shell: &Shell) -> Result<(), CaseError> {
        self.exec(shell, "build", &self.build_cmd).map(|_| ())
    }

    pub fn clean(&self, shell: &Shell) -> Result<(), CaseError> {
        self.exec(shell, "clean", &self.clean_cmd).map(|_| ())
    }

    /// Resolves computed functions in the run command, dispatches it and
    /// returns captured stdout.
    pub fn run(&self, shell: &Shell, funcs: &FuncRegistry) -> Result<String, CaseError> {
        let command = funcs.render(&self.run_cmd);
        let out = self.exec(shell, "run", &command)?;
        Ok(out.map(|o| o.stdout).unwrap_or_default())
    }

    pub fn save_config(&mut self, shell: &Shell) -> Result<(), CaseError> {
        for cfg in self.configs.iter_mut() {
            cfg.save(shell).map_err(|source| CaseError::Config {
                case: self.name.clone(),
                source,
            })?;
        }
        Ok(())
    }

    pub fn setup_config(&self, shell: &Shell) -> Result<(), CaseError> {
        for cfg in &self.configs {
            cfg.setup(shell).map_err(|source| self.config_error(source))?;
        }
        Ok(())
    }

    pub fn reset_config(&self, shell: &Shell) -> Result<(), CaseError> {
        for cfg in &self.configs {
            cfg.reset(shell).map_err(|source| self.config_error(source))?;
        }
        Ok(())
    }

    fn config_error(&self, source: crate::error::ConfigError) -> CaseError {
        CaseError::Config {
            case: self.name.clone(),
            source,
        }
    }

    fn exec(
        &self,
        shell: &Shell,
        phase: &'static str,
        command: &str,
    ) -> Result<Option<CommandOutput>, CaseError> {
        if command.trim().is_empty() {
            return Ok(None);
        }
        info!(case = %self.name, phase, command, "running");
        let out = shell.run(command).map_err(|source| CaseError::Exec {
            case: self.name.clone(),
            phase,
            source,
        })?;
        if !out.success() {
            return Err(CaseError::CommandFailed {
                case: self.name.clone(),
                phase,
                command: command.to_string(),
                code: out.code,
                stderr: out.stderr.trim().to_string(),
            });
        }
        Ok(Some(out))
    }

    pub fn to_data(&self) -> Value {
        json!({
            "name": self.name,
            "clean": self.clean_cmd,
            "build": self.build_cmd,
            "run": self.run_cmd,
            "configs": self.configs.iter().map(|c| c.to_data()).collect::<Vec<_>>(),
        })
    }
}
