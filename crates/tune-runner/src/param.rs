use serde_json::{json, Value};
use tracing::{debug, info};

use crate::error::ConfigError;
use crate::exec::{CommandOutput, Shell};

pub const VALUE_PLACEHOLDER: &str = "{value}";

/// One tunable system value with save/apply/restore semantics.
///
/// The setup command is fixed at construction. The restore command only
/// exists after a successful [`TestConfig::save`].
#[derive(Debug, Clone, PartialEq)]
pub struct TestConfig {
    name: String,
    desc: String,
    get_cmd: String,
    set_cmd: String,
    value: String,
    setup_cmd: String,
    baseline: Option<String>,
    restore_cmd: Option<String>,
}

impl TestConfig {
    pub fn new(
        name: impl Into<String>,
        desc: impl Into<String>,
        get_cmd: impl Into<String>,
        set_cmd: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        let set_cmd = set_cmd.into();
        let value = value.into();
        let setup_cmd = set_cmd.replace(VALUE_PLACEHOLDER, &value);
        Self {
            name: name.into(),
            desc: desc.into(),
            get_cmd: get_cmd.into(),
            set_cmd,
            value,
            setup_cmd,
            baseline: None,
            restore_cmd: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn desc(&self) -> &str {
        &self.desc
    }

    pub fn get_command(&self) -> &str {
        &self.get_cmd
    }

    pub fn set_command(&self) -> &str {
        &self.set_cmd
    }

    pub fn target_value(&self) -> &str {
        &self.value
    }

    pub fn setup_command(&self) -> &str {
        &self.setup_cmd
    }

    pub fn captured_baseline(&self) -> Option<&str> {
        self.baseline.as_deref()
    }

    pub fn restore_command(&self) -> Option<&str> {
        self.restore_cmd.as_deref()
    }

    /// Captures the current system value through the get command.
    ///
    /// Any previously captured baseline is discarded first, so a failed
    /// save always leaves [`TestConfig::reset`] as a no-op.
    pub fn save(&mut self, shell: &Shell) -> Result<(), ConfigError> {
        self.baseline = None;
        self.restore_cmd = None;
        if self.get_cmd.trim().is_empty() {
            debug!(config = %self.name, "no get command, baseline not captured");
            return Ok(());
        }
        let out = self.exec(&shell.clean(), &self.get_cmd)?;
        let captured = out.stdout.trim();
        if captured.is_empty() {
            return Err(ConfigError::EmptyOutput {
                name: self.name.clone(),
                command: self.get_cmd.clone(),
            });
        }
        self.restore_cmd = Some(self.set_cmd.replace(VALUE_PLACEHOLDER, captured));
        self.baseline = Some(captured.to_string());
        debug!(config = %self.name, baseline = captured, "baseline captured");
        Ok(())
    }

    pub fn setup(&self, shell: &Shell) -> Result<(), ConfigError> {
        if self.setup_cmd.trim().is_empty() {
            return Ok(());
        }
        info!(config = %self.name, value = %self.value, "applying config");
        self.exec(shell, &self.setup_cmd).map(|_| ())
    }

    pub fn reset(&self, shell: &Shell) -> Result<(), ConfigError> {
        let Some(restore) = &self.restore_cmd else {
            debug!(config = %self.name, "no baseline captured, reset skipped");
            return Ok(());
        };
        info!(
            config = %self.name,
            value = self.baseline.as_deref().unwrap_or_default(),
            "restoring config"
        );
        self.exec(shell, restore).map(|_| ())
    }

    fn exec(&self, shell: &Shell, command: &str) -> Result<CommandOutput, ConfigError> {
        let out = shell.run(command).map_err(|source| ConfigError::Exec {
            name: self.name.clone(),
            source,
        })?;
        match out.code {
            Some(0) => Ok(out),
            Some(code) => Err(ConfigError::CommandFailed {
                name: self.name.clone(),
                command: command.to_string(),
                code,
                stderr: out.stderr.trim().to_string(),
            }),
            None => Err(ConfigError::Killed {
                name: self.name.clone(),
                command: command.to_string(),
            }),
        }
    }

    pub fn to_data(&self) -> Value {
        json!({
            "name": self.name,
            "desc": self.desc,
            "get": self.get_cmd,
            "set": self.set_cmd,
            "value": self.value,
            "setup": self.setup_cmd,
            "baseline": self.baseline,
            "restore": self.restore_cmd,
        })
    }
}
