use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

pub const DEFAULT_CONFIG_PATHS: &[&str] = &["/etc/tunebench/tunebench.yaml", "./conf/tunebench.yaml"];

/// Process-wide runner configuration.
///
/// Loaded once from YAML, layered with caller overrides, then shared
/// read-only with the parser and the engine. Values are addressed with
/// JSON pointers (`/main/base_path`).
#[derive(Debug, Clone, Default)]
pub struct RunnerConfig {
    data: Value,
    source: Option<PathBuf>,
}

impl RunnerConfig {
    pub fn empty() -> Self {
        Self {
            data: json!({}),
            source: None,
        }
    }

    pub fn from_value(data: Value) -> Self {
        Self { data, source: None }
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let yaml_value: serde_yaml::Value = serde_yaml::from_str(raw)?;
        let data: Value = serde_json::to_value(yaml_value)?;
        if !data.is_object() {
            return Err(anyhow!("runner config must be a mapping"));
        }
        Ok(Self::from_value(data))
    }

    /// Loads the first readable, non-empty document from `extra` followed
    /// by the default search paths. Nothing found yields an empty config.
    pub fn load(extra: Option<&Path>) -> Result<Self> {
        let mut candidates: Vec<PathBuf> = Vec::new();
        if let Some(p) = extra {
            if !p.exists() {
                return Err(anyhow!("config file not found: {}", p.display()));
            }
            candidates.push(p.to_path_buf());
        }
        candidates.extend(DEFAULT_CONFIG_PATHS.iter().map(PathBuf::from));
        for path in candidates {
            if !path.exists() {
                continue;
            }
            let raw = fs::read_to_string(&path)?;
            if raw.trim().is_empty() {
                warn!(path = %path.display(), "config file is empty, skipping");
                continue;
            }
            let mut config = Self::from_yaml_str(&raw)
                .map_err(|e| anyhow!("invalid config {}: {}", path.display(), e))?;
            debug!(path = %path.display(), "loaded runner config");
            config.source = Some(path);
            return Ok(config);
        }
        Ok(Self::empty())
    }

    /// Returns a copy with `value` written at `pointer`, creating
    /// intermediate mappings as needed.
    pub fn with_override(mut self, pointer: &str, value: Value) -> Self {
        let tokens: Vec<&str> = pointer.trim_start_matches('/').split('/').collect();
        let mut cur = &mut self.data;
        for (idx, token) in tokens.iter().enumerate() {
            if !cur.is_object() {
                *cur = Value::Object(Map::new());
            }
            let Some(map) = cur.as_object_mut() else {
                break;
            };
            if idx + 1 == tokens.len() {
                map.insert(token.to_string(), value);
                break;
            }
            cur = map
                .entry(token.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
        }
        self
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn get(&self, pointer: &str) -> Option<&Value> {
        self.data.pointer(pointer)
    }

    /// String value at `pointer`; numbers are rendered, empty strings are `None`.
    pub fn get_str(&self, pointer: &str) -> Option<String> {
        match self.get(pointer)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn main(&self, key: &str) -> Option<String> {
        self.get_str(&format!("/main/{}", key))
    }

    pub fn base_path(&self) -> Option<String> {
        self.main("base_path")
    }

    pub fn run_path(&self) -> Option<String> {
        self.main("run_path")
    }

    pub fn ret_path(&self) -> Option<String> {
        self.main("ret_path")
    }

    pub fn src_path(&self) -> Option<String> {
        self.main("src_path")
    }

    pub fn report_path(&self) -> Option<String> {
        self.main("report_path")
    }

    pub fn log_level(&self) -> Option<String> {
        self.main("log_level")
    }

    pub fn log_file(&self) -> Option<String> {
        self.main("log_file")
    }

    pub fn settle_seconds(&self) -> Option<u64> {
        self.get("/main/settle_seconds").and_then(|v| v.as_u64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_main_section_values() {
        let config = RunnerConfig::from_yaml_str(
            "main:\n  base_path: /opt/tune\n  settle_seconds: 3\niozone:\n  memsize:\n    half: 4g\n",
        )
        .expect("parse");
        assert_eq!(config.base_path().as_deref(), Some("/opt/tune"));
        assert_eq!(config.settle_seconds(), Some(3));
        assert_eq!(
            config.get_str("/iozone/memsize/half").as_deref(),
            Some("4g")
        );
        assert!(config.report_path().is_none());
    }

    #[test]
    fn overrides_win_and_create_sections() {
        let config = RunnerConfig::from_yaml_str("main:\n  report_path: /a\n")
            .expect("parse")
            .with_override("/main/report_path", json!("/b"))
            .with_override("/extra/deep/key", json!(1));
        assert_eq!(config.report_path().as_deref(), Some("/b"));
        assert_eq!(config.get("/extra/deep/key"), Some(&json!(1)));
    }

    #[test]
    fn load_prefers_explicit_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("tunebench.yaml");
        fs::write(&path, "main:\n  base_path: /explicit\n").expect("write");
        let config = RunnerConfig::load(Some(&path)).expect("load");
        assert_eq!(config.base_path().as_deref(), Some("/explicit"));
        assert_eq!(config.source(), Some(path.as_path()));
    }

    #[test]
    fn load_rejects_missing_explicit_path() {
        let err = RunnerConfig::load(Some(Path::new("/nonexistent/tunebench.yaml")))
            .expect_err("missing file");
        assert!(err.to_string().contains("not found"), "{}", err);
    }

    #[test]
    fn non_mapping_document_is_rejected() {
        assert!(RunnerConfig::from_yaml_str("- a\n- b\n").is_err());
    }
}
