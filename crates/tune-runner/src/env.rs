use std::fs;

use anyhow::Result;
use chrono::Utc;
use serde_json::{json, Map, Value};

use crate::exec::Shell;
use crate::funcs::HostFacts;

/// Gathers host facts recorded alongside benchmark results.
pub trait EnvCollector: Send {
    fn collect(&self) -> Result<Value>;
}

#[derive(Debug, Clone)]
pub struct HostEnvCollector {
    facts: HostFacts,
    shell: Shell,
}

impl HostEnvCollector {
    pub fn new(facts: HostFacts, shell: Shell) -> Self {
        Self { facts, shell }
    }
}

impl EnvCollector for HostEnvCollector {
    fn collect(&self) -> Result<Value> {
        let uname = self.shell.run("uname -a")?;
        let os_release = fs::read_to_string("/etc/os-release")
            .map(|raw| parse_os_release(&raw))
            .unwrap_or_default();
        let cmdline = fs::read_to_string("/proc/cmdline").unwrap_or_default();
        Ok(json!({
            "envinfo": {
                "collected_at": Utc::now().to_rfc3339(),
                "hwinfo": {
                    "arch": self.facts.arch,
                    "cpu_count": self.facts.cpu_count,
                    "mem_total_bytes": self.facts.mem_total_bytes,
                },
                "swinfo": {
                    "uname": uname.stdout.trim(),
                    "os_release": os_release,
                    "kernel_cmdline": cmdline.trim(),
                }
            }
        }))
    }
}

fn parse_os_release(raw: &str) -> Map<String, Value> {
    raw.lines()
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), json!(v.trim().trim_matches('"'))))
        .collect()
}
