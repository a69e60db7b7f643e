use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::sync::Arc;

use regex::{Captures, Regex};
use tracing::{debug, warn};

use crate::config::RunnerConfig;

/// Host facts the computed-value functions are allowed to look at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostFacts {
    pub cpu_count: usize,
    pub mem_total_bytes: u64,
    pub arch: String,
}

impl HostFacts {
    pub fn probe() -> Self {
        let cpu_count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let mem_total_bytes = fs::read_to_string("/proc/meminfo")
            .ok()
            .and_then(|raw| parse_mem_total(&raw))
            .unwrap_or(0);
        Self {
            cpu_count,
            mem_total_bytes,
            arch: std::env::consts::ARCH.to_string(),
        }
    }
}

fn parse_mem_total(meminfo: &str) -> Option<u64> {
    let line = meminfo.lines().find(|l| l.starts_with("MemTotal:"))?;
    let kib: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kib * 1024)
}

type Resolver = Arc<dyn Fn(&FuncContext<'_>, &str) -> Option<String> + Send + Sync>;

pub struct FuncContext<'a> {
    pub facts: &'a HostFacts,
    pub config: &'a RunnerConfig,
}

/// Fixed table of `FUNC_*` names to host-query resolvers.
#[derive(Clone)]
pub struct FuncRegistry {
    facts: HostFacts,
    config: RunnerConfig,
    resolvers: BTreeMap<String, Resolver>,
}

impl fmt::Debug for FuncRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FuncRegistry")
            .field("facts", &self.facts)
            .field("functions", &self.resolvers.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\{(FUNC_[A-Z0-9_]+)(?::([^{}]*))?\}").expect("static placeholder regex")
    })
}

impl FuncRegistry {
    pub fn empty(facts: HostFacts, config: RunnerConfig) -> Self {
        Self {
            facts,
            config,
            resolvers: BTreeMap::new(),
        }
    }

    pub fn with_builtins(facts: HostFacts, config: RunnerConfig) -> Self {
        Self::empty(facts, config)
            .register("FUNC_THREAD_NUM", thread_num)
            .register("FUNC_IOZONE_MEMSIZE", iozone_memsize)
            .register("FUNC_IOZONE_FILE", iozone_file)
            .register("FUNC_JVM_MXMEM", jvm_mxmem)
            .register("FUNC_CPU2006_CONFIG", |ctx, _| speccpu_config(ctx, "speccpu2006", "cpu2006"))
            .register("FUNC_CPU2017_CONFIG", |ctx, _| speccpu_config(ctx, "speccpu2017", "cpu2017"))
    }

    pub fn register<F>(mut self, name: &str, resolver: F) -> Self
    where
        F: Fn(&FuncContext<'_>, &str) -> Option<String> + Send + Sync + 'static,
    {
        self.resolvers.insert(name.to_string(), Arc::new(resolver));
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.resolvers.keys().map(|k| k.as_str())
    }

    pub fn call(&self, name: &str, arg: &str) -> Option<String> {
        let resolver = self.resolvers.get(name)?;
        let ctx = FuncContext {
            facts: &self.facts,
            config: &self.config,
        };
        resolver(&ctx, arg)
    }

    /// Substitutes every `{FUNC_NAME}` / `{FUNC_NAME:arg}` in `command`.
    ///
    /// A resolver yielding nothing falls back to the argument text;
    /// unknown names are left verbatim.
    pub fn render(&self, command: &str) -> String {
        placeholder_pattern()
            .replace_all(command, |caps: &Captures<'_>| {
                let name = &caps[1];
                let arg = caps.get(2).map(|m| m.as_str()).unwrap_or("");
                if !self.resolvers.contains_key(name) {
                    warn!(function = name, "unknown function in command, left as is");
                    return caps[0].to_string();
                }
                let value = self.call(name, arg).unwrap_or_else(|| arg.to_string());
                debug!(function = name, arg, value = %value, "resolved function");
                value
            })
            .into_owned()
    }
}

fn thread_num(ctx: &FuncContext<'_>, arg: &str) -> Option<String> {
    match arg {
        "single" => Some("1".to_string()),
        "multi" => Some(ctx.facts.cpu_count.to_string()),
        _ => None,
    }
}

fn iozone_memsize(ctx: &FuncContext<'_>, arg: &str) -> Option<String> {
    match arg {
        "half" | "full" | "double" => ctx.config.get_str(&format!("/iozone/memsize/{}", arg)),
        _ => None,
    }
}

fn iozone_file(ctx: &FuncContext<'_>, arg: &str) -> Option<String> {
    if !arg.is_empty() {
        return None;
    }
    ctx.config.get_str("/iozone/test_file")
}

fn jvm_mxmem(ctx: &FuncContext<'_>, _arg: &str) -> Option<String> {
    if let Some(configured) = ctx.config.get_str("/specjvm/mx_mem") {
        return Some(configured);
    }
    let mib = ctx.facts.mem_total_bytes / (1024 * 1024);
    let two_thirds = mib * 2 / 3;
    (two_thirds > 0).then(|| format!("{}m", two_thirds))
}

fn speccpu_config(ctx: &FuncContext<'_>, section: &str, stem: &str) -> Option<String> {
    let (arch_key, fallback) = match ctx.facts.arch.as_str() {
        "x86_64" => (Some("config_file_x86"), Some(format!("{}-x86-fix.cfg", stem))),
        "aarch64" => (Some("config_file_arm"), Some(format!("{}-arm64-fix.cfg", stem))),
        _ => (None, None),
    };
    arch_key
        .and_then(|key| ctx.config.get_str(&format!("/{}/{}", section, key)))
        .or_else(|| ctx.config.get_str(&format!("/{}/config_file", section)))
        .or(fallback)
}
