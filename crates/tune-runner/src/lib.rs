//! Tuning benchmark scheme engine.
//!
//! A scheme (YAML plan) names a benchmark, global kernel/system knobs and
//! a set of test cases generated from parameter candidates. The engine
//! applies each case's knobs, runs the benchmark, records the result and
//! restores the captured baselines, isolating per-case failures.

pub mod adapter;
pub mod batch;
pub mod case;
pub mod config;
pub mod deps;
pub mod engine;
pub mod env;
pub mod error;
pub mod exec;
pub mod funcs;
pub mod matrix;
pub mod param;
pub mod parser;
pub mod report;
pub mod scheme;

pub use adapter::{ResultAdapter, TestKind};
pub use batch::{BatchOptions, PlanReport, SchemeBatch};
pub use case::TestCase;
pub use config::RunnerConfig;
pub use engine::{CaseFailure, Outcome, RunSummary, SchemeRunner};
pub use error::{CaseError, ConfigError, ExecError, PlanError, PlanParseError, SchemeError};
pub use exec::{CommandOutput, Shell};
pub use funcs::{FuncRegistry, HostFacts};
pub use matrix::{CaseTemplate, ParamAxes, Strategy};
pub use param::TestConfig;
pub use parser::SchemeParser;
pub use scheme::Scheme;
