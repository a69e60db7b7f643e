use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::adapter::TestKind;
use crate::case::TestCase;
use crate::config::RunnerConfig;
use crate::error::PlanParseError;
use crate::matrix::{self, CaseTemplate, ParamAxes, Strategy};
use crate::param::TestConfig;
use crate::scheme::Scheme;

const DEFAULT_RUN_PATH: &str = "{base_path}/run";
const DEFAULT_RET_PATH: &str = "{base_path}/results";
const DEFAULT_SRC_PATH: &str = "{base_path}/src";

/// Upper bound on the candidates one continuous range may expand to.
pub const MAX_RANGE_CANDIDATES: usize = 10_000;

type ParseResult<T> = Result<T, PlanParseError>;

/// Turns a plan document into a [`Scheme`], generating its case matrix.
pub struct SchemeParser<'a> {
    config: &'a RunnerConfig,
}

impl<'a> SchemeParser<'a> {
    pub fn new(config: &'a RunnerConfig) -> Self {
        Self { config }
    }

    pub fn parse_file(&self, path: &Path) -> ParseResult<Scheme> {
        let raw = fs::read_to_string(path).map_err(|source| PlanParseError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        self.parse_str(&raw)
    }

    pub fn parse_str(&self, raw: &str) -> ParseResult<Scheme> {
        let yaml_value: serde_yaml::Value = serde_yaml::from_str(raw)?;
        let json_value: Value = serde_json::to_value(yaml_value)?;
        self.parse_value(&json_value)
    }

    pub fn parse_value(&self, doc: &Value) -> ParseResult<Scheme> {
        if !doc.is_object() {
            return Err(PlanParseError::Syntax(
                "scheme document must be a mapping".to_string(),
            ));
        }
        let project = required_str(doc, "project")?;
        let test_type: TestKind = required_str(doc, "test_type")?.parse()?;

        let mut vars: Vec<(&str, String)> = vec![("project", project.clone())];
        let base_path = optional_str(doc, "base_path")?
            .or_else(|| self.config.base_path())
            .ok_or_else(|| PlanParseError::MissingField("base_path".to_string()))?;
        let base_path = resolve_path("base_path", &base_path, &vars)?;
        vars.push(("base_path", base_path.clone()));

        let run_path = self.derived_path(doc, "run_path", self.config.run_path(), DEFAULT_RUN_PATH, &vars)?;
        vars.push(("run_path", run_path.clone()));
        let ret_path = self.derived_path(doc, "ret_path", self.config.ret_path(), DEFAULT_RET_PATH, &vars)?;
        vars.push(("ret_path", ret_path.clone()));
        let src_path = self.derived_path(doc, "src_path", self.config.src_path(), DEFAULT_SRC_PATH, &vars)?;
        vars.push(("src_path", src_path.clone()));

        let tool_tgz = resolve_path("tool_tgz", &required_str(doc, "tool_tgz")?, &vars)?;
        vars.push(("tool_tgz", tool_tgz.clone()));
        let tool_dir = resolve_path("tool_dir", &required_str(doc, "tool_dir")?, &vars)?;
        vars.push(("tool_dir", tool_dir.clone()));
        let tool_decompression = substitute(&required_str(doc, "tool_decompression")?, &vars);

        let log_level = optional_str(doc, "log_level")?;
        let log_file = match optional_str(doc, "log_file")? {
            Some(raw) => Some(PathBuf::from(resolve_path("log_file", &raw, &vars)?)),
            None => None,
        };
        let rpm_list = parse_rpm_list(doc.get("rpm_list"))?;
        let max_iterations = parse_max_iterations(doc.get("maxiterations"))?;

        let configs = match doc.get("configs") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .enumerate()
                .map(|(idx, item)| parse_global_config(&format!("configs[{}]", idx), item))
                .collect::<ParseResult<Vec<_>>>()?,
            Some(_) => return Err(invalid("configs", "expected a list")),
        };

        let templates: Vec<&Value> = match doc.get("testcase") {
            None | Some(Value::Null) => {
                return Err(PlanParseError::MissingField("testcase".to_string()))
            }
            Some(Value::Array(items)) => items.iter().collect(),
            Some(item @ Value::Object(_)) => vec![item],
            Some(_) => return Err(invalid("testcase", "expected a mapping or a list")),
        };
        let mut testcases = Vec::new();
        for (idx, template) in templates.iter().enumerate() {
            let field = format!("testcase[{}]", idx);
            testcases.extend(parse_testcase(&field, &project, template)?);
        }
        let mut seen = BTreeSet::new();
        for case in &testcases {
            if !seen.insert(case.name.as_str()) {
                return Err(PlanParseError::DuplicateCase(case.name.clone()));
            }
        }
        debug!(project = %project, cases = testcases.len(), "scheme parsed");

        Ok(Scheme {
            project,
            test_type,
            base_path: PathBuf::from(base_path),
            run_path: PathBuf::from(run_path),
            ret_path: PathBuf::from(ret_path),
            src_path: PathBuf::from(src_path),
            tool_tgz: PathBuf::from(tool_tgz),
            tool_dir: PathBuf::from(tool_dir),
            tool_decompression,
            log_level,
            log_file,
            rpm_list,
            configs,
            max_iterations,
            testcases,
            digest: canonical_digest(doc),
        })
    }

    fn derived_path(
        &self,
        doc: &Value,
        field: &str,
        from_config: Option<String>,
        default: &str,
        vars: &[(&str, String)],
    ) -> ParseResult<String> {
        let raw = optional_str(doc, field)?
            .or(from_config)
            .unwrap_or_else(|| default.to_string());
        resolve_path(field, &raw, vars)
    }
}

pub fn canonical_digest(value: &Value) -> String {
    let bytes = serde_json::to_vec(value).unwrap_or_default();
    format!("sha256:{}", hex::encode(Sha256::digest(&bytes)))
}

fn template_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\{[a-z_]+\}").expect("static template regex"))
}

fn substitute(raw: &str, vars: &[(&str, String)]) -> String {
    let mut out = raw.to_string();
    for (key, value) in vars {
        out = out.replace(&format!("{{{}}}", key), value);
    }
    out
}

fn resolve_path(field: &str, raw: &str, vars: &[(&str, String)]) -> ParseResult<String> {
    let resolved = substitute(raw, vars);
    if template_pattern().is_match(&resolved) {
        return Err(PlanParseError::UnresolvedTemplate {
            field: field.to_string(),
            value: resolved,
        });
    }
    Ok(resolved)
}

fn invalid(field: &str, reason: &str) -> PlanParseError {
    PlanParseError::InvalidField {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

fn scalar_to_string(field: &str, value: &Value) -> ParseResult<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        _ => Err(invalid(field, "expected a scalar value")),
    }
}

fn optional_str(doc: &Value, key: &str) -> ParseResult<Option<String>> {
    match doc.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => {
            let s = scalar_to_string(key, v)?;
            Ok((!s.trim().is_empty()).then_some(s))
        }
    }
}

fn required_str(doc: &Value, key: &str) -> ParseResult<String> {
    optional_str(doc, key)?.ok_or_else(|| PlanParseError::MissingField(key.to_string()))
}

fn field_str(value: &Value, parent: &str, key: &str) -> ParseResult<String> {
    let field = format!("{}.{}", parent, key);
    match value.get(key) {
        None | Some(Value::Null) => Ok(String::new()),
        Some(v) => scalar_to_string(&field, v),
    }
}

fn required_field_str(value: &Value, parent: &str, key: &str) -> ParseResult<String> {
    let s = field_str(value, parent, key)?;
    if s.trim().is_empty() {
        return Err(PlanParseError::MissingField(format!("{}.{}", parent, key)));
    }
    Ok(s)
}

fn parse_rpm_list(value: Option<&Value>) -> ParseResult<Vec<String>> {
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::String(s)) => Ok(s.split_whitespace().map(str::to_string).collect()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| scalar_to_string("rpm_list", v))
            .filter(|r| r.as_ref().map(|s| !s.trim().is_empty()).unwrap_or(true))
            .collect(),
        Some(_) => Err(invalid("rpm_list", "expected a list of package names")),
    }
}

fn parse_max_iterations(value: Option<&Value>) -> ParseResult<usize> {
    let n = match value {
        None | Some(Value::Null) => return Ok(1),
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.trim().parse::<u64>().ok(),
        Some(_) => None,
    };
    match n {
        Some(n) if n >= 1 => Ok(n as usize),
        _ => Err(invalid("maxiterations", "expected an integer >= 1")),
    }
}

fn parse_global_config(field: &str, spec: &Value) -> ParseResult<TestConfig> {
    if !spec.is_object() {
        return Err(invalid(field, "expected a mapping"));
    }
    let name = required_field_str(spec, field, "name")?;
    let set = required_field_str(spec, field, "set")?;
    let value = match spec.get("value") {
        Some(v) if !v.is_null() => scalar_to_string(&format!("{}.value", field), v)?,
        _ => match spec.get("values").and_then(|v| v.as_array()) {
            Some(values) if values.len() == 1 => {
                scalar_to_string(&format!("{}.values", field), &values[0])?
            }
            _ => return Err(PlanParseError::MissingField(format!("{}.value", field))),
        },
    };
    Ok(TestConfig::new(
        name,
        field_str(spec, field, "desc")?,
        field_str(spec, field, "get")?,
        set,
        value,
    ))
}

/// Candidate handles for one parameter spec, in document order.
fn parse_param_spec(field: &str, spec: &Value) -> ParseResult<(String, Vec<TestConfig>)> {
    if !spec.is_object() {
        return Err(invalid(field, "expected a mapping"));
    }
    let name = required_field_str(spec, field, "name")?;
    let desc = field_str(spec, field, "desc")?;
    let get = field_str(spec, field, "get")?;
    let set = required_field_str(spec, field, "set")?;
    let kind = field_str(spec, field, "type")?;
    let values_field = format!("{}.values", field);

    let values: Vec<String> = match kind.as_str() {
        "" | "discrete" => match spec.get("values") {
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| scalar_to_string(&values_field, v))
                .collect::<ParseResult<_>>()?,
            None | Some(Value::Null) => return Err(PlanParseError::MissingField(values_field)),
            Some(_) => return Err(invalid(&values_field, "expected a list")),
        },
        "continuous" => {
            let mut out = Vec::new();
            let has_range = !matches!(spec.get("values"), None | Some(Value::Null));
            let has_items = !matches!(spec.get("items"), None | Some(Value::Null));
            if !has_range && !has_items {
                return Err(PlanParseError::MissingField(values_field));
            }
            if has_range {
                let bounds = spec
                    .get("values")
                    .and_then(|v| v.as_array())
                    .ok_or_else(|| invalid(&values_field, "expected [start, stop] or [start, stop, step]"))?;
                out.extend(expand_range(&values_field, bounds)?.into_iter().map(|n| n.to_string()));
            }
            if has_items {
                let items_field = format!("{}.items", field);
                let items = spec
                    .get("items")
                    .and_then(|v| v.as_array())
                    .ok_or_else(|| invalid(&items_field, "expected a list"))?;
                for item in items {
                    out.push(scalar_to_string(&items_field, item)?);
                }
            }
            out
        }
        other => {
            return Err(invalid(
                &format!("{}.type", field),
                &format!("unknown parameter type '{}'", other),
            ))
        }
    };

    let candidates = values
        .into_iter()
        .map(|v| TestConfig::new(name.clone(), desc.clone(), get.clone(), set.clone(), v))
        .collect();
    Ok((name, candidates))
}

/// `range(start, stop[, step])`, end-exclusive, negative steps allowed.
fn expand_range(field: &str, bounds: &[Value]) -> ParseResult<Vec<i64>> {
    if !(2..=3).contains(&bounds.len()) {
        return Err(invalid(field, "range needs 2 or 3 integers"));
    }
    let mut nums = Vec::with_capacity(3);
    for b in bounds {
        let n = match b {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        };
        nums.push(n.ok_or_else(|| invalid(field, "range bounds must be integers"))?);
    }
    let (start, stop) = (nums[0], nums[1]);
    let step = nums.get(2).copied().unwrap_or(1);
    if step == 0 {
        return Err(invalid(field, "range step must not be zero"));
    }
    let span = i128::from(stop) - i128::from(start);
    let step_wide = i128::from(step);
    let count = if span.signum() == step_wide.signum() {
        (span + step_wide - step_wide.signum()) / step_wide
    } else {
        0
    };
    if count > MAX_RANGE_CANDIDATES as i128 {
        return Err(invalid(
            field,
            &format!("range yields {} values, at most {} allowed", count, MAX_RANGE_CANDIDATES),
        ));
    }
    let mut out = Vec::with_capacity(count as usize);
    let mut cur = Some(start);
    while let Some(n) = cur {
        if !((step > 0 && n < stop) || (step < 0 && n > stop)) {
            break;
        }
        out.push(n);
        cur = n.checked_add(step);
    }
    Ok(out)
}

fn parse_strategy(field: &str, value: Option<&Value>) -> ParseResult<Strategy> {
    let assemble = match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "" | "0" | "false" | "sum" => false,
            "1" | "true" | "assemble" => true,
            _ => return Err(invalid(field, "expected a boolean, 'sum' or 'assemble'")),
        },
        Some(_) => return Err(invalid(field, "expected a boolean")),
    };
    Ok(if assemble {
        Strategy::Assemble
    } else {
        Strategy::Sum
    })
}

fn parse_testcase(field: &str, project: &str, spec: &Value) -> ParseResult<Vec<TestCase>> {
    if !spec.is_object() {
        return Err(invalid(field, "expected a mapping"));
    }
    let subtest = field_str(spec, field, "name")?;
    let template = CaseTemplate {
        subtest: (!subtest.trim().is_empty()).then_some(subtest),
        clean_cmd: field_str(spec, field, "clean")?,
        build_cmd: field_str(spec, field, "build")?,
        run_cmd: field_str(spec, field, "run")?,
    };
    let strategy = parse_strategy(&format!("{}.schemeflag", field), spec.get("schemeflag"))?;

    let mut axes = ParamAxes::new();
    match spec.get("configs") {
        None | Some(Value::Null) => {}
        Some(Value::Array(items)) => {
            for (idx, item) in items.iter().enumerate() {
                let (name, candidates) =
                    parse_param_spec(&format!("{}.configs[{}]", field, idx), item)?;
                axes.insert(&name, candidates);
            }
        }
        Some(_) => return Err(invalid(&format!("{}.configs", field), "expected a list")),
    }
    Ok(matrix::generate(project, &template, &axes, strategy))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parser_config() -> RunnerConfig {
        RunnerConfig::from_value(json!({"main": {"base_path": "/opt/tune/{project}"}}))
    }

    fn base_doc() -> Value {
        json!({
            "project": "demo",
            "test_type": "unixbench",
            "tool_tgz": "{src_path}/unixbench.tgz",
            "tool_dir": "{run_path}/UnixBench",
            "tool_decompression": "tar -xzf {tool_tgz} -C {run_path}",
            "testcase": {
                "run": "./Run",
                "configs": [
                    {"name": "swappiness", "get": "sysctl -n vm.swappiness",
                     "set": "sysctl -w vm.swappiness={value}", "type": "discrete",
                     "values": [10, 60, 100]}
                ]
            }
        })
    }

    #[test]
    fn discrete_parameter_sum_scenario() {
        let config = parser_config();
        let scheme = SchemeParser::new(&config).parse_value(&base_doc()).expect("parse");
        let names: Vec<_> = scheme.case_names().collect();
        assert_eq!(
            names,
            vec!["demo-swappiness-0", "demo-swappiness-1", "demo-swappiness-2"]
        );
        let targets: Vec<_> = scheme
            .testcases
            .iter()
            .map(|c| c.configs[0].target_value().to_string())
            .collect();
        assert_eq!(targets, vec!["10", "60", "100"]);
        assert_eq!(scheme.max_iterations, 1);
    }

    #[test]
    fn paths_resolve_in_dependency_order() {
        let config = parser_config();
        let scheme = SchemeParser::new(&config).parse_value(&base_doc()).expect("parse");
        assert_eq!(scheme.base_path, PathBuf::from("/opt/tune/demo"));
        assert_eq!(scheme.run_path, PathBuf::from("/opt/tune/demo/run"));
        assert_eq!(scheme.ret_path, PathBuf::from("/opt/tune/demo/results"));
        assert_eq!(scheme.tool_tgz, PathBuf::from("/opt/tune/demo/src/unixbench.tgz"));
        assert_eq!(scheme.tool_dir, PathBuf::from("/opt/tune/demo/run/UnixBench"));
        assert_eq!(
            scheme.tool_decompression,
            "tar -xzf /opt/tune/demo/src/unixbench.tgz -C /opt/tune/demo/run"
        );
    }

    #[test]
    fn plan_base_path_overrides_config() {
        let config = parser_config();
        let mut doc = base_doc();
        doc["base_path"] = json!("/srv/bench");
        let scheme = SchemeParser::new(&config).parse_value(&doc).expect("parse");
        assert_eq!(scheme.base_path, PathBuf::from("/srv/bench"));
    }

    #[test]
    fn missing_required_field_is_named() {
        let config = parser_config();
        for field in ["project", "test_type", "tool_tgz", "tool_dir", "tool_decompression"] {
            let mut doc = base_doc();
            doc.as_object_mut().unwrap().remove(field);
            match SchemeParser::new(&config).parse_value(&doc) {
                Err(PlanParseError::MissingField(f)) => assert_eq!(f, field),
                other => panic!("expected missing {}, got {:?}", field, other.map(|s| s.project)),
            }
        }
    }

    #[test]
    fn missing_base_path_everywhere_fails() {
        let config = RunnerConfig::empty();
        let err = SchemeParser::new(&config)
            .parse_value(&base_doc())
            .expect_err("no base path");
        assert!(matches!(err, PlanParseError::MissingField(ref f) if f == "base_path"));
    }

    #[test]
    fn unresolved_path_template_is_rejected() {
        let config = parser_config();
        let mut doc = base_doc();
        doc["tool_dir"] = json!("{work_dir}/UnixBench");
        let err = SchemeParser::new(&config).parse_value(&doc).expect_err("bad template");
        assert!(matches!(err, PlanParseError::UnresolvedTemplate { .. }), "{}", err);
    }

    #[test]
    fn unknown_test_type_is_rejected() {
        let config = parser_config();
        let mut doc = base_doc();
        doc["test_type"] = json!("dhrystone");
        assert!(matches!(
            SchemeParser::new(&config).parse_value(&doc),
            Err(PlanParseError::UnknownTestType(_))
        ));
    }

    #[test]
    fn continuous_range_is_end_exclusive_and_items_append() {
        let config = parser_config();
        let mut doc = base_doc();
        doc["testcase"]["configs"] = json!([
            {"name": "dirty", "set": "echo {value}", "type": "continuous", "values": [0, 30, 10]}
        ]);
        let scheme = SchemeParser::new(&config).parse_value(&doc).expect("parse");
        let targets: Vec<_> = scheme
            .testcases
            .iter()
            .map(|c| c.configs[0].target_value().to_string())
            .collect();
        assert_eq!(targets, vec!["0", "10", "20"]);

        doc["testcase"]["configs"] = json!([
            {"name": "dirty", "set": "echo {value}", "type": "continuous",
             "values": [5, 0, -2], "items": [99]}
        ]);
        let scheme = SchemeParser::new(&config).parse_value(&doc).expect("parse");
        let targets: Vec<_> = scheme
            .testcases
            .iter()
            .map(|c| c.configs[0].target_value().to_string())
            .collect();
        assert_eq!(targets, vec!["5", "3", "1", "99"]);
    }

    #[test]
    fn zero_range_step_is_invalid() {
        let config = parser_config();
        let mut doc = base_doc();
        doc["testcase"]["configs"] = json!([
            {"name": "x", "set": "echo {value}", "type": "continuous", "values": [0, 3, 0]}
        ]);
        assert!(matches!(
            SchemeParser::new(&config).parse_value(&doc),
            Err(PlanParseError::InvalidField { .. })
        ));
    }

    #[test]
    fn range_near_integer_limit_stops_without_overflow() {
        let config = parser_config();
        let mut doc = base_doc();
        doc["testcase"]["configs"] = json!([
            {"name": "x", "set": "echo {value}", "type": "continuous",
             "values": [9223372036854775800i64, 9223372036854775807i64, 10]}
        ]);
        let scheme = SchemeParser::new(&config).parse_value(&doc).expect("parse");
        assert_eq!(scheme.testcases.len(), 1);
        assert_eq!(
            scheme.testcases[0].configs[0].target_value(),
            "9223372036854775800"
        );

        doc["testcase"]["configs"] = json!([
            {"name": "x", "set": "echo {value}", "type": "continuous",
             "values": [-9223372036854775800i64, i64::MIN, -5]}
        ]);
        let scheme = SchemeParser::new(&config).parse_value(&doc).expect("parse");
        assert_eq!(scheme.testcases.len(), 2);
    }

    #[test]
    fn oversized_range_is_rejected() {
        let config = parser_config();
        let mut doc = base_doc();
        doc["testcase"]["configs"] = json!([
            {"name": "x", "set": "echo {value}", "type": "continuous",
             "values": [0, 10000000000i64]}
        ]);
        let err = SchemeParser::new(&config).parse_value(&doc).expect_err("too many values");
        assert!(matches!(err, PlanParseError::InvalidField { .. }), "{}", err);
        assert!(err.to_string().contains("at most"), "{}", err);

        doc["testcase"]["configs"] = json!([
            {"name": "x", "set": "echo {value}", "type": "continuous",
             "values": [0, MAX_RANGE_CANDIDATES]}
        ]);
        let scheme = SchemeParser::new(&config).parse_value(&doc).expect("cap is inclusive");
        assert_eq!(scheme.testcases.len(), MAX_RANGE_CANDIDATES);
    }

    #[test]
    fn assemble_flag_builds_cartesian_product() {
        let config = parser_config();
        let mut doc = base_doc();
        doc["testcase"]["schemeflag"] = json!(1);
        doc["testcase"]["name"] = json!("mem");
        doc["testcase"]["configs"] = json!([
            {"name": "a", "set": "echo {value}", "values": ["x", "y"]},
            {"name": "b", "set": "echo {value}", "values": [1, 2, 3]}
        ]);
        let scheme = SchemeParser::new(&config).parse_value(&doc).expect("parse");
        assert_eq!(scheme.testcases.len(), 6);
        assert!(scheme.testcases.iter().all(|c| c.configs.len() == 2));
        assert_eq!(scheme.testcases[0].name, "demo-mem-assemble-0");
    }

    #[test]
    fn empty_candidate_list_is_a_valid_plan() {
        let config = parser_config();
        let mut doc = base_doc();
        doc["testcase"]["schemeflag"] = json!(true);
        doc["testcase"]["configs"] = json!([
            {"name": "a", "set": "echo {value}", "values": ["x"]},
            {"name": "b", "set": "echo {value}", "values": []}
        ]);
        let scheme = SchemeParser::new(&config).parse_value(&doc).expect("parse");
        assert!(scheme.testcases.is_empty());
    }

    #[test]
    fn optional_fields_default_and_parse() {
        let config = parser_config();
        let mut doc = base_doc();
        doc["maxiterations"] = json!(3);
        doc["rpm_list"] = json!(["gcc", "make"]);
        doc["log_level"] = json!("debug");
        doc["log_file"] = json!("{base_path}/demo.log");
        doc["configs"] = json!([
            {"name": "thp", "get": "cat /sys/kernel/mm/transparent_hugepage/enabled",
             "set": "echo {value} > /sys/kernel/mm/transparent_hugepage/enabled", "value": "never"}
        ]);
        let scheme = SchemeParser::new(&config).parse_value(&doc).expect("parse");
        assert_eq!(scheme.max_iterations, 3);
        assert_eq!(scheme.rpm_list, vec!["gcc", "make"]);
        assert_eq!(scheme.log_level.as_deref(), Some("debug"));
        assert_eq!(scheme.log_file, Some(PathBuf::from("/opt/tune/demo/demo.log")));
        assert_eq!(scheme.configs.len(), 1);
        assert_eq!(scheme.configs[0].target_value(), "never");
    }

    #[test]
    fn zero_iterations_is_invalid() {
        let config = parser_config();
        let mut doc = base_doc();
        doc["maxiterations"] = json!(0);
        assert!(SchemeParser::new(&config).parse_value(&doc).is_err());
    }

    #[test]
    fn duplicate_case_names_are_rejected() {
        let config = parser_config();
        let mut doc = base_doc();
        let tc = doc["testcase"].clone();
        doc["testcase"] = json!([tc.clone(), tc]);
        assert!(matches!(
            SchemeParser::new(&config).parse_value(&doc),
            Err(PlanParseError::DuplicateCase(_))
        ));
    }

    #[test]
    fn yaml_documents_parse_and_digest_is_stable() {
        let raw = r#"
project: demo
test_type: fio
base_path: /tmp/demo
tool_tgz: "{src_path}/fio.tgz"
tool_dir: "{run_path}/fio"
tool_decompression: "tar -xzf {tool_tgz}"
testcase:
  - name: seq
    run: ./run.sh
  - name: rand
    run: ./run.sh --rand
"#;
        let config = RunnerConfig::empty();
        let a = SchemeParser::new(&config).parse_str(raw).expect("parse");
        let b = SchemeParser::new(&config).parse_str(raw).expect("parse");
        assert_eq!(a.case_names().collect::<Vec<_>>(), vec!["demo-seq-0", "demo-rand-0"]);
        assert!(a.digest.starts_with("sha256:"));
        assert_eq!(a.digest, b.digest);
    }
}
