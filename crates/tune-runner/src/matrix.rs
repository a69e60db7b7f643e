//! Case-matrix generation.
//!
//! Axes keep the insertion order of the plan document; case names encode
//! the ordinal position, so ordering must be deterministic.

use crate::case::TestCase;
use crate::param::TestConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    /// One parameter at a time: Σ candidates.
    #[default]
    Sum,
    /// Cartesian product across parameters: Π candidates.
    Assemble,
}

/// Candidate handles for one parameter name.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamAxis {
    pub name: String,
    pub candidates: Vec<TestConfig>,
}

/// Ordered parameter-name → candidates mapping. Re-inserting an existing
/// name appends to that axis instead of creating a second one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamAxes {
    axes: Vec<ParamAxis>,
}

impl ParamAxes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, candidates: Vec<TestConfig>) {
        match self.axes.iter_mut().find(|a| a.name == name) {
            Some(axis) => axis.candidates.extend(candidates),
            None => self.axes.push(ParamAxis {
                name: name.to_string(),
                candidates,
            }),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.axes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.axes.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ParamAxis> {
        self.axes.iter()
    }
}

/// Commands shared by every case generated from one template.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CaseTemplate {
    pub subtest: Option<String>,
    pub clean_cmd: String,
    pub build_cmd: String,
    pub run_cmd: String,
}

impl CaseTemplate {
    fn prefix(&self, project: &str) -> String {
        match self.subtest.as_deref().filter(|s| !s.is_empty()) {
            Some(sub) => format!("{}-{}", project, sub),
            None => project.to_string(),
        }
    }

    fn instantiate(&self, name: String, configs: Vec<TestConfig>) -> TestCase {
        TestCase::new(
            name,
            self.clean_cmd.clone(),
            self.build_cmd.clone(),
            self.run_cmd.clone(),
            configs,
        )
    }
}

pub fn generate(
    project: &str,
    template: &CaseTemplate,
    axes: &ParamAxes,
    strategy: Strategy,
) -> Vec<TestCase> {
    match strategy {
        Strategy::Sum => generate_sum(project, template, axes),
        Strategy::Assemble => generate_assemble(project, template, axes),
    }
}

/// One case per candidate of each parameter in isolation. A template
/// with no parameters at all yields a single baseline case.
pub fn generate_sum(project: &str, template: &CaseTemplate, axes: &ParamAxes) -> Vec<TestCase> {
    let prefix = template.prefix(project);
    if axes.is_empty() {
        return vec![template.instantiate(format!("{}-0", prefix), Vec::new())];
    }
    let mut cases = Vec::new();
    for axis in axes.iter() {
        for (ordinal, candidate) in axis.candidates.iter().enumerate() {
            let name = format!("{}-{}-{}", prefix, axis.name, ordinal);
            cases.push(template.instantiate(name, vec![candidate.clone()]));
        }
    }
    cases
}

/// Full Cartesian product. Each newly folded parameter's candidates form
/// the outer loop over the combinations accumulated so far; handles
/// inside a case keep parameter insertion order.
pub fn generate_assemble(
    project: &str,
    template: &CaseTemplate,
    axes: &ParamAxes,
) -> Vec<TestCase> {
    let mut combos: Vec<Vec<TestConfig>> = vec![Vec::new()];
    for axis in axes.iter() {
        let mut next = Vec::with_capacity(combos.len() * axis.candidates.len());
        for candidate in &axis.candidates {
            for combo in &combos {
                let mut extended = combo.clone();
                extended.push(candidate.clone());
                next.push(extended);
            }
        }
        combos = next;
    }
    let prefix = template.prefix(project);
    combos
        .into_iter()
        .enumerate()
        .map(|(ordinal, configs)| {
            template.instantiate(format!("{}-assemble-{}", prefix, ordinal), configs)
        })
        .collect()
}
