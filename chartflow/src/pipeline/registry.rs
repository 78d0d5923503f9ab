//! Step registry: prerequisites and fan-out groups.

use crate::core::Step;
use crate::errors::RegistryError;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::{error, warn};

/// A unit of scheduling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    /// One step on its own.
    Single(Step),
    /// Independent steps launched together.
    FanOut(Vec<Step>),
}

impl Phase {
    /// Steps in the phase, in canonical order.
    #[must_use]
    pub fn steps(&self) -> &[Step] {
        match self {
            Self::Single(step) => std::slice::from_ref(step),
            Self::FanOut(steps) => steps,
        }
    }
}

/// Builder for a `StepRegistry`.
#[derive(Debug, Clone, Default)]
pub struct StepRegistryBuilder {
    prerequisites: BTreeMap<Step, BTreeSet<Step>>,
    groups: Vec<Vec<Step>>,
}

impl StepRegistryBuilder {
    /// Declares the direct prerequisites of a step.
    #[must_use]
    pub fn declare(mut self, step: Step, prerequisites: &[Step]) -> Self {
        self.prerequisites
            .insert(step, prerequisites.iter().copied().collect());
        self
    }

    /// Declares a fan-out group.
    #[must_use]
    pub fn fan_out(mut self, steps: &[Step]) -> Self {
        let mut group = steps.to_vec();
        group.sort();
        group.dedup();
        self.groups.push(group);
        self
    }

    /// Validates the declarations and builds the registry.
    ///
    /// Steps left undeclared depend on every earlier step. Groups that are
    /// not safe to run concurrently are dropped, so their members run
    /// sequentially.
    ///
    /// # Errors
    ///
    /// Returns an error on self-dependencies, cycles, or prerequisites that
    /// run after their dependent.
    pub fn build(self) -> Result<StepRegistry, RegistryError> {
        for (step, prerequisites) in &self.prerequisites {
            if prerequisites.contains(step) {
                return Err(RegistryError::SelfDependency(*step));
            }
        }

        if let Some(cycle) = detect_cycle(&self.prerequisites) {
            return Err(RegistryError::Cycle(cycle));
        }

        for (step, prerequisites) in &self.prerequisites {
            if let Some(later) = prerequisites.iter().find(|p| **p > *step) {
                return Err(RegistryError::ForwardDependency {
                    step: *step,
                    prerequisite: *later,
                });
            }
        }

        let mut prerequisites = BTreeMap::new();
        for step in Step::ALL {
            let declared = self.prerequisites.get(&step).map_or_else(
                || {
                    warn!(step = %step, "Step has no declaration; treating as sequential");
                    step.predecessors().to_vec()
                },
                |deps| deps.iter().copied().collect(),
            );
            prerequisites.insert(step, declared);
        }

        let mut claimed = HashSet::new();
        let mut groups = Vec::new();
        for group in self.groups {
            match check_group(&group, &self.prerequisites, &claimed) {
                Ok(()) => {
                    claimed.extend(group.iter().copied());
                    groups.push(group);
                }
                Err(reason) => {
                    warn!(
                        group = ?group,
                        reason = %reason,
                        "Fan-out group rejected; members will run sequentially"
                    );
                }
            }
        }

        Ok(StepRegistry {
            prerequisites,
            groups,
        })
    }
}

/// The canonical step catalogue.
///
/// Answers which steps a step needs and which steps may run together.
#[derive(Debug, Clone)]
pub struct StepRegistry {
    prerequisites: BTreeMap<Step, Vec<Step>>,
    groups: Vec<Vec<Step>>,
}

impl StepRegistry {
    /// Creates a registry builder.
    #[must_use]
    pub fn builder() -> StepRegistryBuilder {
        StepRegistryBuilder::default()
    }

    /// The standard analysis pipeline.
    ///
    /// Personality, aptitude and fortune-outlook form the only fan-out group.
    #[must_use]
    pub fn standard() -> Self {
        let analytical_base = [
            Step::ChartDerivation,
            Step::HiddenStemExtraction,
            Step::BaselineAnalysis,
        ];

        let built = Self::builder()
            .declare(Step::ChartDerivation, &[])
            .declare(Step::HiddenStemExtraction, &[Step::ChartDerivation])
            .declare(
                Step::BaselineAnalysis,
                &[Step::ChartDerivation, Step::HiddenStemExtraction],
            )
            .declare(Step::Personality, &analytical_base)
            .declare(Step::Aptitude, &analytical_base)
            .declare(Step::FortuneOutlook, &analytical_base)
            .declare(Step::Scoring, Step::Scoring.predecessors())
            .declare(
                Step::Visualization,
                &[Step::HiddenStemExtraction, Step::Scoring],
            )
            .declare(Step::Persistence, Step::Persistence.predecessors())
            .declare(Step::Completion, Step::Completion.predecessors())
            .fan_out(&[Step::Personality, Step::Aptitude, Step::FortuneOutlook])
            .build();

        built.unwrap_or_else(|err| {
            error!(error = %err, "Standard registry is invalid; falling back to sequential");
            Self::sequential()
        })
    }

    /// A registry where every step depends on all earlier steps.
    #[must_use]
    pub fn sequential() -> Self {
        Self {
            prerequisites: Step::ALL
                .iter()
                .map(|step| (*step, step.predecessors().to_vec()))
                .collect(),
            groups: Vec::new(),
        }
    }

    /// Steps in canonical order.
    #[must_use]
    pub fn order(&self) -> &'static [Step] {
        &Step::ALL
    }

    /// Direct prerequisites of a step.
    #[must_use]
    pub fn prerequisites(&self, step: Step) -> &[Step] {
        self.prerequisites.get(&step).map_or(&[], Vec::as_slice)
    }

    /// The fan-out group a step belongs to.
    #[must_use]
    pub fn fan_out_group(&self, step: Step) -> Option<&[Step]> {
        self.groups
            .iter()
            .find(|group| group.contains(&step))
            .map(Vec::as_slice)
    }

    /// Whether the step may run concurrently with its group siblings.
    #[must_use]
    pub fn is_fan_out(&self, step: Step) -> bool {
        self.fan_out_group(step).is_some()
    }

    /// Scheduling phases in order.
    ///
    /// With `enable_parallel` off, every step is its own phase.
    #[must_use]
    pub fn phases(&self, enable_parallel: bool) -> Vec<Phase> {
        self.phases_from(Step::FIRST, enable_parallel)
    }

    /// Scheduling phases covering `start` and every later step.
    ///
    /// A fan-out group is kept whole when `start` falls inside it.
    #[must_use]
    pub fn phases_from(&self, start: Step, enable_parallel: bool) -> Vec<Phase> {
        let mut phases = Vec::new();
        let mut seen = HashSet::new();

        for step in Step::ALL {
            if seen.contains(&step) {
                continue;
            }
            let group = self.fan_out_group(step).filter(|_| enable_parallel);
            match group {
                Some(group) if group.iter().any(|member| *member >= start) => {
                    seen.extend(group.iter().copied());
                    phases.push(Phase::FanOut(group.to_vec()));
                }
                _ if step >= start => {
                    seen.insert(step);
                    phases.push(Phase::Single(step));
                }
                _ => {}
            }
        }

        phases
    }
}

impl Default for StepRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

fn check_group(
    group: &[Step],
    declared: &BTreeMap<Step, BTreeSet<Step>>,
    claimed: &HashSet<Step>,
) -> Result<(), String> {
    if group.len() < 2 {
        return Err("a group needs at least two steps".to_string());
    }
    if let Some(step) = group.iter().find(|step| claimed.contains(step)) {
        return Err(format!("step '{step}' is already in another group"));
    }
    if group.windows(2).any(|pair| pair[1].index() != pair[0].index() + 1) {
        return Err("members are not contiguous in canonical order".to_string());
    }

    let mut shared: Option<&BTreeSet<Step>> = None;
    for step in group {
        let Some(prerequisites) = declared.get(step) else {
            return Err(format!("step '{step}' has no declaration"));
        };
        if prerequisites.iter().any(|p| group.contains(p)) {
            return Err(format!("step '{step}' depends on a group sibling"));
        }
        match shared {
            Some(expected) if expected != prerequisites => {
                return Err("members have different prerequisites".to_string());
            }
            _ => shared = Some(prerequisites),
        }
    }

    Ok(())
}

fn detect_cycle(graph: &BTreeMap<Step, BTreeSet<Step>>) -> Option<Vec<Step>> {
    let mut visited = HashSet::new();
    let mut rec_stack = HashSet::new();
    let mut path = Vec::new();

    for step in graph.keys() {
        if !visited.contains(step) {
            if let Some(cycle) = dfs_cycle(*step, graph, &mut visited, &mut rec_stack, &mut path) {
                return Some(cycle);
            }
        }
    }

    None
}

fn dfs_cycle(
    node: Step,
    graph: &BTreeMap<Step, BTreeSet<Step>>,
    visited: &mut HashSet<Step>,
    rec_stack: &mut HashSet<Step>,
    path: &mut Vec<Step>,
) -> Option<Vec<Step>> {
    visited.insert(node);
    rec_stack.insert(node);
    path.push(node);

    if let Some(deps) = graph.get(&node) {
        for dep in deps {
            if !visited.contains(dep) {
                if let Some(cycle) = dfs_cycle(*dep, graph, visited, rec_stack, path) {
                    return Some(cycle);
                }
            } else if rec_stack.contains(dep) {
                let start = path.iter().position(|n| n == dep).unwrap_or(0);
                let mut cycle = path[start..].to_vec();
                cycle.push(*dep);
                return Some(cycle);
            }
        }
    }

    path.pop();
    rec_stack.remove(&node);
    None
}
