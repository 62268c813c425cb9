use std::collections::{HashMap, HashSet};

use petgraph::Graph;
use petgraph::graph::NodeIndex;

use crate::error::PlanError;

/// One step of a composite plan.
///
/// Composites reference tasks (and other plans) by name rather than by
/// direct linkage, so the registry stays the single source of truth. Every
/// name is validated when the pipeline is assembled, never lazily at run
/// time.
#[derive(Debug, Clone)]
pub enum Step {
    /// A single task or plan, resolved by name.
    Task(String),
    /// Steps executed strictly in order; a failure skips the remainder.
    Series(Vec<Step>),
    /// Steps started concurrently; completion waits for all of them.
    Parallel(Vec<Step>),
}

impl Step {
    pub fn task(name: impl Into<String>) -> Self {
        Step::Task(name.into())
    }

    pub fn series(steps: impl IntoIterator<Item = Step>) -> Self {
        Step::Series(steps.into_iter().collect())
    }

    pub fn parallel(steps: impl IntoIterator<Item = Step>) -> Self {
        Step::Parallel(steps.into_iter().collect())
    }

    /// All names referenced anywhere in this step tree.
    pub(crate) fn referenced(&self) -> Vec<&str> {
        match self {
            Step::Task(name) => vec![name.as_str()],
            Step::Series(steps) | Step::Parallel(steps) => {
                steps.iter().flat_map(Step::referenced).collect()
            }
        }
    }
}

/// Checks every plan against the registry: each referenced name must be a
/// registered task or plan, and plan-to-plan references must form a DAG.
pub(crate) fn validate(
    tasks: &HashSet<&str>,
    plans: &[(String, Step)],
) -> Result<(), PlanError> {
    let mut graph = Graph::<&str, ()>::new();
    let mut nodes = HashMap::<&str, NodeIndex>::new();

    for (name, _) in plans {
        nodes.insert(name.as_str(), graph.add_node(name.as_str()));
    }

    for (name, step) in plans {
        for referenced in step.referenced() {
            if tasks.contains(referenced) {
                continue;
            }

            match nodes.get(referenced) {
                Some(&target) => {
                    graph.add_edge(nodes[name.as_str()], target, ());
                }
                None => return Err(PlanError::UnknownName(referenced.to_string())),
            }
        }
    }

    petgraph::algo::toposort(&graph, None).map_err(|_| PlanError::Cycle)?;

    Ok(())
}
