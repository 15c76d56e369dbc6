// src/dag/graph.rs

use std::collections::{BTreeMap, HashMap, HashSet};

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::dag::operation::OperationSet;
use crate::errors::{PipelineError, Result};
use crate::types::OperationId;

#[derive(Debug, Clone, Default)]
struct DagNode {
    /// Direct dependencies that will actually run (skipped ids removed).
    deps: Vec<OperationId>,
}

/// Validated adjacency information for an [`OperationSet`].
///
/// Building one is the only way the executor accepts a set, so every run
/// starts from a graph that is known to be acyclic and closed over its ids.
#[derive(Debug, Clone)]
pub struct DagGraph {
    nodes: BTreeMap<OperationId, DagNode>,
    skipped: HashSet<OperationId>,
}

impl DagGraph {
    /// Validate `set` and build its adjacency lists.
    ///
    /// Fails with a graph error (duplicate id, self dependency, unknown
    /// dependency, cycle) before anything has been executed.
    pub fn build(set: &OperationSet) -> Result<Self> {
        let mut seen: HashSet<&str> = HashSet::new();
        for id in set
            .operations()
            .iter()
            .map(|op| op.id.as_str())
            .chain(set.skipped().iter().map(|s| s.id.as_str()))
        {
            if !seen.insert(id) {
                return Err(PipelineError::DuplicateOperation(id.to_string()));
            }
        }

        let skipped: HashSet<&str> = set.skipped().iter().map(|s| s.id.as_str()).collect();
        validate_edges(
            set.operations()
                .iter()
                .map(|op| (op.id.as_str(), op.dependencies.as_slice())),
            &skipped,
        )?;

        let mut nodes: BTreeMap<OperationId, DagNode> = BTreeMap::new();

        // First pass: nodes with the dependencies that will actually run.
        for op in set.operations() {
            let deps = op
                .dependencies
                .iter()
                .filter(|d| !skipped.contains(d.as_str()))
                .cloned()
                .collect();
            nodes.insert(op.id.clone(), DagNode { deps });
        }

        Ok(Self {
            nodes,
            skipped: skipped.into_iter().map(str::to_string).collect(),
        })
    }

    /// All operation ids that will run, in sorted order.
    pub fn operations(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn is_skipped(&self, id: &str) -> bool {
        self.skipped.contains(id)
    }

    /// Immediate dependencies that will actually run.
    pub fn dependencies_of(&self, id: &str) -> &[OperationId] {
        self.nodes
            .get(id)
            .map(|n| n.deps.as_slice())
            .unwrap_or(&[])
    }

    /// One valid execution order, used for dry-run output.
    pub fn topological_order(&self) -> Vec<OperationId> {
        let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
        for (id, node) in &self.nodes {
            graph.add_node(id.as_str());
            for dep in &node.deps {
                graph.add_edge(dep.as_str(), id.as_str(), ());
            }
        }
        toposort(&graph, None)
            .map(|order| order.into_iter().map(str::to_string).collect())
            .unwrap_or_else(|_| self.nodes.keys().cloned().collect())
    }
}

/// Check dependency edges for self references, unknown ids and cycles.
///
/// `nodes` yields every runnable id with its declared dependencies; ids in
/// `skipped` are valid dependency targets but are not part of the graph.
pub fn validate_edges<'a, I>(nodes: I, skipped: &HashSet<&str>) -> Result<()>
where
    I: IntoIterator<Item = (&'a str, &'a [OperationId])>,
{
    let nodes: HashMap<&str, &[OperationId]> = nodes.into_iter().collect();

    // Sorted for stable error messages.
    let mut names: Vec<&str> = nodes.keys().copied().collect();
    names.sort_unstable();

    for name in &names {
        for dep in nodes[name].iter() {
            if dep.as_str() == *name {
                return Err(PipelineError::SelfDependency(name.to_string()));
            }
            if !nodes.contains_key(dep.as_str()) && !skipped.contains(dep.as_str()) {
                return Err(PipelineError::UnknownDependency {
                    operation: name.to_string(),
                    dependency: dep.clone(),
                });
            }
        }
    }

    // Edge direction: dep -> operation.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
    for &name in &names {
        graph.add_node(name);
    }
    for &name in &names {
        for dep in nodes[name].iter() {
            if nodes.contains_key(dep.as_str()) {
                graph.add_edge(dep.as_str(), name, ());
            }
        }
    }

    // A topological sort will fail if there is a cycle.
    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(PipelineError::DagCycle(format!(
            "cycle detected in operation graph involving '{}'",
            cycle.node_id()
        ))),
    }
}
