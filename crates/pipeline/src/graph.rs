//! Step graph built with petgraph.
//!
//! Nodes are added in catalog order and that order breaks ties during the
//! topological sort, so the same selection always yields the same sequence.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use petgraph::Direction;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::IntoNodeReferences;
use tracing::debug;

use crate::error::{PipelineError, Result};
use crate::step::PipelineStep;

/// Data stored in a [`StepGraph`] node.
pub trait StepNodeData {
    /// Names of the steps this one depends on.
    fn dependency_names(&self) -> impl Iterator<Item = &str>;
}

impl StepNodeData for PipelineStep {
    fn dependency_names(&self) -> impl Iterator<Item = &str> {
        self.depends_on.iter().map(String::as_str)
    }
}

/// A node in the step graph.
#[derive(Debug, Clone)]
pub struct GraphNode<T> {
    /// Step name
    pub name: String,
    /// Step data
    pub step: T,
}

/// Dependency graph over selected steps.
///
/// Edges point from a dependency to its dependent.
pub struct StepGraph<T: StepNodeData> {
    graph: DiGraph<GraphNode<T>, ()>,
    name_to_node: HashMap<String, NodeIndex>,
}

impl<T: StepNodeData> Default for StepGraph<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: StepNodeData> StepGraph<T> {
    /// Create an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            name_to_node: HashMap::new(),
        }
    }

    /// Number of steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    /// Whether the graph has no steps.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Add a step. Insertion order is the tie-break order.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::DuplicateStep`] if the name is taken.
    pub fn add_step(&mut self, name: &str, step: T) -> Result<NodeIndex> {
        if self.name_to_node.contains_key(name) {
            return Err(PipelineError::DuplicateStep {
                step: name.to_string(),
            });
        }
        let index = self.graph.add_node(GraphNode {
            name: name.to_string(),
            step,
        });
        self.name_to_node.insert(name.to_string(), index);
        debug!(step = name, "Added step node");
        Ok(index)
    }

    /// Add dependency edges once every step is in the graph.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::MissingDependencies`] listing every
    /// dependency that names no step in the graph.
    pub fn add_dependency_edges(&mut self) -> Result<()> {
        let mut missing = Vec::new();
        let mut edges = Vec::new();

        for (index, node) in self.graph.node_references() {
            for dep in node.step.dependency_names() {
                match self.name_to_node.get(dep) {
                    Some(&dep_index) => edges.push((dep_index, index)),
                    None => missing.push((node.name.clone(), dep.to_string())),
                }
            }
        }

        if !missing.is_empty() {
            return Err(PipelineError::MissingDependencies { missing });
        }
        for (from, to) in edges {
            self.graph.update_edge(from, to, ());
        }
        Ok(())
    }

    /// Names of steps that take part in a cycle, sorted.
    #[must_use]
    pub fn cycle_members(&self) -> Vec<String> {
        let mut names: Vec<String> = tarjan_scc(&self.graph)
            .into_iter()
            .filter(|component| {
                component.len() > 1
                    || component
                        .first()
                        .is_some_and(|&n| self.graph.contains_edge(n, n))
            })
            .flatten()
            .map(|n| self.graph[n].name.clone())
            .collect();
        names.sort();
        names
    }

    /// Node indices in topological order, lowest insertion index first
    /// among ready steps.
    fn ordered_indices(&self) -> Result<Vec<NodeIndex>> {
        let mut in_degree: Vec<usize> = self
            .graph
            .node_indices()
            .map(|n| self.graph.neighbors_directed(n, Direction::Incoming).count())
            .collect();

        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, degree)| **degree == 0)
            .map(|(i, _)| Reverse(i))
            .collect();

        let mut order = Vec::with_capacity(in_degree.len());
        while let Some(Reverse(i)) = ready.pop() {
            let node = NodeIndex::new(i);
            order.push(node);
            for next in self.graph.neighbors_directed(node, Direction::Outgoing) {
                let degree = &mut in_degree[next.index()];
                *degree -= 1;
                if *degree == 0 {
                    ready.push(Reverse(next.index()));
                }
            }
        }

        if order.len() == self.graph.node_count() {
            Ok(order)
        } else {
            Err(PipelineError::CycleDetected {
                steps: self.cycle_members(),
            })
        }
    }

    /// Step names in topological order.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::CycleDetected`] naming the steps in a cycle.
    pub fn topological_names(&self) -> Result<Vec<String>> {
        Ok(self
            .ordered_indices()?
            .into_iter()
            .map(|n| self.graph[n].name.clone())
            .collect())
    }

    /// Consume the graph, returning steps in topological order.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::CycleDetected`] naming the steps in a cycle.
    pub fn into_sorted(self) -> Result<Vec<T>> {
        let order = self.ordered_indices()?;
        let (nodes, _) = self.graph.into_nodes_edges();
        let mut slots: Vec<Option<T>> = nodes.into_iter().map(|n| Some(n.weight.step)).collect();
        Ok(order
            .into_iter()
            .filter_map(|n| slots.get_mut(n.index()).and_then(Option::take))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Default)]
    struct TestStep {
        depends_on: Vec<String>,
    }

    impl StepNodeData for TestStep {
        fn dependency_names(&self) -> impl Iterator<Item = &str> {
            self.depends_on.iter().map(String::as_str)
        }
    }

    fn step(deps: &[&str]) -> TestStep {
        TestStep {
            depends_on: deps.iter().map(ToString::to_string).collect(),
        }
    }

    fn build(steps: &[(&str, &[&str])]) -> Result<StepGraph<TestStep>> {
        let mut graph = StepGraph::new();
        for (name, deps) in steps {
            graph.add_step(name, step(deps))?;
        }
        graph.add_dependency_edges()?;
        Ok(graph)
    }

    #[test]
    fn test_ties_keep_insertion_order() {
        let graph = build(&[
            ("checkout", &[]),
            ("lint", &["checkout"]),
            ("auth", &["checkout"]),
            ("test", &["lint"]),
            ("deploy", &["auth", "test"]),
        ])
        .unwrap();

        assert_eq!(
            graph.topological_names().unwrap(),
            vec!["checkout", "lint", "auth", "test", "deploy"]
        );
    }

    #[test]
    fn test_dependency_declared_later_still_orders_first() {
        let graph = build(&[("deploy", &["build"]), ("build", &[])]).unwrap();
        assert_eq!(graph.topological_names().unwrap(), vec!["build", "deploy"]);
    }

    #[test]
    fn test_missing_dependency() {
        let err = build(&[("deploy", &["publish"])]).err().unwrap();
        match err {
            PipelineError::MissingDependencies { missing } => {
                assert_eq!(missing, vec![("deploy".to_string(), "publish".to_string())]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_duplicate_step() {
        let mut graph = StepGraph::new();
        graph.add_step("a", step(&[])).unwrap();
        assert!(matches!(
            graph.add_step("a", step(&[])),
            Err(PipelineError::DuplicateStep { .. })
        ));
    }

    #[test]
    fn test_cycle_names_members_only() {
        let graph = build(&[
            ("root", &[]),
            ("a", &["root", "c"]),
            ("b", &["a"]),
            ("c", &["b"]),
            ("loop", &["loop"]),
        ])
        .unwrap();

        assert_eq!(graph.cycle_members(), vec!["a", "b", "c", "loop"]);
        match graph.topological_names() {
            Err(PipelineError::CycleDetected { steps }) => {
                assert_eq!(steps, vec!["a", "b", "c", "loop"]);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_into_sorted_moves_steps() {
        let graph = build(&[("b", &["a"]), ("a", &[])]).unwrap();
        let sorted = graph.into_sorted().unwrap();
        assert_eq!(sorted.len(), 2);
        assert!(sorted[0].depends_on.is_empty());
        assert_eq!(sorted[1].depends_on, vec!["a".to_string()]);
    }

    #[test]
    fn test_empty_graph() {
        let graph: StepGraph<TestStep> = StepGraph::new();
        assert!(graph.is_empty());
        assert!(graph.topological_names().unwrap().is_empty());
    }
}
