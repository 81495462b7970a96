//! Dependency graph construction and ordering.
//!
//! The graph has one node per declared resource and a directed edge
//! dependency → dependent for every output reference embedded in a
//! resource's inputs, plus any explicit `depends_on` entries. Building the
//! graph fails if an edge targets an undeclared resource or if the edges
//! form a cycle; a cyclic set can never be applied because its outputs can
//! never all resolve.

use std::collections::HashMap;

use petgraph::Direction;
use petgraph::algo::{kosaraju_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use tracing::debug;

use crate::error::{CairnError, GraphError, Result};
use crate::resource::ResourceSet;

/// The acyclic dependency graph over a run's declared resources.
#[derive(Debug)]
pub struct DependencyGraph {
    /// Underlying directed graph; node weights are logical names.
    graph: DiGraph<String, ()>,
    /// Index from logical name to graph node.
    nodes: HashMap<String, NodeIndex>,
    /// Topological order (dependencies before dependents).
    order: Vec<String>,
}

impl DependencyGraph {
    /// Builds the dependency graph for a resource set.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::UnknownDependency`] if a reference or explicit
    /// dependency names an undeclared resource, or [`GraphError::Cycle`] if
    /// the edges are not acyclic.
    pub fn build(resources: &ResourceSet) -> Result<Self> {
        let mut graph = DiGraph::new();
        let mut nodes = HashMap::new();

        for resource in resources {
            let idx = graph.add_node(resource.logical_name.clone());
            nodes.insert(resource.logical_name.clone(), idx);
        }

        for resource in resources {
            let dependent = nodes[&resource.logical_name];
            for dependency in resource.dependency_names() {
                let Some(&source) = nodes.get(&dependency) else {
                    return Err(CairnError::Graph(GraphError::UnknownDependency {
                        resource: resource.logical_name.clone(),
                        dependency,
                    }));
                };
                graph.add_edge(source, dependent, ());
            }
        }

        let order = match toposort(&graph, None) {
            Ok(sorted) => sorted.into_iter().map(|idx| graph[idx].clone()).collect(),
            Err(_) => {
                return Err(CairnError::Graph(GraphError::Cycle {
                    cycle: describe_cycle(&graph),
                }));
            }
        };

        debug!("Built dependency graph over {} resource(s)", nodes.len());

        Ok(Self {
            graph,
            nodes,
            order,
        })
    }

    /// Returns the logical names in apply order (dependencies first).
    #[must_use]
    pub fn apply_order(&self) -> &[String] {
        &self.order
    }

    /// Returns the direct dependencies of a resource.
    #[must_use]
    pub fn dependencies_of(&self, logical_name: &str) -> Vec<&str> {
        self.neighbors(logical_name, Direction::Incoming)
    }

    /// Returns the direct dependents of a resource.
    #[must_use]
    pub fn direct_dependents_of(&self, logical_name: &str) -> Vec<&str> {
        self.neighbors(logical_name, Direction::Outgoing)
    }

    /// Returns the transitive dependents of a resource.
    ///
    /// Used for partial-failure isolation: when a resource fails, everything
    /// returned here is skipped.
    #[must_use]
    pub fn dependents_of(&self, logical_name: &str) -> Vec<&str> {
        let Some(&start) = self.nodes.get(logical_name) else {
            return Vec::new();
        };

        let mut visited = vec![false; self.graph.node_count()];
        let mut stack = vec![start];
        let mut dependents = Vec::new();
        while let Some(node) = stack.pop() {
            for next in self.graph.neighbors_directed(node, Direction::Outgoing) {
                if !visited[next.index()] {
                    visited[next.index()] = true;
                    dependents.push(self.graph[next].as_str());
                    stack.push(next);
                }
            }
        }
        dependents
    }

    /// Returns true if the graph contains this resource.
    #[must_use]
    pub fn contains(&self, logical_name: &str) -> bool {
        self.nodes.contains_key(logical_name)
    }

    /// Returns the number of resources in the graph.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the graph is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn neighbors(&self, logical_name: &str, direction: Direction) -> Vec<&str> {
        self.nodes.get(logical_name).map_or_else(Vec::new, |&idx| {
            self.graph
                .neighbors_directed(idx, direction)
                .map(|n| self.graph[n].as_str())
                .collect()
        })
    }
}

/// Renders the members of the first cycle found, for the error message.
fn describe_cycle(graph: &DiGraph<String, ()>) -> String {
    for component in kosaraju_scc(graph) {
        let is_cycle = component.len() > 1
            || graph
                .find_edge(component[0], component[0])
                .is_some();
        if is_cycle {
            let mut names: Vec<&str> = component.iter().map(|&idx| graph[idx].as_str()).collect();
            names.sort_unstable();
            return names.join(" -> ");
        }
    }
    String::from("unknown")
}
