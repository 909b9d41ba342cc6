//! Insertion-ordered directed graph with Kahn ordering and DFS cycle search.

use crate::error::{GraphError, Result};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::fmt;
use std::hash::Hash;

/// DFS visitation state for cycle detection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    OnStack,
    Done,
}

/// A directed dependency graph.
///
/// Edges point from a dependency to its dependent. Node and edge insertion
/// order is preserved and drives every traversal.
#[derive(Debug, Clone)]
pub struct DependencyGraph<K> {
    nodes: Vec<K>,
    index: HashMap<K, usize>,
    /// Outgoing edges: node -> nodes that depend on it
    dependents: Vec<Vec<usize>>,
    /// Incoming edges: node -> nodes it depends on
    dependencies: Vec<Vec<usize>>,
    edge_count: usize,
}

impl<K> Default for DependencyGraph<K>
where
    K: Clone + Eq + Hash + fmt::Display,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> DependencyGraph<K>
where
    K: Clone + Eq + Hash + fmt::Display,
{
    /// Create an empty graph
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            index: HashMap::new(),
            dependents: Vec::new(),
            dependencies: Vec::new(),
            edge_count: 0,
        }
    }

    /// Add a node. Returns `false` if the node already existed.
    pub fn add_node(&mut self, node: K) -> bool {
        if self.index.contains_key(&node) {
            return false;
        }
        self.index.insert(node.clone(), self.nodes.len());
        self.nodes.push(node);
        self.dependents.push(Vec::new());
        self.dependencies.push(Vec::new());
        true
    }

    /// Add an edge meaning "`to` depends on `from`".
    ///
    /// Duplicate edges are ignored and reported as `Ok(false)`. Self-edges are
    /// accepted and will surface as a cycle.
    pub fn add_edge(&mut self, from: &K, to: &K) -> Result<bool> {
        let from_idx = self.position(from)?;
        let to_idx = self.position(to)?;

        if self.dependents[from_idx].contains(&to_idx) {
            return Ok(false);
        }

        self.dependents[from_idx].push(to_idx);
        self.dependencies[to_idx].push(from_idx);
        self.edge_count += 1;
        Ok(true)
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no nodes
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of distinct edges
    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    /// Whether a node exists
    pub fn contains(&self, node: &K) -> bool {
        self.index.contains_key(node)
    }

    /// Nodes in insertion order
    pub fn nodes(&self) -> &[K] {
        &self.nodes
    }

    /// Direct dependencies of a node, in edge insertion order
    pub fn dependencies(&self, node: &K) -> Result<Vec<K>> {
        let idx = self.position(node)?;
        Ok(self.keys(&self.dependencies[idx]))
    }

    /// Direct dependents of a node, in edge insertion order
    pub fn dependents(&self, node: &K) -> Result<Vec<K>> {
        let idx = self.position(node)?;
        Ok(self.keys(&self.dependents[idx]))
    }

    /// Every node reachable from `node` along dependent edges, breadth-first.
    ///
    /// The node itself is not included.
    pub fn transitive_dependents(&self, node: &K) -> Result<Vec<K>> {
        let start = self.position(node)?;
        let mut seen = vec![false; self.nodes.len()];
        seen[start] = true;

        let mut queue = VecDeque::from([start]);
        let mut reached = Vec::new();

        while let Some(current) = queue.pop_front() {
            for &next in &self.dependents[current] {
                if !seen[next] {
                    seen[next] = true;
                    reached.push(next);
                    queue.push_back(next);
                }
            }
        }

        Ok(self.keys(&reached))
    }

    /// Fail with [`GraphError::CycleDetected`] if the graph has a cycle.
    pub fn detect_cycle(&self) -> Result<()> {
        match self.find_cycle() {
            Some(cycle) => Err(GraphError::CycleDetected {
                cycle_path: cycle.iter().map(ToString::to_string).collect(),
            }),
            None => Ok(()),
        }
    }

    /// Depth-first search for a back-edge.
    ///
    /// Roots are visited in insertion order and children in edge order, so the
    /// reported cycle is stable across runs. The returned path is closed on its
    /// first node.
    pub fn find_cycle(&self) -> Option<Vec<K>> {
        let mut marks = vec![Mark::Unvisited; self.nodes.len()];

        for root in 0..self.nodes.len() {
            if marks[root] != Mark::Unvisited {
                continue;
            }

            // (node, next child offset) pairs form the recursion stack
            let mut stack: Vec<(usize, usize)> = vec![(root, 0)];
            marks[root] = Mark::OnStack;

            while let Some(top) = stack.last_mut() {
                let node = top.0;
                if top.1 >= self.dependents[node].len() {
                    marks[node] = Mark::Done;
                    stack.pop();
                    continue;
                }

                let child = self.dependents[node][top.1];
                top.1 += 1;

                match marks[child] {
                    Mark::Unvisited => {
                        marks[child] = Mark::OnStack;
                        stack.push((child, 0));
                    }
                    Mark::OnStack => {
                        let start = stack
                            .iter()
                            .position(|(n, _)| *n == child)
                            .unwrap_or(0);
                        let mut cycle: Vec<K> = stack[start..]
                            .iter()
                            .map(|(n, _)| self.nodes[*n].clone())
                            .collect();
                        cycle.push(self.nodes[child].clone());
                        return Some(cycle);
                    }
                    Mark::Done => {}
                }
            }
        }

        None
    }

    /// Kahn's algorithm with an insertion-ordered ready queue.
    ///
    /// Among nodes that are ready at the same time the one inserted first is
    /// emitted first.
    pub fn topological_sort(&self) -> Result<Vec<K>> {
        let mut indegree: Vec<usize> = self.dependencies.iter().map(Vec::len).collect();
        let mut ready: BinaryHeap<Reverse<usize>> = indegree
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == 0)
            .map(|(i, _)| Reverse(i))
            .collect();

        let mut ordered = Vec::with_capacity(self.nodes.len());
        while let Some(Reverse(idx)) = ready.pop() {
            ordered.push(idx);
            for &next in &self.dependents[idx] {
                indegree[next] -= 1;
                if indegree[next] == 0 {
                    ready.push(Reverse(next));
                }
            }
        }

        if ordered.len() < self.nodes.len() {
            let cycle_path = match self.find_cycle() {
                Some(cycle) => cycle.iter().map(ToString::to_string).collect(),
                None => (0..self.nodes.len())
                    .filter(|i| indegree[*i] > 0)
                    .map(|i| self.nodes[i].to_string())
                    .collect(),
            };
            return Err(GraphError::CycleDetected { cycle_path });
        }

        Ok(self.keys(&ordered))
    }

    fn position(&self, node: &K) -> Result<usize> {
        self.index
            .get(node)
            .copied()
            .ok_or_else(|| GraphError::UnknownNode {
                node: node.to_string(),
            })
    }

    fn keys(&self, indices: &[usize]) -> Vec<K> {
        indices.iter().map(|i| self.nodes[*i].clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(nodes: &[&'static str], edges: &[(&'static str, &'static str)]) -> DependencyGraph<&'static str> {
        let mut g = DependencyGraph::new();
        for n in nodes {
            g.add_node(*n);
        }
        for (from, to) in edges {
            g.add_edge(from, to).unwrap();
        }
        g
    }

    #[test]
    fn test_add_node_is_idempotent() {
        let mut g = DependencyGraph::new();
        assert!(g.add_node("a"));
        assert!(!g.add_node("a"));
        assert_eq!(g.len(), 1);
    }

    #[test]
    fn test_duplicate_edge_ignored() {
        let mut g = graph(&["a", "b"], &[("a", "b")]);
        assert!(!g.add_edge(&"a", &"b").unwrap());
        assert_eq!(g.edge_count(), 1);
    }

    #[test]
    fn test_edge_to_unknown_node() {
        let mut g = graph(&["a"], &[]);
        let err = g.add_edge(&"a", &"missing").unwrap_err();
        assert_eq!(
            err,
            GraphError::UnknownNode {
                node: "missing".to_string()
            }
        );
    }

    #[test]
    fn test_topological_sort_respects_edges() {
        let g = graph(
            &["issue", "comment", "repo", "push"],
            &[("repo", "push"), ("push", "issue"), ("issue", "comment")],
        );
        assert_eq!(
            g.topological_sort().unwrap(),
            vec!["repo", "push", "issue", "comment"]
        );
    }

    #[test]
    fn test_ties_broken_by_insertion_order() {
        let g = graph(
            &["root", "c", "a", "b"],
            &[("root", "a"), ("root", "b"), ("root", "c")],
        );
        // c was inserted before a and b, so it wins the tie
        assert_eq!(g.topological_sort().unwrap(), vec!["root", "c", "a", "b"]);
    }

    #[test]
    fn test_sort_is_deterministic() {
        let build = || {
            graph(
                &["x", "y", "z", "w"],
                &[("x", "z"), ("y", "z"), ("z", "w"), ("x", "w")],
            )
        };
        assert_eq!(
            build().topological_sort().unwrap(),
            build().topological_sort().unwrap()
        );
    }

    #[test]
    fn test_detect_cycle_reports_path() {
        let g = graph(&["a", "b", "c"], &[("a", "b"), ("b", "c"), ("c", "a")]);
        let err = g.detect_cycle().unwrap_err();
        assert_eq!(
            err,
            GraphError::CycleDetected {
                cycle_path: vec!["a".into(), "b".into(), "c".into(), "a".into()]
            }
        );
        assert_eq!(err.to_string(), "cycle detected: a -> b -> c -> a");
    }

    #[test]
    fn test_self_edge_is_cycle() {
        let g = graph(&["a"], &[("a", "a")]);
        assert_eq!(g.find_cycle(), Some(vec!["a", "a"]));
    }

    #[test]
    fn test_topological_sort_fails_on_cycle() {
        let g = graph(&["a", "b", "c"], &[("a", "b"), ("c", "b"), ("b", "c")]);
        assert!(matches!(
            g.topological_sort(),
            Err(GraphError::CycleDetected { .. })
        ));
    }

    #[test]
    fn test_acyclic_graph_has_no_cycle() {
        let g = graph(&["a", "b", "c"], &[("a", "b"), ("a", "c"), ("b", "c")]);
        assert!(g.detect_cycle().is_ok());
    }

    #[test]
    fn test_transitive_dependents() {
        let g = graph(
            &["a", "b", "c", "d", "e"],
            &[("a", "b"), ("b", "c"), ("a", "d"), ("d", "c")],
        );
        assert_eq!(g.transitive_dependents(&"a").unwrap(), vec!["b", "d", "c"]);
        assert!(g.transitive_dependents(&"e").unwrap().is_empty());
    }

    #[test]
    fn test_dependencies_and_dependents() {
        let g = graph(&["a", "b", "c"], &[("a", "c"), ("b", "c")]);
        assert_eq!(g.dependencies(&"c").unwrap(), vec!["a", "b"]);
        assert_eq!(g.dependents(&"a").unwrap(), vec!["c"]);
    }
}
