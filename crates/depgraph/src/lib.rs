//! # depgraph
//!
//! A small directed-graph structure for dependency ordering.
//!
//! Nodes are identified by any hashable key and remember the order in which
//! they were inserted. That order is what makes the graph deterministic:
//! cycle reports walk roots in insertion order, and the topological sort
//! breaks ties between simultaneously-ready nodes by insertion order, so the
//! same sequence of `add_node` / `add_edge` calls always yields the same
//! ordering.
//!
//! An edge `add_edge(from, to)` reads "`to` depends on `from`".
//!
//! ## Example
//!
//! ```
//! use depgraph::DependencyGraph;
//!
//! let mut graph = DependencyGraph::new();
//! graph.add_node("repo");
//! graph.add_node("label");
//! graph.add_node("issue");
//! graph.add_edge(&"repo", &"label")?;
//! graph.add_edge(&"repo", &"issue")?;
//! graph.add_edge(&"label", &"issue")?;
//!
//! assert_eq!(graph.topological_sort()?, vec!["repo", "label", "issue"]);
//! # Ok::<(), depgraph::GraphError>(())
//! ```

mod error;
mod graph;

pub use error::{GraphError, Result};
pub use graph::DependencyGraph;
