//! Dependency-graph utilities shared by the decomposition pipeline's cycle
//! detector and the task store's DAG invariant checks.

use std::collections::{HashMap, HashSet, VecDeque};

/// A directed edge list keyed by task `key`, used for Kahn's-algorithm
/// cycle detection (spec §4.8 "Cycle detection").
pub struct DependencyGraph<'a> {
    nodes: Vec<&'a str>,
    /// key -> set of keys it depends on.
    edges: HashMap<&'a str, HashSet<&'a str>>,
}

impl<'a> DependencyGraph<'a> {
    pub fn new<I>(tasks: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a [String])>,
    {
        let mut nodes = Vec::new();
        let mut edges = HashMap::new();
        for (key, depends_on) in tasks {
            nodes.push(key);
            edges.insert(key, depends_on.iter().map(String::as_str).collect());
        }
        Self { nodes, edges }
    }

    /// Runs Kahn's algorithm. Returns `Ok(topo_order)` if acyclic, or
    /// `Err(remaining_keys)` naming the nodes left with non-zero in-degree
    /// (i.e. participating in a cycle), per spec §4.8.
    pub fn topo_sort(&self) -> Result<Vec<&'a str>, Vec<String>> {
        // in-degree here counts dependents, i.e. edges point dependency -> dependent
        // so we process nodes whose dependencies are all satisfied first.
        let mut in_degree: HashMap<&str, usize> = self.nodes.iter().map(|&n| (n, 0)).collect();
        for node in &self.nodes {
            for dep in self.edges.get(node).into_iter().flatten() {
                if in_degree.contains_key(dep) {
                    *in_degree.get_mut(node).unwrap() += 1;
                }
            }
        }

        let mut queue: VecDeque<&str> = in_degree
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(&n, _)| n)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut remaining = in_degree.clone();

        while let Some(node) = queue.pop_front() {
            order.push(node);
            for &other in &self.nodes {
                if other == node {
                    continue;
                }
                if self.edges.get(other).map(|deps| deps.contains(node)).unwrap_or(false) {
                    let deg = remaining.get_mut(other).unwrap();
                    *deg -= 1;
                    if *deg == 0 {
                        queue.push_back(other);
                    }
                }
            }
        }

        if order.len() == self.nodes.len() {
            Ok(order)
        } else {
            let resolved: HashSet<&str> = order.into_iter().collect();
            Err(self
                .nodes
                .iter()
                .filter(|n| !resolved.contains(*n))
                .map(|&n| n.to_string())
                .collect())
        }
    }
}
