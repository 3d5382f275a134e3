//! Dependency graph between contracts.

use super::UniversalContract;
use crate::errors::{codes, CycleDetectedError};
use std::collections::{HashMap, VecDeque};

/// Directed graph over contract ids.
///
/// An edge `a -> b` means `b` cannot be relied upon until `a` holds: `b`
/// lists `a` in `depends_on`, or `a` lists `b` in `blocks` or `enables`.
/// Ids referenced before they are registered get a placeholder vertex.
#[derive(Debug, Clone, Default)]
pub(crate) struct ContractGraph {
    ids: Vec<String>,
    index: HashMap<String, usize>,
    registered: Vec<bool>,
    downstream: Vec<Vec<usize>>,
    upstream: Vec<Vec<usize>>,
}

impl ContractGraph {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Builds a graph from contracts in registration order.
    pub(crate) fn build<'a>(
        contracts: impl IntoIterator<Item = &'a UniversalContract>,
    ) -> Result<Self, CycleDetectedError> {
        let mut graph = Self::new();
        for contract in contracts {
            graph.insert(contract)?;
        }
        Ok(graph)
    }

    /// Adds a contract and its relations; leaves the graph untouched on a cycle.
    pub(crate) fn insert(&mut self, contract: &UniversalContract) -> Result<(), CycleDetectedError> {
        let snapshot = self.clone();
        let me = self.vertex(&contract.id);
        self.registered[me] = true;

        for dep in &contract.depends_on {
            let d = self.vertex(dep);
            self.link(d, me);
        }
        for target in contract.blocks.iter().chain(&contract.enables) {
            let t = self.vertex(target);
            self.link(me, t);
        }

        if let Some(cycle) = self.find_cycle() {
            *self = snapshot;
            return Err(CycleDetectedError::with_code(codes::CONTRACT_CYCLE, cycle));
        }
        Ok(())
    }

    pub(crate) fn contains(&self, id: &str) -> bool {
        self.index
            .get(id)
            .is_some_and(|&i| self.registered[i])
    }

    /// Direct prerequisites of `id`, registered or not.
    pub(crate) fn prerequisites(&self, id: &str) -> Vec<&str> {
        self.index.get(id).map_or_else(Vec::new, |&i| {
            self.upstream[i].iter().map(|&u| self.ids[u].as_str()).collect()
        })
    }

    /// Registered contracts reachable downstream of `id`.
    pub(crate) fn descendants(&self, id: &str) -> Vec<&str> {
        self.index.get(id).map_or_else(Vec::new, |&i| {
            self.registered_ids(&self.reachable(i, &self.downstream))
        })
    }

    /// Registered contracts `id` transitively depends on.
    pub(crate) fn ancestors(&self, id: &str) -> Vec<&str> {
        self.index.get(id).map_or_else(Vec::new, |&i| {
            self.registered_ids(&self.reachable(i, &self.upstream))
        })
    }

    /// Groups registered contracts into dependency layers.
    ///
    /// Placeholders take part in depth computation so ordering through an
    /// unregistered contract is preserved, but never appear in the output.
    pub(crate) fn layers(&self) -> Vec<Vec<String>> {
        let n = self.ids.len();
        let mut in_degree: Vec<usize> = self.upstream.iter().map(Vec::len).collect();
        let mut depth = vec![0usize; n];
        let mut queue: VecDeque<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();

        while let Some(next) = queue.pop_front() {
            for &dependent in &self.downstream[next] {
                depth[dependent] = depth[dependent].max(depth[next] + 1);
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    queue.push_back(dependent);
                }
            }
        }

        let mut layers: Vec<Vec<String>> = Vec::new();
        for (i, id) in self.ids.iter().enumerate() {
            if !self.registered[i] {
                continue;
            }
            if layers.len() <= depth[i] {
                layers.resize_with(depth[i] + 1, Vec::new);
            }
            layers[depth[i]].push(id.clone());
        }
        layers.retain(|layer| !layer.is_empty());
        layers
    }

    fn vertex(&mut self, id: &str) -> usize {
        if let Some(&i) = self.index.get(id) {
            return i;
        }
        let i = self.ids.len();
        self.ids.push(id.to_string());
        self.index.insert(id.to_string(), i);
        self.registered.push(false);
        self.downstream.push(Vec::new());
        self.upstream.push(Vec::new());
        i
    }

    fn link(&mut self, from: usize, to: usize) {
        if !self.downstream[from].contains(&to) {
            self.downstream[from].push(to);
            self.upstream[to].push(from);
        }
    }

    fn reachable(&self, start: usize, adjacency: &[Vec<usize>]) -> Vec<usize> {
        let mut seen = vec![false; self.ids.len()];
        let mut queue: VecDeque<usize> = adjacency[start].iter().copied().collect();
        while let Some(next) = queue.pop_front() {
            if !seen[next] {
                seen[next] = true;
                queue.extend(adjacency[next].iter().copied());
            }
        }
        (0..self.ids.len()).filter(|&i| seen[i]).collect()
    }

    fn registered_ids(&self, indices: &[usize]) -> Vec<&str> {
        indices
            .iter()
            .filter(|&&i| self.registered[i])
            .map(|&i| self.ids[i].as_str())
            .collect()
    }

    fn find_cycle(&self) -> Option<Vec<String>> {
        fn visit(
            node: usize,
            downstream: &[Vec<usize>],
            state: &mut [u8],
            path: &mut Vec<usize>,
        ) -> Option<Vec<usize>> {
            state[node] = 1;
            path.push(node);
            for &next in &downstream[node] {
                match state[next] {
                    0 => {
                        if let Some(cycle) = visit(next, downstream, state, path) {
                            return Some(cycle);
                        }
                    }
                    1 => {
                        let start = path.iter().position(|&n| n == next).unwrap_or(0);
                        let mut cycle = path[start..].to_vec();
                        cycle.push(next);
                        return Some(cycle);
                    }
                    _ => {}
                }
            }
            path.pop();
            state[node] = 2;
            None
        }

        let mut state = vec![0u8; self.ids.len()];
        let mut path = Vec::new();
        for start in 0..self.ids.len() {
            if state[start] == 0 {
                if let Some(cycle) = visit(start, &self.downstream, &mut state, &mut path) {
                    return Some(cycle.into_iter().map(|i| self.ids[i].clone()).collect());
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn contract(id: &str) -> UniversalContract {
        UniversalContract::new(id, "api_endpoint", id, "provider", "consumer")
    }

    #[test]
    fn test_relations_become_edges() {
        let graph = ContractGraph::build(&[
            contract("SPEC"),
            contract("API").depends_on(&["SPEC"]).blocks(&["UI"]),
            contract("UI"),
            contract("E2E").depends_on(&["UI"]),
        ])
        .unwrap();

        assert_eq!(graph.descendants("SPEC"), vec!["API", "UI", "E2E"]);
        assert_eq!(graph.ancestors("E2E"), vec!["SPEC", "API", "UI"]);
        assert_eq!(graph.prerequisites("UI"), vec!["API"]);
        assert_eq!(
            graph.layers(),
            vec![
                vec!["SPEC".to_string()],
                vec!["API".to_string()],
                vec!["UI".to_string()],
                vec!["E2E".to_string()],
            ]
        );
    }

    #[test]
    fn test_placeholders_are_hidden() {
        let graph = ContractGraph::build(&[contract("B").depends_on(&["A"])]).unwrap();
        assert!(!graph.contains("A"));
        assert!(graph.contains("B"));
        assert!(graph.ancestors("B").is_empty());
        assert_eq!(graph.prerequisites("B"), vec!["A"]);
        assert_eq!(graph.layers(), vec![vec!["B".to_string()]]);
    }

    #[test]
    fn test_cycle_rolls_back() {
        let mut graph = ContractGraph::build(&[contract("A").depends_on(&["B"])]).unwrap();
        let err = graph.insert(&contract("B").depends_on(&["A"])).unwrap_err();

        assert_eq!(err.error_info.code, codes::CONTRACT_CYCLE);
        assert_eq!(err.cycle_path.first(), err.cycle_path.last());
        assert!(!graph.contains("B"));
        assert_eq!(graph.prerequisites("B"), Vec::<&str>::new());
    }
}
