//! Validated, immutable workflow graph.

use super::{Condition, WorkflowNode};
use crate::errors::{codes, CycleDetectedError, ErrorInfo, GraphValidationError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};

/// A dependency edge: `to` depends on `from`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    /// The dependency.
    pub from: String,
    /// The dependent node.
    pub to: String,
}

/// An acyclic graph of workflow nodes.
///
/// Nodes are stored in declaration order and addressed internally by index;
/// both directions of every edge are kept as adjacency lists so ancestor and
/// descendant walks never need back references.
#[derive(Debug, Clone)]
pub struct WorkflowDag {
    id: String,
    name: String,
    metadata: Map<String, Value>,
    nodes: Vec<WorkflowNode>,
    index: HashMap<String, usize>,
    conditions: Vec<Option<Condition>>,
    edges: Vec<Edge>,
    upstream: Vec<Vec<usize>>,
    downstream: Vec<Vec<usize>>,
    topo: Vec<usize>,
}

impl WorkflowDag {
    /// Validates the nodes and builds the graph.
    ///
    /// # Errors
    ///
    /// Returns a [`GraphValidationError`] for an empty graph, duplicate ids,
    /// self or unknown dependencies, invalid retry policies, malformed
    /// conditions, or a dependency cycle (with the cycle path).
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        nodes: Vec<WorkflowNode>,
        metadata: Map<String, Value>,
    ) -> Result<Self, GraphValidationError> {
        let id = id.into();
        if nodes.is_empty() {
            return Err(GraphValidationError::new(format!("Workflow '{id}' has no nodes"))
                .with_error_info(
                    ErrorInfo::new(codes::EMPTY, "Cannot build an empty workflow")
                        .with_fix_hint("Add at least one node to the workflow."),
                ));
        }

        let mut index = HashMap::with_capacity(nodes.len());
        for (i, node) in nodes.iter().enumerate() {
            if node.id.trim().is_empty() {
                return Err(schema_error(format!("Node #{i} has an empty id"), &node.id));
            }
            if index.insert(node.id.clone(), i).is_some() {
                return Err(GraphValidationError::new(format!("Duplicate node id '{}'", node.id))
                    .with_nodes(vec![node.id.clone()])
                    .with_error_info(
                        ErrorInfo::new(codes::DUPLICATE, format!("Node '{}' is declared twice", node.id))
                            .with_fix_hint("Give every node a unique id."),
                    ));
            }
        }

        let mut conditions = Vec::with_capacity(nodes.len());
        let mut upstream = vec![Vec::new(); nodes.len()];
        let mut downstream = vec![Vec::new(); nodes.len()];
        let mut edges = Vec::new();

        for (i, node) in nodes.iter().enumerate() {
            if let Some(problem) = node.retry_policy.problem() {
                return Err(schema_error(
                    format!("Node '{}' has an invalid retry policy: {problem}", node.id),
                    &node.id,
                ));
            }

            let mut seen = HashSet::new();
            for dep in &node.dependencies {
                if !seen.insert(dep.as_str()) {
                    continue;
                }
                if dep == &node.id {
                    return Err(GraphValidationError::new(format!(
                        "Node '{}' cannot depend on itself",
                        node.id
                    ))
                    .with_nodes(vec![node.id.clone()])
                    .with_error_info(
                        ErrorInfo::new(codes::SELF_DEP, format!("Node '{}' lists itself as a dependency", node.id))
                            .with_fix_hint("Remove the node from its own dependency list."),
                    ));
                }
                let Some(&d) = index.get(dep) else {
                    return Err(GraphValidationError::new(format!(
                        "Node '{}' depends on unknown node '{dep}'",
                        node.id
                    ))
                    .with_nodes(vec![node.id.clone(), dep.clone()])
                    .with_error_info(
                        ErrorInfo::new(codes::MISSING_DEP, format!("Dependency '{dep}' not found"))
                            .with_fix_hint("Declare the dependency as a node or remove it."),
                    ));
                };
                upstream[i].push(d);
                downstream[d].push(i);
                edges.push(Edge {
                    from: dep.clone(),
                    to: node.id.clone(),
                });
            }

            let condition = match node.condition.as_deref() {
                Some(expr) => {
                    let parsed = Condition::parse(expr).map_err(|err| err.with_nodes(vec![node.id.clone()]))?;
                    if let Some(referenced) = parsed.referenced_node() {
                        if !index.contains_key(referenced) {
                            return Err(GraphValidationError::new(format!(
                                "Condition on '{}' reads unknown node '{referenced}'",
                                node.id
                            ))
                            .with_nodes(vec![node.id.clone(), referenced.to_string()])
                            .with_error_info(ErrorInfo::new(
                                codes::CONDITION,
                                format!("Node '{referenced}' is not part of the workflow"),
                            )));
                        }
                    }
                    Some(parsed)
                }
                None => None,
            };
            conditions.push(condition);
        }

        if let Some(cycle) = find_cycle(&nodes, &upstream) {
            return Err(CycleDetectedError::new(cycle).into());
        }

        for list in &mut downstream {
            list.sort_unstable();
        }
        let topo = kahn_order(&upstream, &downstream);

        Ok(Self {
            id,
            name: name.into(),
            metadata,
            nodes,
            index,
            conditions,
            edges,
            upstream,
            downstream,
            topo,
        })
    }

    /// Returns the workflow id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the workflow name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the workflow metadata.
    #[must_use]
    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    /// Returns the number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always false for a constructed graph.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns the nodes in declaration order.
    pub fn nodes(&self) -> impl Iterator<Item = &WorkflowNode> {
        self.nodes.iter()
    }

    /// Returns the explicit edge list.
    #[must_use]
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Looks up a node by id.
    #[must_use]
    pub fn node(&self, id: &str) -> Option<&WorkflowNode> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    /// Returns true if the node exists.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Returns the declaration index of a node.
    #[must_use]
    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Returns the node at a declaration index.
    #[must_use]
    pub fn node_at(&self, index: usize) -> Option<&WorkflowNode> {
        self.nodes.get(index)
    }

    /// Returns the parsed guard condition of a node.
    #[must_use]
    pub fn condition(&self, id: &str) -> Option<&Condition> {
        self.index
            .get(id)
            .and_then(|&i| self.conditions[i].as_ref())
    }

    /// Returns the indices of a node's direct dependencies.
    #[must_use]
    pub fn upstream_of(&self, index: usize) -> &[usize] {
        self.upstream.get(index).map_or(&[], Vec::as_slice)
    }

    /// Returns the indices of a node's direct dependents.
    #[must_use]
    pub fn downstream_of(&self, index: usize) -> &[usize] {
        self.downstream.get(index).map_or(&[], Vec::as_slice)
    }

    /// Returns node indices in topological order, ties broken by declaration order.
    #[must_use]
    pub fn topological_indices(&self) -> &[usize] {
        &self.topo
    }

    /// Returns node ids in topological order, ties broken by declaration order.
    #[must_use]
    pub fn topological_order(&self) -> Vec<&str> {
        self.topo.iter().map(|&i| self.nodes[i].id.as_str()).collect()
    }

    /// Groups nodes into layers that may run concurrently.
    ///
    /// A node's layer is one more than the deepest layer among its
    /// dependencies; roots form layer zero.
    #[must_use]
    pub fn execution_layers(&self) -> Vec<Vec<&str>> {
        let mut depth = vec![0usize; self.nodes.len()];
        for &i in &self.topo {
            depth[i] = self.upstream[i]
                .iter()
                .map(|&d| depth[d] + 1)
                .max()
                .unwrap_or(0);
        }
        let layers = depth.iter().copied().max().map_or(0, |max| max + 1);
        let mut out = vec![Vec::new(); layers];
        for (i, node) in self.nodes.iter().enumerate() {
            out[depth[i]].push(node.id.as_str());
        }
        out
    }

    /// Returns the direct dependents of a node in declaration order.
    #[must_use]
    pub fn dependents(&self, id: &str) -> Vec<&str> {
        self.index_of(id).map_or_else(Vec::new, |i| {
            self.downstream[i]
                .iter()
                .map(|&d| self.nodes[d].id.as_str())
                .collect()
        })
    }

    /// Returns every node reachable downstream of `id`, in declaration order.
    #[must_use]
    pub fn descendants(&self, id: &str) -> Vec<&str> {
        self.index_of(id).map_or_else(Vec::new, |i| {
            self.ids(&self.reachable(&[i], &self.downstream))
        })
    }

    /// Returns every node `id` transitively depends on, in declaration order.
    #[must_use]
    pub fn ancestors(&self, id: &str) -> Vec<&str> {
        self.index_of(id).map_or_else(Vec::new, |i| {
            self.ids(&self.reachable(&[i], &self.upstream))
        })
    }

    /// Returns the indices reachable downstream of the given start nodes,
    /// excluding the start nodes themselves unless reachable from another.
    #[must_use]
    pub fn descendant_indices(&self, starts: &[usize]) -> Vec<usize> {
        self.reachable(starts, &self.downstream)
    }

    /// Returns the ids of nodes listing `contract_id` as an output contract.
    #[must_use]
    pub fn producers_of(&self, contract_id: &str) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|n| n.output_contracts.iter().any(|c| c == contract_id))
            .map(|n| n.id.as_str())
            .collect()
    }

    /// Returns every contract id referenced by any node.
    #[must_use]
    pub fn contract_ids(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.nodes
            .iter()
            .flat_map(|n| n.input_contracts.iter().chain(n.output_contracts.iter()))
            .filter(|id| seen.insert(id.as_str()))
            .map(String::as_str)
            .collect()
    }

    fn reachable(&self, starts: &[usize], adjacency: &[Vec<usize>]) -> Vec<usize> {
        let mut seen = vec![false; self.nodes.len()];
        let mut queue: VecDeque<usize> = starts
            .iter()
            .flat_map(|&s| adjacency[s].iter().copied())
            .collect();
        while let Some(next) = queue.pop_front() {
            if !seen[next] {
                seen[next] = true;
                queue.extend(adjacency[next].iter().copied());
            }
        }
        (0..self.nodes.len()).filter(|&i| seen[i]).collect()
    }

    fn ids(&self, indices: &[usize]) -> Vec<&str> {
        indices.iter().map(|&i| self.nodes[i].id.as_str()).collect()
    }
}

fn schema_error(message: String, node_id: &str) -> GraphValidationError {
    let summary = message.clone();
    GraphValidationError::new(message)
        .with_nodes(vec![node_id.to_string()])
        .with_error_info(ErrorInfo::new(codes::SCHEMA, summary))
}

/// Depth-first search over dependency edges, returning the first cycle found.
fn find_cycle(nodes: &[WorkflowNode], upstream: &[Vec<usize>]) -> Option<Vec<String>> {
    fn visit(
        node: usize,
        upstream: &[Vec<usize>],
        visited: &mut [bool],
        on_stack: &mut [bool],
        path: &mut Vec<usize>,
    ) -> Option<Vec<usize>> {
        visited[node] = true;
        on_stack[node] = true;
        path.push(node);

        for &dep in &upstream[node] {
            if !visited[dep] {
                if let Some(cycle) = visit(dep, upstream, visited, on_stack, path) {
                    return Some(cycle);
                }
            } else if on_stack[dep] {
                let start = path.iter().position(|&n| n == dep).unwrap_or(0);
                let mut cycle = path[start..].to_vec();
                cycle.push(dep);
                return Some(cycle);
            }
        }

        path.pop();
        on_stack[node] = false;
        None
    }

    let mut visited = vec![false; nodes.len()];
    let mut on_stack = vec![false; nodes.len()];
    let mut path = Vec::new();

    for start in 0..nodes.len() {
        if visited[start] {
            continue;
        }
        if let Some(cycle) = visit(start, upstream, &mut visited, &mut on_stack, &mut path) {
            return Some(cycle.into_iter().map(|i| nodes[i].id.clone()).collect());
        }
    }
    None
}

fn kahn_order(upstream: &[Vec<usize>], downstream: &[Vec<usize>]) -> Vec<usize> {
    let mut in_degree: Vec<usize> = upstream.iter().map(Vec::len).collect();
    let mut heap: BinaryHeap<Reverse<usize>> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, &d)| d == 0)
        .map(|(i, _)| Reverse(i))
        .collect();
    let mut order = Vec::with_capacity(upstream.len());

    while let Some(Reverse(next)) = heap.pop() {
        order.push(next);
        for &dependent in &downstream[next] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                heap.push(Reverse(dependent));
            }
        }
    }
    order
}
