//! Many-to-many matching by reduction to maximum weight bipartite matching.
//!
//! Every agent of capacity `c` becomes `c` vertices, and so does every item.
//! Each agent vertex is joined to each item vertex by an edge weighted with the
//! entitlement-weighted value, negative weights included. The size of the graph
//! grows with the product of the capacity sums, so this engine suits small
//! capacities or cross-checking the flow engine.

use crate::error::MatchingError;
use crate::instance::Instance;
use crate::matching::SparseMatchingSolver;
use crate::solution::{Assignment, Id};
use crate::Reduction;
use anyhow::{anyhow, ensure};
use std::collections::HashSet;
use tracing::{debug, trace};

type UInt = u32;

const OBJECTIVE_TOLERANCE: f64 = 1e-9;

/// Vertex of the cloned graph.
///
/// Capacity-one agents and items keep their identifier, larger capacities
/// produce one indexed copy per unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Node<K> {
    Plain(K),
    Clone(K, usize),
}

impl<K> Node<K> {
    /// Identifier with the unit index stripped.
    pub fn id(&self) -> &K {
        match self {
            Node::Plain(id) => id,
            Node::Clone(id, _) => id,
        }
    }
}

/// Vertices standing for `id` with the given capacity.
fn expand<K: Clone>(id: &K, capacity: usize) -> Vec<Node<K>> {
    match capacity {
        0 => Vec::new(),
        1 => vec![Node::Plain(id.clone())],
        _ => (0..capacity).map(|unit| Node::Clone(id.clone(), unit)).collect(),
    }
}

/// Vertex cloning engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VertexCloning;

impl Reduction for VertexCloning {
    fn solve<K: Id>(&self, instance: &Instance<K>) -> Result<Assignment<K>, MatchingError> {
        solve_by_cloning(instance)
    }
}

/// Cloned bipartite graph: agent vertices are rows, item vertices are columns.
struct ClonedGraph<K> {
    agent_nodes: Vec<(Node<K>, usize)>,
    item_nodes: Vec<(Node<K>, usize)>,
}

impl<K: Id> ClonedGraph<K> {
    /// Clones beyond the other side's total capacity could never be matched,
    /// so each vertex is expanded at most that many times.
    fn build(instance: &Instance<K>) -> Self {
        let total_agent_capacity = (0..instance.num_agents())
            .map(|a| instance.agent_capacity(a))
            .fold(0_usize, usize::saturating_add);
        let total_item_capacity = (0..instance.num_items())
            .map(|i| instance.item_capacity(i))
            .fold(0_usize, usize::saturating_add);

        let agent_nodes = instance
            .agents()
            .iter()
            .enumerate()
            .flat_map(|(a, agent)| {
                expand(agent, instance.agent_capacity(a).min(total_item_capacity))
                    .into_iter()
                    .map(move |node| (node, a))
            })
            .collect();
        let item_nodes = instance
            .items()
            .iter()
            .enumerate()
            .flat_map(|(i, item)| {
                expand(item, instance.item_capacity(i).min(total_agent_capacity))
                    .into_iter()
                    .map(move |node| (node, i))
            })
            .collect();
        ClonedGraph {
            agent_nodes,
            item_nodes,
        }
    }

    fn num_edges(&self) -> usize {
        self.agent_nodes.len() * self.item_nodes.len()
    }
}

/// Computes an assignment from a maximum weight matching of the cloned graph.
///
/// Agents and items must not share identifiers: matched endpoints are told
/// apart by looking their identifiers up among the agents.
pub fn solve_by_cloning<K: Id>(instance: &Instance<K>) -> Result<Assignment<K>, MatchingError> {
    let agents: HashSet<&K> = instance.agents().iter().collect();
    let mut shared: Vec<&K> = instance
        .items()
        .iter()
        .filter(|item| agents.contains(item))
        .collect();
    if !shared.is_empty() {
        shared.sort();
        return Err(MatchingError::NamespaceCollision(format!("{:?}", shared)));
    }

    let graph = ClonedGraph::build(instance);
    debug!(
        "cloned graph with {} agent vertices, {} item vertices and {} edges",
        graph.agent_nodes.len(),
        graph.item_nodes.len(),
        graph.num_edges()
    );

    let edges = match_cloned_graph(instance, &graph).map_err(MatchingError::solver)?;

    let mut assignment = Assignment::with_agents(instance.agents());
    for (u, v) in edges {
        let (agent, item) = match (u.id(), v.id()) {
            (x, y) if agents.contains(x) => (x, y),
            (x, y) if agents.contains(y) => (y, x),
            _ => {
                return Err(MatchingError::SolverInvariantViolation(format!(
                    "cannot find an agent in matched edge ({:?}, {:?})",
                    u, v
                )))
            }
        };
        trace!("matched {:?} with {:?}", agent, item);
        assignment.push(agent, item.clone());
    }
    assignment.sort_bundles();
    instance.verify(&assignment)?;
    Ok(assignment)
}

/// Runs the matching solver and returns the matched vertex pairs.
fn match_cloned_graph<'g, K: Id>(
    instance: &Instance<K>,
    graph: &'g ClonedGraph<K>,
) -> anyhow::Result<Vec<(&'g Node<K>, &'g Node<K>)>> {
    let num_rows = graph.agent_nodes.len();
    let num_cols = graph.item_nodes.len();
    let (mut solver, mut solution) =
        SparseMatchingSolver::<UInt>::new(num_rows, num_cols, graph.num_edges());
    solver.init(to_uint(num_rows)?, to_uint(num_cols)?)?;

    let columns = (0..num_cols)
        .map(to_uint)
        .collect::<anyhow::Result<Vec<UInt>>>()?;
    let mut weights = Vec::with_capacity(num_cols);
    for (row, (_, agent)) in graph.agent_nodes.iter().enumerate() {
        weights.clear();
        weights.extend(
            graph
                .item_nodes
                .iter()
                .map(|(_, item)| instance.weight(*agent, *item)),
        );
        solver.extend_from_values(to_uint(row)?, columns.as_slice(), weights.as_slice())?;
    }

    solver.solve(&mut solution)?;
    debug!(
        "matching of weight {} leaves {} agent vertices unmatched",
        solution.objective, solution.num_unmatched
    );
    let arc_weights = solver.get_objective(&solution);
    ensure!(
        (arc_weights - solution.objective).abs()
            <= OBJECTIVE_TOLERANCE * solution.objective.abs().max(1.),
        "matching reports weight {} but its arcs sum to {}",
        solution.objective,
        arc_weights
    );

    solution
        .pairs()
        .map(|(row, column)| {
            let row: usize = row as usize;
            let column: usize = column as usize;
            ensure!(
                solution.column_to_row.get(column) == Some(&(row as UInt)),
                "column {} is not matched back to row {}",
                column,
                row
            );
            match (graph.agent_nodes.get(row), graph.item_nodes.get(column)) {
                (Some((u, _)), Some((v, _))) => Ok((u, v)),
                _ => Err(anyhow!("matched pair ({}, {}) is not in the graph", row, column)),
            }
        })
        .collect()
}

fn to_uint(n: usize) -> anyhow::Result<UInt> {
    UInt::try_from(n).map_err(|_| anyhow!("{} vertices exceed the index type", n))
}
