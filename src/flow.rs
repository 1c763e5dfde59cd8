//! Many-to-many matching by reduction to min-cost max-flow.
//!
//! The network is `s -> agent -> item -> t`: arcs out of the source carry the
//! agent capacities, arcs into the sink the item capacities, and every
//! agent-item arc carries a single unit at the negated weight. The cheapest
//! maximum flow is therefore a maximum-size assignment of largest total weight.

use crate::error::MatchingError;
use crate::instance::Instance;
use crate::network::FlowNetwork;
use crate::solution::{Assignment, Id};
use crate::Reduction;
use tracing::{debug, trace};

const SOURCE: usize = 0;
const SINK: usize = 1;
const FIRST_AGENT: usize = 2;

/// Flow network engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetworkFlow {
    /// Keep agent-item pairs with negative value in the network. Off by
    /// default, so no agent is ever given an item it values negatively.
    pub allow_negative: bool,
}

impl NetworkFlow {
    pub fn new(allow_negative: bool) -> Self {
        NetworkFlow { allow_negative }
    }
}

impl Reduction for NetworkFlow {
    fn solve<K: Id>(&self, instance: &Instance<K>) -> Result<Assignment<K>, MatchingError> {
        solve_by_flow(instance, self.allow_negative)
    }
}

/// Agent-item arc of the network and the pair it stands for.
struct PairEdge {
    agent: usize,
    item: usize,
    edge: usize,
}

/// Computes an assignment from a maximum flow of minimum cost.
pub fn solve_by_flow<K: Id>(
    instance: &Instance<K>,
    allow_negative: bool,
) -> Result<Assignment<K>, MatchingError> {
    let (mut network, pair_edges) =
        build_network(instance, allow_negative).map_err(MatchingError::solver)?;
    debug!(
        "flow network with {} nodes and {} edges",
        network.num_nodes(),
        network.num_edges()
    );

    let summary = network
        .max_flow_min_cost(SOURCE, SINK)
        .map_err(MatchingError::solver)?;
    debug!(
        "max flow {} at cost {} after {} augmentations",
        summary.value, summary.cost, summary.nits
    );

    let assignment = decode_flow(instance, &network, &pair_edges)?;
    instance.verify(&assignment)?;
    Ok(assignment)
}

fn build_network<K: Id>(
    instance: &Instance<K>,
    allow_negative: bool,
) -> anyhow::Result<(FlowNetwork, Vec<PairEdge>)> {
    let num_agents = instance.num_agents();
    let num_items = instance.num_items();
    let first_item = FIRST_AGENT + num_agents;
    let mut network = FlowNetwork::new(
        first_item + num_items,
        num_agents + num_items + num_agents * num_items,
    );

    for agent in 0..num_agents {
        network.add_edge(SOURCE, FIRST_AGENT + agent, instance.agent_capacity(agent), 0.)?;
    }

    let mut pair_edges = Vec::with_capacity(num_agents * num_items);
    for agent in 0..num_agents {
        for item in 0..num_items {
            if instance.value(agent, item) < 0. && !allow_negative {
                trace!("skipping negative pair ({}, {})", agent, item);
                continue;
            }
            let edge = network.add_edge(
                FIRST_AGENT + agent,
                first_item + item,
                1,
                -instance.weight(agent, item),
            )?;
            pair_edges.push(PairEdge { agent, item, edge });
        }
    }

    for item in 0..num_items {
        network.add_edge(first_item + item, SINK, instance.item_capacity(item), 0.)?;
    }
    Ok((network, pair_edges))
}

fn decode_flow<K: Id>(
    instance: &Instance<K>,
    network: &FlowNetwork,
    pair_edges: &[PairEdge],
) -> Result<Assignment<K>, MatchingError> {
    let mut assignment = Assignment::with_agents(instance.agents());
    for pair in pair_edges {
        match network.flow(pair.edge) {
            0 => {}
            1 => assignment.push(
                &instance.agents()[pair.agent],
                instance.items()[pair.item].clone(),
            ),
            flow => {
                return Err(MatchingError::SolverInvariantViolation(format!(
                    "non-binary flow {} from agent {:?} to item {:?}",
                    flow,
                    instance.agents()[pair.agent],
                    instance.items()[pair.item]
                )))
            }
        }
    }
    assignment.sort_bundles();
    Ok(assignment)
}

#[cfg(test)]
mod tests {
    use super::{build_network, decode_flow, solve_by_flow, PairEdge, SINK, SOURCE};
    use crate::error::MatchingError;
    use crate::instance::Instance;
    use std::collections::BTreeMap;
    use test_log::test;

    fn instance(
        items: &[(&'static str, usize)],
        agents: &[(&'static str, usize)],
        values: &[(&'static str, &[(&'static str, f64)])],
    ) -> Instance<&'static str> {
        let valuations: BTreeMap<_, BTreeMap<_, f64>> = values
            .iter()
            .map(|(agent, row)| (*agent, row.iter().copied().collect()))
            .collect();
        Instance::from_tables(
            items.iter().copied(),
            agents.iter().copied(),
            &valuations,
            |_| 1.,
        )
        .unwrap()
    }

    #[test]
    fn test_negative_pairs_are_left_out_of_the_network() {
        let instance = instance(
            &[("x", 2), ("y", 2)],
            &[("a", 1), ("b", 3)],
            &[("a", &[("x", 11.), ("y", 22.)]), ("b", &[("x", 33.), ("y", -1.)])],
        );
        let (network, pair_edges) = build_network(&instance, false).unwrap();
        assert_eq!(network.num_nodes(), 6);
        assert_eq!(network.num_edges(), 2 + 3 + 2);
        assert_eq!(pair_edges.len(), 3);

        let (network, pair_edges) = build_network(&instance, true).unwrap();
        assert_eq!(network.num_edges(), 2 + 4 + 2);
        assert_eq!(pair_edges.len(), 4);
    }

    #[test]
    fn test_default_never_assigns_negative_pairs() {
        let instance = instance(
            &[("x", 2), ("y", 2)],
            &[("a", 1), ("b", 3)],
            &[("a", &[("x", 11.), ("y", 22.)]), ("b", &[("x", 33.), ("y", -1.)])],
        );
        let assignment = solve_by_flow(&instance, false).unwrap();
        assert_eq!(assignment.bundle(&"a"), ["y"]);
        assert_eq!(assignment.bundle(&"b"), ["x"]);

        // with negative pairs allowed the extra unit is still routed
        let assignment = solve_by_flow(&instance, true).unwrap();
        assert_eq!(assignment.bundle(&"a"), ["y"]);
        assert_eq!(assignment.bundle(&"b"), ["x", "y"]);
        assert_eq!(instance.objective(&assignment), 22. + 33. - 1.);
    }

    #[test]
    fn test_min_cost_assignment_with_negated_values() {
        let costs = [[1., 2., 3.], [4., 1., 2.], [3., 6., 1.]];
        let agents = ["agent_0", "agent_1", "agent_2"];
        let items = ["item_0", "item_1", "item_2"];
        let index = |id: &&str| id.chars().last().and_then(|c| c.to_digit(10)).unwrap() as usize;
        let instance = Instance::from_fns(
            items,
            |_| 1,
            agents,
            |_| 1,
            |agent, item| -costs[index(agent)][index(item)],
            |_| 1.,
        )
        .unwrap();

        let assignment = solve_by_flow(&instance, true).unwrap();
        assert_eq!(assignment.bundle(&"agent_0"), ["item_0"]);
        assert_eq!(assignment.bundle(&"agent_1"), ["item_1"]);
        assert_eq!(assignment.bundle(&"agent_2"), ["item_2"]);
        assert_eq!(instance.objective(&assignment), -3.);

        // without negative pairs there is nothing to route
        let assignment = solve_by_flow(&instance, false).unwrap();
        assert_eq!(assignment.num_assigned(), 0);
        assert_eq!(assignment.len(), 3);
    }

    #[test]
    fn test_entitlement_scales_weights() {
        let instance = Instance::from_fns(
            vec!["x"],
            |_| 1,
            vec!["a", "b"],
            |_| 1,
            |agent, _| if *agent == "a" { 10. } else { 6. },
            |agent| if *agent == "b" { 2. } else { 1. },
        )
        .unwrap();
        let assignment = solve_by_flow(&instance, false).unwrap();
        assert!(assignment.bundle(&"a").is_empty());
        assert_eq!(assignment.bundle(&"b"), ["x"]);
    }

    #[test]
    fn test_non_binary_flow_is_rejected() {
        let instance = instance(&[("x", 2)], &[("a", 2)], &[("a", &[("x", 1.)])]);
        let (mut network, _) = build_network(&instance, false).unwrap();
        // a two-unit arc standing in for the agent-item arc
        let wide = network.add_edge(2, 3, 2, -5.).unwrap();
        network.max_flow_min_cost(SOURCE, SINK).unwrap();
        assert_eq!(network.flow(wide), 2);

        let pair_edges = [PairEdge {
            agent: 0,
            item: 0,
            edge: wide,
        }];
        let err = decode_flow(&instance, &network, &pair_edges).unwrap_err();
        assert!(matches!(err, MatchingError::SolverInvariantViolation(_)));
    }
}
