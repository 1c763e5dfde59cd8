use anyhow;
use anyhow::{anyhow as anyhow_error, ensure, Result};
use std::collections::VecDeque;
use tracing::trace;

const NONE: usize = usize::MAX;

/// Relative improvement below which a relaxation counts as a tie.
const COST_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone)]
struct Arc {
    to: usize,
    // next arc leaving the same node, NONE terminates the list
    next: usize,
    residual: usize,
    cost: f64,
}

/// Totals of a computed flow
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlowSummary {
    pub value: usize,
    pub cost: f64,
    /// number of augmenting paths
    pub nits: u32,
}

/// Directed network with integral capacities and real costs.
///
/// Arcs are kept in forward-star form: every arc added with [`FlowNetwork::add_edge`]
/// is stored next to its reverse residual arc, so arc `e ^ 1` is the twin of `e`.
#[derive(Debug, Clone)]
pub struct FlowNetwork {
    head: Vec<usize>,
    arcs: Vec<Arc>,
}

impl FlowNetwork {
    pub fn new(num_nodes: usize, edges_capacity: usize) -> FlowNetwork {
        FlowNetwork {
            head: vec![NONE; num_nodes],
            arcs: Vec::with_capacity(2 * edges_capacity),
        }
    }

    #[inline]
    pub fn num_nodes(&self) -> usize {
        self.head.len()
    }

    #[inline]
    pub fn num_edges(&self) -> usize {
        self.arcs.len() / 2
    }

    /// Adds an arc and returns its edge id.
    pub fn add_edge(&mut self, from: usize, to: usize, capacity: usize, cost: f64) -> Result<usize> {
        ensure!(
            from < self.num_nodes() && to < self.num_nodes(),
            "edge {} -> {} leaves the network of {} nodes",
            from,
            to,
            self.num_nodes()
        );
        ensure!(from != to, "self loop at node {}", from);
        ensure!(cost.is_finite(), "cost of edge {} -> {} is {}", from, to, cost);

        let edge = self.num_edges();
        let forward = self.arcs.len();
        self.arcs.push(Arc {
            to,
            next: self.head[from],
            residual: capacity,
            cost,
        });
        self.head[from] = forward;
        self.arcs.push(Arc {
            to: from,
            next: self.head[to],
            residual: 0,
            cost: -cost,
        });
        self.head[to] = forward + 1;
        Ok(edge)
    }

    /// Flow currently routed through `edge`.
    #[inline]
    pub fn flow(&self, edge: usize) -> usize {
        self.arcs[2 * edge + 1].residual
    }

    /// Sends the maximum flow from `source` to `sink` at minimum total cost.
    ///
    /// Successive shortest paths: every augmentation follows a cheapest path in
    /// the residual network, found with a label-correcting (SPFA) search so
    /// negative arc costs need no potentials. The network must not contain a
    /// negative-cost cycle.
    pub fn max_flow_min_cost(&mut self, source: usize, sink: usize) -> Result<FlowSummary> {
        ensure!(source < self.num_nodes() && sink < self.num_nodes());
        ensure!(source != sink, "source and sink coincide");

        let mut summary = FlowSummary {
            value: 0,
            cost: 0.,
            nits: 0,
        };
        let mut dist = vec![f64::INFINITY; self.num_nodes()];
        let mut pred_arc = vec![NONE; self.num_nodes()];

        loop {
            self.shortest_path(source, &mut dist, &mut pred_arc)?;
            if pred_arc[sink] == NONE {
                break;
            }

            // bottleneck along the path
            let mut delta = usize::MAX;
            let mut v = sink;
            while v != source {
                let arc = pred_arc[v];
                delta = delta.min(self.arcs[arc].residual);
                v = self.arcs[arc ^ 1].to;
            }
            ensure!(delta > 0 && delta != usize::MAX);

            let mut v = sink;
            while v != source {
                let arc = pred_arc[v];
                self.arcs[arc].residual -= delta;
                self.arcs[arc ^ 1].residual += delta;
                v = self.arcs[arc ^ 1].to;
            }

            summary.value = summary
                .value
                .checked_add(delta)
                .ok_or_else(|| anyhow_error!("flow value overflows usize"))?;
            summary.cost += delta as f64 * dist[sink];
            summary.nits += 1;
            trace!(
                "augmenting path {}: delta {}, path cost {}",
                summary.nits,
                delta,
                dist[sink]
            );
        }
        trace!("FLOW: {}, COST: {}", summary.value, summary.cost);
        Ok(summary)
    }

    /// Label-correcting search over residual arcs, leaving the cheapest path
    /// tree in `pred_arc`.
    fn shortest_path(&self, source: usize, dist: &mut [f64], pred_arc: &mut [usize]) -> Result<()> {
        let n = self.num_nodes();
        dist.iter_mut().for_each(|d_ref| *d_ref = f64::INFINITY);
        pred_arc.iter_mut().for_each(|p_ref| *p_ref = NONE);

        let mut in_queue = vec![false; n];
        // a node entering the queue n times proves a negative cycle
        let mut enqueued = vec![0_usize; n];
        let mut queue = VecDeque::with_capacity(n);
        dist[source] = 0.;
        queue.push_back(source);
        in_queue[source] = true;

        while let Some(u) = queue.pop_front() {
            in_queue[u] = false;
            let mut arc = self.head[u];
            while arc != NONE {
                let Arc {
                    to,
                    next,
                    residual,
                    cost,
                } = self.arcs[arc];
                if residual > 0 && dist[u] + cost < dist[to] - tolerance(dist[to]) {
                    dist[to] = dist[u] + cost;
                    pred_arc[to] = arc;
                    if !in_queue[to] {
                        enqueued[to] += 1;
                        ensure!(
                            enqueued[to] <= n,
                            "negative cost cycle through node {}",
                            to
                        );
                        queue.push_back(to);
                        in_queue[to] = true;
                    }
                }
                arc = next;
            }
        }
        Ok(())
    }
}

/// Slack scaled to the label, so rounding on large costs cannot look like
/// an improvement.
#[inline]
fn tolerance(label: f64) -> f64 {
    if label.is_finite() {
        COST_TOLERANCE * label.abs().max(1.)
    } else {
        0.
    }
}

#[cfg(test)]
mod tests {
    use super::FlowNetwork;
    use test_log::test;

    #[test]
    fn test_max_flow_min_cost_prefers_cheap_paths() {
        // 0 -> {1, 2} -> 3, the cheap branch has less capacity
        let mut network = FlowNetwork::new(4, 4);
        let cheap_in = network.add_edge(0, 1, 2, 1.).unwrap();
        let dear_in = network.add_edge(0, 2, 5, 4.).unwrap();
        network.add_edge(1, 3, 5, 1.).unwrap();
        network.add_edge(2, 3, 5, 1.).unwrap();

        let summary = network.max_flow_min_cost(0, 3).unwrap();
        assert_eq!(summary.value, 7);
        assert_eq!(summary.cost, 2. * 2. + 5. * 5.);
        assert_eq!(network.flow(cheap_in), 2);
        assert_eq!(network.flow(dear_in), 5);
        assert_eq!(network.num_edges(), 4);
    }

    #[test]
    fn test_flow_is_maximized_before_cost() {
        // a single expensive unit still has to be routed
        let mut network = FlowNetwork::new(3, 2);
        let first = network.add_edge(0, 1, 1, 0.).unwrap();
        let second = network.add_edge(1, 2, 1, 10.).unwrap();
        let summary = network.max_flow_min_cost(0, 2).unwrap();
        assert_eq!(summary.value, 1);
        assert_eq!(summary.cost, 10.);
        assert_eq!(network.flow(first), 1);
        assert_eq!(network.flow(second), 1);
    }

    #[test]
    fn test_rerouting_through_reverse_arcs() {
        // rows {1, 2}, columns {3, 4}; the greedy first path 1 -> 3 must be undone
        let mut network = FlowNetwork::new(6, 7);
        network.add_edge(0, 1, 1, 0.).unwrap();
        network.add_edge(0, 2, 1, 0.).unwrap();
        let e13 = network.add_edge(1, 3, 1, -10.).unwrap();
        let e14 = network.add_edge(1, 4, 1, -9.).unwrap();
        let e23 = network.add_edge(2, 3, 1, -9.).unwrap();
        network.add_edge(3, 5, 1, 0.).unwrap();
        network.add_edge(4, 5, 1, 0.).unwrap();

        let summary = network.max_flow_min_cost(0, 5).unwrap();
        assert_eq!(summary.value, 2);
        assert_eq!(summary.cost, -18.);
        assert_eq!(network.flow(e13), 0);
        assert_eq!(network.flow(e14), 1);
        assert_eq!(network.flow(e23), 1);
    }

    #[test]
    fn test_large_costs_do_not_look_like_cycles() {
        // two agents competing for two items, costs spanning many magnitudes
        let mut network = FlowNetwork::new(6, 8);
        network.add_edge(0, 1, 1, 0.).unwrap();
        network.add_edge(0, 2, 1, 0.).unwrap();
        let e13 = network.add_edge(1, 3, 1, -2067097275281257.3).unwrap();
        let e14 = network.add_edge(1, 4, 1, -0.1707).unwrap();
        let e23 = network.add_edge(2, 3, 1, -23109951.44).unwrap();
        let e24 = network.add_edge(2, 4, 1, -0.5514).unwrap();
        network.add_edge(3, 5, 1, 0.).unwrap();
        network.add_edge(4, 5, 1, 0.).unwrap();

        let summary = network.max_flow_min_cost(0, 5).unwrap();
        assert_eq!(summary.value, 2);
        assert_eq!(network.flow(e13), 1);
        assert_eq!(network.flow(e24), 1);
        assert_eq!(network.flow(e14) + network.flow(e23), 0);
    }

    #[test]
    fn test_disconnected_sink_gets_no_flow() {
        let mut network = FlowNetwork::new(3, 1);
        network.add_edge(0, 1, 3, -1.).unwrap();
        let summary = network.max_flow_min_cost(0, 2).unwrap();
        assert_eq!(summary.value, 0);
        assert_eq!(summary.cost, 0.);
    }

    #[test]
    fn test_invalid_edges_are_rejected() {
        let mut network = FlowNetwork::new(2, 1);
        assert!(network.add_edge(0, 2, 1, 0.).is_err());
        assert!(network.add_edge(1, 1, 1, 0.).is_err());
        assert!(network.add_edge(0, 1, 1, f64::NAN).is_err());
        assert!(network.max_flow_min_cost(0, 0).is_err());
    }

    #[test]
    fn test_negative_cycle_is_reported() {
        let mut network = FlowNetwork::new(4, 4);
        network.add_edge(0, 1, 1, 0.).unwrap();
        network.add_edge(1, 2, 1, -1.).unwrap();
        network.add_edge(2, 1, 1, -1.).unwrap();
        network.add_edge(2, 3, 1, 0.).unwrap();
        assert!(network.max_flow_min_cost(0, 3).is_err());
    }
}
