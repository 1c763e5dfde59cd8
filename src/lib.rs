//! Optimal capacitated many-to-many assignment of items to agents.
//!
//! Every agent and every item has an integer capacity; giving an item to an
//! agent is worth the agent's value for it times the agent's entitlement. Two
//! reductions compute an optimal assignment:
//!
//! * [`NetworkFlow`] (default) solves min-cost max-flow on `s -> agents -> items -> t`.
//!   It places as many units as possible, then maximizes their weight, and by
//!   default never gives an agent an item it values negatively.
//! * [`VertexCloning`] clones agents and items once per unit of capacity and
//!   solves maximum weight bipartite matching. It maximizes total weight, and
//!   can give an agent several units of one item.
//!
//! ```
//! use many_to_many_matching::many_to_many_matching;
//! use std::collections::HashMap;
//!
//! let mut valuations = HashMap::new();
//! valuations.insert("a", HashMap::from([("x", 11.), ("y", 22.)]));
//! valuations.insert("b", HashMap::from([("x", 33.), ("y", 55.)]));
//!
//! let assignment =
//!     many_to_many_matching([("x", 3), ("y", 1)], [("a", 1), ("b", 1)], &valuations).unwrap();
//! assert_eq!(assignment.bundle(&"a"), ["x"]);
//! assert_eq!(assignment.bundle(&"b"), ["y"]);
//! ```

pub mod cloning;
pub mod error;
pub mod flow;
pub mod instance;
pub mod matching;
pub mod network;
pub mod solution;

pub use cloning::{solve_by_cloning, VertexCloning};
pub use error::{InputError, MatchingError};
pub use flow::{solve_by_flow, NetworkFlow};
pub use instance::{Instance, Valuation};
pub use solution::{Assignment, Id};

use tracing::debug;

/// Strategy turning a validated instance into an optimal assignment.
pub trait Reduction {
    fn solve<K: Id>(&self, instance: &Instance<K>) -> Result<Assignment<K>, MatchingError>;
}

/// Reduction used by [`Matcher`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Engine {
    #[default]
    NetworkFlow,
    VertexCloning,
}

/// Configured entry point for many-to-many matching.
///
/// ```
/// use many_to_many_matching::{Engine, Matcher};
///
/// let valuations = vec![vec![5., 4., 3., 2.], vec![2., 3., 4., 5.]];
/// let assignment = Matcher::new()
///     .engine(Engine::NetworkFlow)
///     .entitlement(|agent: &usize| if *agent == 0 { 2. } else { 1. })
///     .solve((0..4).map(|item| (item, 1)), [(0, 2), (1, 2)], &valuations)
///     .unwrap();
/// assert_eq!(assignment.bundle(&0), [0, 1]);
/// assert_eq!(assignment.bundle(&1), [2, 3]);
/// ```
pub struct Matcher<'e, K> {
    engine: Engine,
    allow_negative: bool,
    entitlement: Option<Box<dyn Fn(&K) -> f64 + 'e>>,
}

impl<'e, K: Id> Default for Matcher<'e, K> {
    fn default() -> Self {
        Matcher {
            engine: Engine::default(),
            allow_negative: false,
            entitlement: None,
        }
    }
}

impl<'e, K: Id> Matcher<'e, K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn engine(mut self, engine: Engine) -> Self {
        self.engine = engine;
        self
    }

    /// Lets the flow engine assign pairs of negative value. The cloning engine
    /// always considers them.
    pub fn allow_negative_value_assignments(mut self, allow: bool) -> Self {
        self.allow_negative = allow;
        self
    }

    /// Multiplier applied to all values of an agent, 1 when not set.
    pub fn entitlement(mut self, entitlement: impl Fn(&K) -> f64 + 'e) -> Self {
        self.entitlement = Some(Box::new(entitlement));
        self
    }

    /// Validates the tables and computes an assignment with the configured engine.
    pub fn solve<V>(
        &self,
        item_capacities: impl IntoIterator<Item = (K, usize)>,
        agent_capacities: impl IntoIterator<Item = (K, usize)>,
        valuations: &V,
    ) -> Result<Assignment<K>, MatchingError>
    where
        V: Valuation<K> + ?Sized,
    {
        let instance = Instance::from_tables(
            item_capacities,
            agent_capacities,
            valuations,
            |agent: &K| self.entitlement.as_ref().map_or(1., |f| f(agent)),
        )?;
        debug!(
            "matching {} agents and {} items with {:?}",
            instance.num_agents(),
            instance.num_items(),
            self.engine
        );
        match self.engine {
            Engine::NetworkFlow => NetworkFlow::new(self.allow_negative).solve(&instance),
            Engine::VertexCloning => VertexCloning.solve(&instance),
        }
    }
}

/// Computes an optimal assignment with the default configuration: flow
/// engine, unit entitlements, negative-value pairs never assigned.
pub fn many_to_many_matching<K, V>(
    item_capacities: impl IntoIterator<Item = (K, usize)>,
    agent_capacities: impl IntoIterator<Item = (K, usize)>,
    valuations: &V,
) -> Result<Assignment<K>, MatchingError>
where
    K: Id,
    V: Valuation<K> + ?Sized,
{
    Matcher::default().solve(item_capacities, agent_capacities, valuations)
}

#[cfg(test)]
pub(crate) mod testing {
    use crate::instance::Instance;
    use rand::distributions::{Distribution, Uniform};
    use rand::Rng;

    /// Whole values drawn from an integer range.
    pub struct Integral(pub Uniform<i32>);

    impl Distribution<f64> for Integral {
        fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
            self.0.sample(rng) as f64
        }
    }

    /// Fractional values of either sign spread over many orders of magnitude.
    pub struct MixedMagnitude {
        exponent: Uniform<i32>,
        mantissa: Uniform<f64>,
    }

    impl MixedMagnitude {
        pub fn new(min_exponent: i32, max_exponent: i32) -> Self {
            MixedMagnitude {
                exponent: Uniform::new_inclusive(min_exponent, max_exponent),
                mantissa: Uniform::new(1., 10.),
            }
        }
    }

    impl Distribution<f64> for MixedMagnitude {
        fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
            let magnitude = self.mantissa.sample(rng) * 10_f64.powi(self.exponent.sample(rng));
            if rng.gen_bool(0.3) {
                -magnitude
            } else {
                magnitude
            }
        }
    }

    /// Small random instance with string-free identifiers and integer values:
    /// agents are `0..num_agents`, items `100..100 + num_items`.
    pub fn random_instance<R: Rng>(
        rng: &mut R,
        max_agents: usize,
        max_items: usize,
        max_agent_capacity: usize,
        max_item_capacity: usize,
        values: Uniform<i32>,
    ) -> Instance<usize> {
        random_instance_with(
            rng,
            max_agents,
            max_items,
            max_agent_capacity,
            max_item_capacity,
            Integral(values),
        )
    }

    pub fn random_instance_with<R: Rng, D: Distribution<f64>>(
        rng: &mut R,
        max_agents: usize,
        max_items: usize,
        max_agent_capacity: usize,
        max_item_capacity: usize,
        values: D,
    ) -> Instance<usize> {
        let num_agents = rng.gen_range(1..=max_agents);
        let num_items = rng.gen_range(1..=max_items);
        let agent_capacities: Vec<usize> = (0..num_agents)
            .map(|_| rng.gen_range(0..=max_agent_capacity))
            .collect();
        let item_capacities: Vec<usize> = (0..num_items)
            .map(|_| rng.gen_range(0..=max_item_capacity))
            .collect();
        let table: Vec<f64> = (0..num_agents * num_items)
            .map(|_| values.sample(rng))
            .collect();
        Instance::from_fns(
            100..100 + num_items,
            |item| item_capacities[*item - 100],
            0..num_agents,
            |agent| agent_capacities[*agent],
            |agent, item| table[*agent * num_items + (*item - 100)],
            |_| 1.,
        )
        .unwrap()
    }

    /// Best (units, weight) over all feasible assignments where each pair is
    /// used at most `max_units(agent, item)` times, ranked by `key`.
    pub fn brute_force(
        instance: &Instance<usize>,
        max_units: &dyn Fn(usize, usize) -> usize,
        key: &dyn Fn(usize, f64) -> (usize, f64),
    ) -> (usize, f64) {
        let pairs: Vec<(usize, usize)> = (0..instance.num_agents())
            .flat_map(|a| (0..instance.num_items()).map(move |i| (a, i)))
            .collect();
        let mut agent_load = vec![0; instance.num_agents()];
        let mut item_load = vec![0; instance.num_items()];
        let mut best = None;
        search(
            instance,
            &pairs,
            0,
            (0, 0.),
            &mut agent_load,
            &mut item_load,
            max_units,
            key,
            &mut best,
        );
        best.unwrap_or((0, 0.))
    }

    #[allow(clippy::too_many_arguments)]
    fn search(
        instance: &Instance<usize>,
        pairs: &[(usize, usize)],
        next: usize,
        current: (usize, f64),
        agent_load: &mut [usize],
        item_load: &mut [usize],
        max_units: &dyn Fn(usize, usize) -> usize,
        key: &dyn Fn(usize, f64) -> (usize, f64),
        best: &mut Option<(usize, f64)>,
    ) {
        if next == pairs.len() {
            let better = match best {
                Some((units, weight)) => {
                    let (k0, k1) = key(current.0, current.1);
                    let (b0, b1) = key(*units, *weight);
                    k0 > b0 || (k0 == b0 && k1 > b1)
                }
                None => true,
            };
            if better {
                *best = Some(current);
            }
            return;
        }
        let (a, i) = pairs[next];
        let mut units = 0;
        let mut state = current;
        loop {
            search(
                instance, pairs, next + 1, state, agent_load, item_load, max_units, key, best,
            );
            if units == max_units(a, i)
                || agent_load[a] == instance.agent_capacity(a)
                || item_load[i] == instance.item_capacity(i)
            {
                break;
            }
            units += 1;
            agent_load[a] += 1;
            item_load[i] += 1;
            state = (state.0 + 1, state.1 + instance.weight(a, i));
        }
        agent_load[a] -= units;
        item_load[i] -= units;
    }
}
