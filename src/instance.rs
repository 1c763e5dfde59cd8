use crate::error::{InputError, MatchingError};
use crate::solution::{Assignment, Id};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::hash::BuildHasher;
use tracing::trace;

/// Table of agent-item values.
pub trait Valuation<K> {
    /// Value of `item` for `agent`, `None` if the table has no such entry.
    fn value(&self, agent: &K, item: &K) -> Option<f64>;

    /// Visits every (agent, item) pair the table mentions.
    fn for_each_pair(&self, f: &mut dyn FnMut(&K, &K));
}

impl<K, S1, S2> Valuation<K> for HashMap<K, HashMap<K, f64, S2>, S1>
where
    K: Id,
    S1: BuildHasher,
    S2: BuildHasher,
{
    fn value(&self, agent: &K, item: &K) -> Option<f64> {
        self.get(agent)?.get(item).copied()
    }

    fn for_each_pair(&self, f: &mut dyn FnMut(&K, &K)) {
        for (agent, values) in self {
            values.keys().for_each(|item| f(agent, item));
        }
    }
}

impl<K: Id> Valuation<K> for BTreeMap<K, BTreeMap<K, f64>> {
    fn value(&self, agent: &K, item: &K) -> Option<f64> {
        self.get(agent)?.get(item).copied()
    }

    fn for_each_pair(&self, f: &mut dyn FnMut(&K, &K)) {
        for (agent, values) in self {
            values.keys().for_each(|item| f(agent, item));
        }
    }
}

/// Dense matrix: row i holds the values of agent i, column j is item j.
impl Valuation<usize> for Vec<Vec<f64>> {
    fn value(&self, agent: &usize, item: &usize) -> Option<f64> {
        self.get(*agent)?.get(*item).copied()
    }

    fn for_each_pair(&self, f: &mut dyn FnMut(&usize, &usize)) {
        for (agent, row) in self.iter().enumerate() {
            (0..row.len()).for_each(|item| f(&agent, &item));
        }
    }
}

/// Validated many-to-many matching instance.
///
/// Agents and items are addressed by their position; values are stored densely,
/// row i holding agent i's values for all items.
#[derive(Debug, Clone)]
pub struct Instance<K: Id> {
    agents: Vec<K>,
    agent_capacities: Vec<usize>,
    entitlements: Vec<f64>,
    items: Vec<K>,
    item_capacities: Vec<usize>,
    values: Vec<f64>,
}

impl<K: Id> Instance<K> {
    /// Builds an instance from callables, keeping the given agent and item order.
    pub fn from_fns(
        items: impl IntoIterator<Item = K>,
        item_capacity: impl Fn(&K) -> usize,
        agents: impl IntoIterator<Item = K>,
        agent_capacity: impl Fn(&K) -> usize,
        agent_item_value: impl Fn(&K, &K) -> f64,
        agent_entitlement: impl Fn(&K) -> f64,
    ) -> Result<Self, MatchingError> {
        let items: Vec<K> = items.into_iter().collect();
        let agents: Vec<K> = agents.into_iter().collect();
        ensure_unique(&agents, InputError::DuplicateAgent)?;
        ensure_unique(&items, InputError::DuplicateItem)?;

        let item_capacities = items.iter().map(&item_capacity).collect();
        let agent_capacities = agents.iter().map(&agent_capacity).collect();
        let mut entitlements = Vec::with_capacity(agents.len());
        let mut values = Vec::with_capacity(agents.len() * items.len());
        for agent in agents.iter() {
            let entitlement = agent_entitlement(agent);
            if !entitlement.is_finite() {
                return Err(InputError::NonFiniteEntitlement {
                    agent: format!("{:?}", agent),
                    value: entitlement,
                }
                .into());
            }
            entitlements.push(entitlement);
            for item in items.iter() {
                let value = agent_item_value(agent, item);
                if !value.is_finite() {
                    return Err(InputError::NonFiniteValue {
                        agent: format!("{:?}", agent),
                        item: format!("{:?}", item),
                        value,
                    }
                    .into());
                }
                values.push(value);
            }
        }
        trace!(
            "instance with {} agents and {} items",
            agents.len(),
            items.len()
        );

        Ok(Instance {
            agents,
            agent_capacities,
            entitlements,
            items,
            item_capacities,
            values,
        })
    }

    /// Builds an instance from capacity tables and a valuation.
    ///
    /// Agents and items are sorted by identifier. Every pair mentioned by the
    /// valuation must have both endpoints in the capacity tables, and every
    /// (agent, item) pair of the tables must have a value.
    pub fn from_tables<V>(
        item_capacities: impl IntoIterator<Item = (K, usize)>,
        agent_capacities: impl IntoIterator<Item = (K, usize)>,
        valuations: &V,
        agent_entitlement: impl Fn(&K) -> f64,
    ) -> Result<Self, MatchingError>
    where
        V: Valuation<K> + ?Sized,
    {
        let item_capacities = collect_capacities(item_capacities, InputError::DuplicateItem)?;
        let agent_capacities = collect_capacities(agent_capacities, InputError::DuplicateAgent)?;

        let mut unknown = None;
        valuations.for_each_pair(&mut |agent, item| {
            if unknown.is_some() {
                return;
            }
            if !agent_capacities.contains_key(agent) {
                unknown = Some(InputError::UnknownAgent(format!("{:?}", agent)));
            } else if !item_capacities.contains_key(item) {
                unknown = Some(InputError::UnknownItem(format!("{:?}", item)));
            }
        });
        if let Some(err) = unknown {
            return Err(err.into());
        }

        for agent in agent_capacities.keys() {
            for item in item_capacities.keys() {
                if valuations.value(agent, item).is_none() {
                    return Err(InputError::MissingValue {
                        agent: format!("{:?}", agent),
                        item: format!("{:?}", item),
                    }
                    .into());
                }
            }
        }

        Instance::from_fns(
            item_capacities.keys().cloned(),
            |item| item_capacities[item],
            agent_capacities.keys().cloned(),
            |agent| agent_capacities[agent],
            |agent, item| valuations.value(agent, item).unwrap_or(f64::NAN),
            agent_entitlement,
        )
    }

    #[inline]
    pub fn num_agents(&self) -> usize {
        self.agents.len()
    }

    #[inline]
    pub fn num_items(&self) -> usize {
        self.items.len()
    }

    pub fn agents(&self) -> &[K] {
        &self.agents
    }

    pub fn items(&self) -> &[K] {
        &self.items
    }

    #[inline]
    pub fn agent_capacity(&self, agent: usize) -> usize {
        self.agent_capacities[agent]
    }

    #[inline]
    pub fn item_capacity(&self, item: usize) -> usize {
        self.item_capacities[item]
    }

    #[inline]
    pub fn entitlement(&self, agent: usize) -> f64 {
        self.entitlements[agent]
    }

    #[inline]
    pub fn value(&self, agent: usize, item: usize) -> f64 {
        self.values[agent * self.items.len() + item]
    }

    /// Entitlement-weighted value of giving `item` to `agent`.
    #[inline]
    pub fn weight(&self, agent: usize, item: usize) -> f64 {
        self.value(agent, item) * self.entitlements[agent]
    }

    /// Total weight of an assignment, counting repeated units.
    ///
    /// Pairs that are not part of the instance contribute nothing.
    pub fn objective(&self, assignment: &Assignment<K>) -> f64 {
        let agent_idx = position_map(&self.agents);
        let item_idx = position_map(&self.items);
        assignment
            .iter()
            .filter_map(|(agent, bundle)| agent_idx.get(agent).map(|a| (*a, bundle)))
            .flat_map(|(a, bundle)| {
                bundle
                    .iter()
                    .filter_map(|item| item_idx.get(item))
                    .map(move |i| self.weight(a, *i))
            })
            .sum()
    }

    /// Checks that the assignment only uses known identifiers and respects
    /// agent and item capacities.
    pub fn verify(&self, assignment: &Assignment<K>) -> Result<(), MatchingError> {
        let agent_idx = position_map(&self.agents);
        let item_idx = position_map(&self.items);
        let mut item_load = vec![0_usize; self.items.len()];
        for (agent, bundle) in assignment {
            let a = *agent_idx.get(agent).ok_or_else(|| {
                MatchingError::SolverInvariantViolation(format!(
                    "assignment mentions unknown agent {:?}",
                    agent
                ))
            })?;
            if bundle.len() > self.agent_capacities[a] {
                return Err(MatchingError::SolverInvariantViolation(format!(
                    "agent {:?} receives {} items but its capacity is {}",
                    agent,
                    bundle.len(),
                    self.agent_capacities[a]
                )));
            }
            for item in bundle {
                let i = *item_idx.get(item).ok_or_else(|| {
                    MatchingError::SolverInvariantViolation(format!(
                        "agent {:?} receives unknown item {:?}",
                        agent, item
                    ))
                })?;
                item_load[i] += 1;
            }
        }
        for (i, load) in item_load.into_iter().enumerate() {
            if load > self.item_capacities[i] {
                return Err(MatchingError::SolverInvariantViolation(format!(
                    "item {:?} is assigned {} times but its capacity is {}",
                    self.items[i], load, self.item_capacities[i]
                )));
            }
        }
        Ok(())
    }
}

fn position_map<K: Id>(ids: &[K]) -> HashMap<&K, usize> {
    ids.iter().enumerate().map(|(idx, id)| (id, idx)).collect()
}

fn ensure_unique<K: Id>(ids: &[K], err: fn(String) -> InputError) -> Result<(), MatchingError> {
    let mut seen = HashSet::with_capacity(ids.len());
    match ids.iter().find(|id| !seen.insert(*id)) {
        Some(id) => Err(err(format!("{:?}", id)).into()),
        None => Ok(()),
    }
}

fn collect_capacities<K: Id>(
    capacities: impl IntoIterator<Item = (K, usize)>,
    err: fn(String) -> InputError,
) -> Result<BTreeMap<K, usize>, MatchingError> {
    let mut out = BTreeMap::new();
    for (id, capacity) in capacities {
        let repr = format!("{:?}", id);
        if out.insert(id, capacity).is_some() {
            return Err(err(repr).into());
        }
    }
    Ok(out)
}
