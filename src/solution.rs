use num_traits::{AsPrimitive, FromPrimitive, NumAssign, PrimInt, Unsigned};
use std::collections::btree_map;
use std::collections::BTreeMap;
use std::fmt::{Debug, Display};
use std::hash::Hash;

pub trait UnsignedInt:
    PrimInt
    + Unsigned
    + Display
    + Debug
    + AsPrimitive<usize>
    + AsPrimitive<f64>
    + FromPrimitive
    + NumAssign
{
}

impl UnsignedInt for u8 {}
impl UnsignedInt for u16 {}
impl UnsignedInt for u32 {}
impl UnsignedInt for u64 {}
impl UnsignedInt for usize {}

/// Identifier of an agent or an item.
///
/// Ordering is needed to sort bundles deterministically.
pub trait Id: Clone + Eq + Hash + Ord + Debug {}

impl<T: Clone + Eq + Hash + Ord + Debug> Id for T {}

///
/// Solution of the sparse weighted bipartite matching problem
///
#[derive(Debug, Clone)]
pub struct MatchingSolution<I>
where
    I: UnsignedInt,
{
    /// index i gives the column, j, matched to row i
    ///
    /// Unmatched rows are marked by MAX value of the integer type (u32::MAX for u32)
    pub row_to_column: Vec<I>,
    /// index j gives the row, i, matched to column j
    ///
    /// Unmatched columns are marked by MAX value of the integer type (u32::MAX for u32)
    pub column_to_row: Vec<I>,
    /// number of rows left unmatched because every available edge would lower the total weight
    pub num_unmatched: I,
    /// total weight of the matched edges
    pub objective: f64,
}

impl<I> MatchingSolution<I>
where
    I: UnsignedInt,
{
    pub fn new(row_capacity: usize, column_capacity: usize) -> MatchingSolution<I> {
        MatchingSolution::<I> {
            row_to_column: Vec::with_capacity(row_capacity),
            column_to_row: Vec::with_capacity(column_capacity),
            num_unmatched: I::max_value(),
            objective: f64::NAN,
        }
    }

    /// Matched (row, column) pairs in row order.
    pub fn pairs(&self) -> impl Iterator<Item = (I, I)> + '_ {
        self.row_to_column
            .iter()
            .enumerate()
            .filter(|(_, column)| **column != I::max_value())
            .filter_map(|(row, column)| I::from_usize(row).map(|row| (row, *column)))
    }
}

/// Items received by every agent.
///
/// Each agent of the solved instance has an entry, possibly empty. Bundles are
/// sorted by item identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment<K: Id> {
    bundles: BTreeMap<K, Vec<K>>,
}

impl<K: Id> Assignment<K> {
    pub(crate) fn with_agents<'a>(agents: impl IntoIterator<Item = &'a K>) -> Self
    where
        K: 'a,
    {
        Assignment {
            bundles: agents
                .into_iter()
                .map(|agent| (agent.clone(), Vec::new()))
                .collect(),
        }
    }

    pub(crate) fn push(&mut self, agent: &K, item: K) {
        if let Some(bundle) = self.bundles.get_mut(agent) {
            bundle.push(item);
        } else {
            self.bundles.insert(agent.clone(), vec![item]);
        }
    }

    pub(crate) fn sort_bundles(&mut self) {
        self.bundles
            .values_mut()
            .for_each(|bundle| bundle.sort_unstable());
    }

    /// Items given to `agent`; empty for unknown agents.
    pub fn bundle(&self, agent: &K) -> &[K] {
        self.bundles
            .get(agent)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, K, Vec<K>> {
        self.bundles.iter()
    }

    /// Number of agents.
    pub fn len(&self) -> usize {
        self.bundles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bundles.is_empty()
    }

    /// Number of assigned item units over all agents.
    pub fn num_assigned(&self) -> usize {
        self.bundles.values().map(Vec::len).sum()
    }

    pub fn into_inner(self) -> BTreeMap<K, Vec<K>> {
        self.bundles
    }
}

impl<'a, K: Id> IntoIterator for &'a Assignment<K> {
    type Item = (&'a K, &'a Vec<K>);
    type IntoIter = btree_map::Iter<'a, K, Vec<K>>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
