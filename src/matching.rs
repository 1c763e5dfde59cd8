use crate::solution::{MatchingSolution, UnsignedInt};
use anyhow;
use anyhow::{anyhow as anyhow_error, ensure, Result};
use num_iter;
use tracing::trace;

/// Solver for maximum weight bipartite matching on sparse graphs.
///
/// Rows are matched to columns along the arcs added with [`add_value`](Self::add_value).
/// Matching is not forced: a row stays unmatched whenever every arc available
/// to it would lower the total weight, so negative weights are allowed.
///
/// Each row owns an implicit zero-weight "unmatched" column. Rows are inserted
/// one by one along a shortest augmenting path (Dijkstra over reduced costs),
/// keeping dual prices that certify optimality after every insertion.
#[derive(Clone)]
pub struct SparseMatchingSolver<I: UnsignedInt> {
    num_rows: I,
    num_cols: I,
    // dual prices of the real columns followed by the per-row unmatched columns
    prices: Vec<f64>,
    i_starts_stops: Vec<I>,
    j_counts: Vec<I>,
    column_indices: Vec<I>,
    // memory view of all values
    values: Vec<f64>,

    pub nits: u32,
}

impl<I: UnsignedInt> SparseMatchingSolver<I> {
    pub fn new(
        row_capacity: usize,
        column_capacity: usize,
        arcs_capacity: usize,
    ) -> (Self, MatchingSolution<I>) {
        (
            Self {
                num_rows: I::zero(),
                num_cols: I::zero(),
                prices: Vec::with_capacity(column_capacity + row_capacity),
                i_starts_stops: Vec::with_capacity(row_capacity + 1),
                j_counts: Vec::with_capacity(row_capacity),
                column_indices: Vec::with_capacity(arcs_capacity),
                values: Vec::with_capacity(arcs_capacity),
                nits: 0,
            },
            MatchingSolution::<I>::new(row_capacity, column_capacity),
        )
    }

    pub fn init(&mut self, num_rows: I, num_cols: I) -> Result<(), anyhow::Error> {
        ensure!(num_rows < I::max_value() && num_cols < I::max_value());
        let total_cols = num_rows
            .checked_add(&num_cols)
            .ok_or_else(|| anyhow_error!("rows and columns together exceed max value of type"))?;
        ensure!(total_cols < I::max_value());
        self.num_rows = num_rows;
        self.num_cols = num_cols;

        self.i_starts_stops.clear();
        self.i_starts_stops.resize(2, I::zero());
        self.j_counts.clear();
        self.j_counts.push(I::zero());

        self.column_indices.clear();
        self.values.clear();
        Ok(())
    }

    #[inline]
    pub fn num_rows(&self) -> I {
        self.num_rows
    }

    #[inline]
    pub fn num_cols(&self) -> I {
        self.num_cols
    }

    #[inline]
    pub fn num_of_arcs(&self) -> usize {
        self.column_indices.len()
    }

    /// Adds arc (row, column). Rows must be filled in non-decreasing order;
    /// skipped rows are left without arcs.
    #[inline]
    pub fn add_value(&mut self, row: I, column: I, value: f64) -> Result<(), anyhow::Error> {
        self.extend_from_values(row, &[column], &[value])
    }

    #[inline]
    pub fn extend_from_values(
        &mut self,
        row: I,
        columns: &[I],
        values: &[f64],
    ) -> Result<(), anyhow::Error> {
        ensure!(columns.len() == values.len());
        ensure!(row < self.num_rows, "row {} is out of range", row);
        ensure!(
            columns.iter().all(|j| *j < self.num_cols),
            "column is out of range"
        );
        ensure!(
            values.iter().all(|v| v.is_finite()),
            "arc values must be finite"
        );
        let row_usize: usize = row.as_();
        ensure!(row_usize + 1 >= self.j_counts.len(), "rows must be added in order");

        let length_increment = I::from_usize(columns.len())
            .ok_or_else(|| anyhow_error!("columns slice is longer then max value of type"))?;

        // open the rows up to `row`, inheriting the current end offset
        while self.j_counts.len() <= row_usize {
            let end = self.i_starts_stops[self.j_counts.len()];
            self.i_starts_stops.push(end);
            self.j_counts.push(I::zero());
        }

        let cumulative_offset = self.i_starts_stops[row_usize + 1]
            .checked_add(&length_increment)
            .ok_or_else(|| {
                anyhow_error!("i_starts_stops vector is longer then max value of type")
            })?;
        self.i_starts_stops[row_usize + 1] = cumulative_offset;
        self.j_counts[row_usize] += length_increment;

        self.column_indices.extend_from_slice(columns);
        self.values.extend_from_slice(values);
        Ok(())
    }

    fn validate_input(&self) -> Result<(), anyhow::Error> {
        let arcs_count = self.num_of_arcs();
        let max_arcs: usize = I::max_value().as_();
        let num_rows: usize = self.num_rows.as_();
        ensure!(arcs_count < max_arcs);
        ensure!(
            arcs_count == self.column_indices.len()
                && self.column_indices.len() == self.values.len()
        );
        ensure!(self.j_counts.len() <= num_rows || arcs_count == 0);
        Ok(())
    }

    /// Arcs of row `i` as (column, value) pairs; rows never touched have none.
    #[inline]
    fn row_arcs(&self, i: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        let (start, count) = if i < self.j_counts.len() {
            let start: usize = self.i_starts_stops[i].as_();
            let count: usize = self.j_counts[i].as_();
            (start, count)
        } else {
            (0, 0)
        };
        self.column_indices[start..start + count]
            .iter()
            .zip(self.values[start..start + count].iter())
            .map(|(j, v)| {
                let j: usize = j.as_();
                (j, *v)
            })
    }

    /// Returns total weight of matched arcs.
    pub(crate) fn get_objective(&self, solution: &MatchingSolution<I>) -> f64 {
        let mut obj = 0.;
        for i in num_iter::range(I::zero(), self.num_rows) {
            let i_usize: usize = i.as_();
            let j = solution.row_to_column[i_usize];
            if j == I::max_value() {
                // skip any unmatched
                continue;
            }
            let j_usize: usize = j.as_();
            // parallel arcs: the best one is the one a maximum matching would use
            obj += self
                .row_arcs(i_usize)
                .filter(|(l, _)| *l == j_usize)
                .map(|(_, v)| v)
                .fold(f64::NEG_INFINITY, f64::max);
        }
        obj
    }

    /// Computes a maximum weight matching.
    pub fn solve(&mut self, solution: &mut MatchingSolution<I>) -> Result<(), anyhow::Error> {
        self.validate_input()?;

        let num_rows: usize = self.num_rows.as_();
        let num_cols: usize = self.num_cols.as_();
        // column num_cols + i stands for "row i unmatched"
        let total_cols = num_cols + num_rows;

        self.nits = 0;
        self.prices.clear();
        self.prices.resize(total_cols, 0.);

        // matching of rows over all columns, including unmatched columns
        let mut row_to_col = vec![usize::MAX; num_rows];
        let mut col_to_row = vec![usize::MAX; total_cols];
        // cost (negated value) of the arc each row is matched by
        let mut row_cost = vec![0_f64; num_rows];

        let mut dist = vec![f64::INFINITY; total_cols];
        let mut pred_row = vec![usize::MAX; total_cols];
        let mut pred_cost = vec![0_f64; total_cols];
        let mut scanned = vec![false; total_cols];
        let mut touched: Vec<usize> = Vec::with_capacity(total_cols);
        let mut scanned_list: Vec<usize> = Vec::with_capacity(total_cols);

        for r in 0..num_rows {
            self.nits += 1;
            touched.clear();
            scanned_list.clear();

            self.relax_row(
                r,
                0.,
                num_cols,
                &scanned,
                &mut dist,
                &mut pred_row,
                &mut pred_cost,
                &mut touched,
            );

            let end = loop {
                // unscanned labelled column with the smallest distance
                let next = touched
                    .iter()
                    .copied()
                    .filter(|j| !scanned[*j])
                    .fold(None, |best: Option<usize>, j| match best {
                        Some(b) if dist[b] <= dist[j] => Some(b),
                        _ => Some(j),
                    })
                    .ok_or_else(|| anyhow_error!("row {} has no augmenting path", r))?;
                scanned[next] = true;
                scanned_list.push(next);

                let owner = col_to_row[next];
                if owner == usize::MAX {
                    break next;
                }
                // continue from the row currently holding `next`
                let owner_potential = row_cost[owner] - self.prices[next];
                self.relax_row(
                    owner,
                    dist[next] - owner_potential,
                    num_cols,
                    &scanned,
                    &mut dist,
                    &mut pred_row,
                    &mut pred_cost,
                    &mut touched,
                );
            };

            let path_length = dist[end];
            for k in scanned_list.iter().copied() {
                self.prices[k] += dist[k] - path_length;
            }

            // flip the alternating path ending in `end`, visiting each row at most once
            let mut j = end;
            let mut steps = 0;
            loop {
                let i = pred_row[j];
                ensure!(
                    i < num_rows && steps < num_rows,
                    "augmenting path of row {} does not lead back to it",
                    r
                );
                steps += 1;
                let previous = row_to_col[i];
                row_to_col[i] = j;
                col_to_row[j] = i;
                row_cost[i] = pred_cost[j];
                if i == r {
                    break;
                }
                j = previous;
            }
            trace!("row {} inserted, path length {}", r, path_length);

            for j in touched.iter().copied() {
                dist[j] = f64::INFINITY;
                pred_row[j] = usize::MAX;
                scanned[j] = false;
            }
        }

        solution.row_to_column.clear();
        solution.row_to_column.resize(num_rows, I::max_value());
        solution.column_to_row.clear();
        solution.column_to_row.resize(num_cols, I::max_value());
        solution.num_unmatched = I::zero();
        for (i, j) in row_to_col.into_iter().enumerate() {
            if j < num_cols {
                let i_typed = I::from_usize(i)
                    .ok_or_else(|| anyhow_error!("row {} exceeds max value of type", i))?;
                let j_typed = I::from_usize(j)
                    .ok_or_else(|| anyhow_error!("column {} exceeds max value of type", j))?;
                solution.row_to_column[i] = j_typed;
                solution.column_to_row[j] = i_typed;
            } else {
                solution.num_unmatched += I::one();
            }
        }
        solution.objective = -row_cost.iter().sum::<f64>();

        trace!("OBJECTIVE: {:?}", solution.objective);
        trace!("row_to_column: {:?}", solution.row_to_column);
        trace!("prices: {:?}", self.prices);
        Ok(())
    }

    /// Labels the unscanned columns reachable from row `i`, `base` being the
    /// distance at which the row is entered minus its dual potential.
    /// Scanned columns are settled and keep their label.
    #[allow(clippy::too_many_arguments)]
    #[inline]
    fn relax_row(
        &self,
        i: usize,
        base: f64,
        num_cols: usize,
        scanned: &[bool],
        dist: &mut [f64],
        pred_row: &mut [usize],
        pred_cost: &mut [f64],
        touched: &mut Vec<usize>,
    ) {
        let unmatched_col = num_cols + i;
        let arcs = self
            .row_arcs(i)
            .map(|(j, v)| (j, -v))
            .chain(std::iter::once((unmatched_col, 0.)));
        for (j, cost) in arcs.filter(|(j, _)| !scanned[*j]) {
            let candidate = base + cost - self.prices[j];
            if candidate < dist[j] {
                if dist[j].is_infinite() {
                    touched.push(j);
                }
                dist[j] = candidate;
                pred_row[j] = i;
                pred_cost[j] = cost;
            }
        }
    }
}
