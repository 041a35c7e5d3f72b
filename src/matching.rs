// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

//! Pairing of living neurons with the current frame's candidates.
//!
//! Candidate centroids and the centroids carried over from the previous
//! frame ("sentinels") are indexed together in a k-d tree. A neuron whose
//! nearest indexed point lies outside the travel bound, or is a sentinel,
//! goes unmatched. Sentinels keep a neuron from latching onto a cell that
//! was already unaccounted for in the previous frame.

use std::collections::HashSet;

use kiddo::{ImmutableKdTree, SquaredEuclidean};

use crate::config::MatchPolicy;

// What an indexed point refers to.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Slot {
    Candidate(usize),
    Sentinel,
}

/// Nearest-neighbor index over one frame's candidates plus the carry-over.
pub struct CandidateIndex {
    tree: Option<ImmutableKdTree<f64, 2>>,
    slots: Vec<Slot>,
    candidates: Vec<Option<(i32, i32)>>,
    sentinels: HashSet<(i32, i32)>,
}

impl CandidateIndex {
    /// `candidates` holds each candidate's centroid, or None for a candidate
    /// with degenerate geometry; those are not indexed. `sentinels` are the
    /// carried-over centroids.
    pub fn new(candidates: &[Option<(i32, i32)>], sentinels: &[(i32, i32)]) -> CandidateIndex {
        let mut points = Vec::<[f64; 2]>::new();
        let mut slots = Vec::<Slot>::new();
        for (ix, c) in candidates.iter().enumerate() {
            if let Some((x, y)) = c {
                points.push([*x as f64, *y as f64]);
                slots.push(Slot::Candidate(ix));
            }
        }
        for (x, y) in sentinels {
            points.push([*x as f64, *y as f64]);
            slots.push(Slot::Sentinel);
        }
        let tree = if points.is_empty() {
            None
        } else {
            Some(ImmutableKdTree::new_from_slice(&points))
        };
        CandidateIndex{tree, slots, candidates: candidates.to_vec(),
                       sentinels: sentinels.iter().copied().collect()}
    }

    /// Index of the candidate nearest to `pos` if that nearest point is a
    /// candidate strictly closer than `max_dist`. A candidate sharing its
    /// exact position with a sentinel counts as the sentinel.
    pub fn nearest_candidate(&self, pos: (i32, i32), max_dist: f64) -> Option<usize> {
        let tree = self.tree.as_ref()?;
        let nearest = tree.nearest_one::<SquaredEuclidean>(&[pos.0 as f64, pos.1 as f64]);
        if nearest.distance >= max_dist * max_dist {
            return None;
        }
        match self.slots[nearest.item as usize] {
            Slot::Sentinel => None,
            Slot::Candidate(ix) => {
                let c = self.candidates[ix]?;
                if self.sentinels.contains(&c) { None } else { Some(ix) }
            }
        }
    }

    fn candidate_position(&self, ix: usize) -> Option<(i32, i32)> {
        self.candidates[ix].filter(|c| !self.sentinels.contains(c))
    }

    pub fn num_candidates(&self) -> usize {
        self.candidates.len()
    }
}

fn distance(a: (i32, i32), b: (i32, i32)) -> f64 {
    let dx = (a.0 - b.0) as f64;
    let dy = (a.1 - b.1) as f64;
    (dx * dx + dy * dy).sqrt()
}

/// Assigns candidates to neurons at `positions`, returning for each neuron
/// the matched candidate's index.
pub fn assign(policy: MatchPolicy, index: &CandidateIndex, positions: &[(i32, i32)],
              max_dist: f64) -> Vec<Option<usize>> {
    match policy {
        MatchPolicy::Greedy => match_greedy(index, positions, max_dist),
        MatchPolicy::Optimal => match_optimal(index, positions, max_dist),
    }
}

/// Each neuron in turn takes its nearest candidate. A neuron whose nearest
/// candidate was already taken goes unmatched.
pub fn match_greedy(index: &CandidateIndex, positions: &[(i32, i32)], max_dist: f64)
                    -> Vec<Option<usize>> {
    let mut claimed = vec![false; index.num_candidates()];
    positions.iter().map(|pos| {
        let ix = index.nearest_candidate(*pos, max_dist)?;
        if claimed[ix] {
            return None;
        }
        claimed[ix] = true;
        Some(ix)
    }).collect()
}

/// Neurons whose nearest point passes the gate of [match_greedy] are
/// assigned to candidates within `max_dist` minimizing the total distance.
pub fn match_optimal(index: &CandidateIndex, positions: &[(i32, i32)], max_dist: f64)
                     -> Vec<Option<usize>> {
    let gated: Vec<usize> = (0..positions.len())
        .filter(|&n| index.nearest_candidate(positions[n], max_dist).is_some())
        .collect();
    let columns: Vec<(usize, (i32, i32))> = (0..index.num_candidates())
        .filter_map(|ix| index.candidate_position(ix).map(|c| (ix, c)))
        .collect();
    let mut result = vec![None; positions.len()];
    if gated.is_empty() || columns.is_empty() {
        return result;
    }
    let cost: Vec<Vec<f64>> = gated.iter().map(|&n| {
        columns.iter().map(|(_, c)| {
            let d = distance(positions[n], *c);
            if d < max_dist { d } else { FORBIDDEN }
        }).collect()
    }).collect();
    for (row, col) in hungarian(&cost).into_iter().enumerate() {
        if let Some(col) = col {
            if cost[row][col] < FORBIDDEN {
                result[gated[row]] = Some(columns[col].0);
            }
        }
    }
    result
}

// Cost of a pair beyond the travel bound. Larger than any feasible total.
const FORBIDDEN: f64 = 1.0e9;

// Minimum-cost assignment over a rectangular cost matrix. Returns the column
// assigned to each row; with more rows than columns, some rows stay
// unassigned.
fn hungarian(cost: &[Vec<f64>]) -> Vec<Option<usize>> {
    let rows = cost.len();
    let cols = if rows == 0 { 0 } else { cost[0].len() };
    if rows == 0 || cols == 0 {
        return vec![None; rows];
    }
    if rows > cols {
        let transposed: Vec<Vec<f64>> = (0..cols)
            .map(|c| (0..rows).map(|r| cost[r][c]).collect()).collect();
        let mut result = vec![None; rows];
        for (c, r) in hungarian(&transposed).into_iter().enumerate() {
            if let Some(r) = r {
                result[r] = Some(c);
            }
        }
        return result;
    }

    // Potentials method; 1-based with index 0 as the virtual start column.
    let (n, m) = (rows, cols);
    let mut u = vec![0.0; n + 1];
    let mut v = vec![0.0; m + 1];
    let mut p = vec![0_usize; m + 1];
    let mut way = vec![0_usize; m + 1];
    for i in 1..=n {
        p[0] = i;
        let mut j0 = 0;
        let mut minv = vec![f64::INFINITY; m + 1];
        let mut used = vec![false; m + 1];
        loop {
            used[j0] = true;
            let i0 = p[j0];
            let mut delta = f64::INFINITY;
            let mut j1 = 0;
            for j in 1..=m {
                if used[j] {
                    continue;
                }
                let cur = cost[i0 - 1][j - 1] - u[i0] - v[j];
                if cur < minv[j] {
                    minv[j] = cur;
                    way[j] = j0;
                }
                if minv[j] < delta {
                    delta = minv[j];
                    j1 = j;
                }
            }
            for j in 0..=m {
                if used[j] {
                    u[p[j]] += delta;
                    v[j] -= delta;
                } else {
                    minv[j] -= delta;
                }
            }
            j0 = j1;
            if p[j0] == 0 {
                break;
            }
        }
        loop {
            let j1 = way[j0];
            p[j0] = p[j1];
            j0 = j1;
            if j0 == 0 {
                break;
            }
        }
    }
    let mut result = vec![None; n];
    for j in 1..=m {
        if p[j] != 0 {
            result[p[j] - 1] = Some(j - 1);
        }
    }
    result
}
