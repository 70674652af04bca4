//! # Optimal assignment
//!
//! Minimum cost bipartite matching by shortest augmenting paths (the Hungarian method with dual
//! potentials, in the Jonker-Volgenant family). Runs in `O(n^2 m)` for an `n x m` matrix with
//! `n <= m`. Wider-than-tall problems are solved on the transpose.
//!
//! All comparisons are strict so that, between equal cost alternatives, the lowest row and
//! column indices win. This makes the result deterministic for a given matrix.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use ndarray::{ArrayView2, Axis};
use thiserror::Error;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A matched row and column of the cost matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pair {
    pub row: usize,
    pub col: usize,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum AssignmentError {
    #[error("Cost matrix contains a non-finite value at ({0}, {1})")]
    NonFiniteCost(usize, usize),

    #[error("No augmenting path found for row {0}")]
    NoAugmentingPath(usize),
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Solve the assignment problem for the given cost matrix.
///
/// Every row is matched if there are at least as many columns as rows, otherwise every column
/// is. The returned pairs are sorted by row.
pub fn solve(cost: ArrayView2<f64>) -> Result<Vec<Pair>, AssignmentError> {
    let (rows, cols) = cost.dim();

    if rows == 0 || cols == 0 {
        return Ok(Vec::new())
    }

    if let Some(((r, c), _)) = cost.indexed_iter().find(|(_, v)| !v.is_finite()) {
        return Err(AssignmentError::NonFiniteCost(r, c))
    }

    let mut pairs = if rows <= cols {
        solve_tall(cost)?
    }
    else {
        solve_tall(cost.reversed_axes())?
            .into_iter()
            .map(|p| Pair { row: p.col, col: p.row })
            .collect()
    };

    pairs.sort_by_key(|p| p.row);

    Ok(pairs)
}

/// Remove pairs whose cost exceeds the gate.
///
/// Returns the kept pairs and the number which were rejected.
pub fn gate(pairs: Vec<Pair>, cost: ArrayView2<f64>, threshold: f64) -> (Vec<Pair>, usize) {
    let num_pairs = pairs.len();

    let kept: Vec<Pair> = pairs.into_iter()
        .filter(|p| cost.get((p.row, p.col)).map(|c| *c <= threshold).unwrap_or(false))
        .collect();

    let num_rejected = num_pairs - kept.len();
    (kept, num_rejected)
}

/// Total cost of the given pairs.
pub fn total_cost(pairs: &[Pair], cost: ArrayView2<f64>) -> f64 {
    pairs.iter()
        .filter_map(|p| cost.get((p.row, p.col)))
        .sum()
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// Solve for a matrix with no more rows than columns.
///
/// Uses 1-based indices internally, index 0 of the column arrays is a virtual column used as the
/// root of each augmenting path.
fn solve_tall(cost: ArrayView2<f64>) -> Result<Vec<Pair>, AssignmentError> {
    let n = cost.len_of(Axis(0));
    let m = cost.len_of(Axis(1));

    // Row and column potentials
    let mut u = vec![0f64; n + 1];
    let mut v = vec![0f64; m + 1];

    // Row assigned to each column, 0 when free
    let mut p = vec![0usize; m + 1];

    // Previous column on the current augmenting path
    let mut way = vec![0usize; m + 1];

    for i in 1..=n {
        p[0] = i;
        let mut j0 = 0usize;
        let mut min_v = vec![f64::INFINITY; m + 1];
        let mut used = vec![false; m + 1];

        // Grow the shortest path tree until a free column is reached
        loop {
            used[j0] = true;
            let i0 = p[j0];
            let mut delta = f64::INFINITY;
            let mut j1 = 0usize;

            for j in 1..=m {
                if used[j] {
                    continue
                }

                let reduced = cost[[i0 - 1, j - 1]] - u[i0] - v[j];
                if reduced < min_v[j] {
                    min_v[j] = reduced;
                    way[j] = j0;
                }
                if min_v[j] < delta {
                    delta = min_v[j];
                    j1 = j;
                }
            }

            if j1 == 0 {
                return Err(AssignmentError::NoAugmentingPath(i - 1))
            }

            for j in 0..=m {
                if used[j] {
                    u[p[j]] += delta;
                    v[j] -= delta;
                }
                else {
                    min_v[j] -= delta;
                }
            }

            j0 = j1;
            if p[j0] == 0 {
                break
            }
        }

        // Flip the assignments along the path
        loop {
            let j1 = way[j0];
            p[j0] = p[j1];
            j0 = j1;
            if j0 == 0 {
                break
            }
        }
    }

    Ok((1..=m)
        .filter(|&j| p[j] != 0)
        .map(|j| Pair { row: p[j] - 1, col: j - 1 })
        .collect())
}

#[cfg(test)]
mod test {
    use super::*;
    use ndarray::{array, Array2};

    fn pairs(v: &[(usize, usize)]) -> Vec<Pair> {
        v.iter().map(|&(row, col)| Pair { row, col }).collect()
    }

    #[test]
    fn test_square() {
        let c = array![
            [4.0, 1.0, 3.0],
            [2.0, 0.0, 5.0],
            [3.0, 2.0, 2.0]
        ];

        let p = solve(c.view()).unwrap();
        assert_eq!(p, pairs(&[(0, 1), (1, 0), (2, 2)]));
        assert_eq!(total_cost(&p, c.view()), 5.0);
    }

    #[test]
    fn test_rectangular() {
        // More columns than rows
        let c = array![
            [10.0, 1.0, 7.0, 3.0],
            [2.0, 8.0, 9.0, 1.5]
        ];
        assert_eq!(solve(c.view()).unwrap(), pairs(&[(0, 1), (1, 3)]));

        // More rows than columns
        let t = c.t();
        assert_eq!(solve(t).unwrap(), pairs(&[(1, 0), (3, 1)]));
    }

    #[test]
    fn test_ties_prefer_lowest_indices() {
        let c = Array2::from_elem((2, 2), 1.0);
        assert_eq!(solve(c.view()).unwrap(), pairs(&[(0, 0), (1, 1)]));

        let c = Array2::from_elem((1, 3), 0.0);
        assert_eq!(solve(c.view()).unwrap(), pairs(&[(0, 0)]));
    }

    #[test]
    fn test_empty_and_invalid() {
        assert!(solve(Array2::<f64>::zeros((0, 3)).view()).unwrap().is_empty());
        assert!(solve(Array2::<f64>::zeros((3, 0)).view()).unwrap().is_empty());

        let c = array![[1.0, f64::NAN]];
        assert_eq!(solve(c.view()), Err(AssignmentError::NonFiniteCost(0, 1)));
    }

    #[test]
    fn test_gate() {
        let c = array![[1.0, 100.0], [100.0, 80.0]];
        let p = solve(c.view()).unwrap();
        let (kept, rejected) = gate(p, c.view(), 60.0);

        assert_eq!(kept, pairs(&[(0, 0)]));
        assert_eq!(rejected, 1);
    }

    #[test]
    fn test_optimal_against_brute_force() {
        // Small pseudo-random matrices, checked against every permutation
        let mut seed = 12345u64;
        let mut next = || {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            ((seed >> 33) % 1000) as f64 / 10.0
        };

        for _ in 0..20 {
            let c = Array2::from_shape_fn((4, 4), |_| next());
            let p = solve(c.view()).unwrap();

            // Partial bijection
            let mut cols: Vec<usize> = p.iter().map(|p| p.col).collect();
            cols.sort_unstable();
            cols.dedup();
            assert_eq!(cols.len(), 4);

            let best = permutations(4)
                .iter()
                .map(|perm| perm.iter().enumerate().map(|(r, &c_)| c[[r, c_]]).sum::<f64>())
                .fold(f64::INFINITY, f64::min);

            assert!((total_cost(&p, c.view()) - best).abs() < 1e-9);
        }
    }

    fn permutations(n: usize) -> Vec<Vec<usize>> {
        if n == 0 {
            return vec![vec![]]
        }
        let mut out = Vec::new();
        for perm in permutations(n - 1) {
            for i in 0..=perm.len() {
                let mut p = perm.clone();
                p.insert(i, n - 1);
                out.push(p);
            }
        }
        out
    }
}
