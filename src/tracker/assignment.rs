//! Bipartite assignment for the Tracker (§4.5): a greedy first pass for
//! uncontested cheap matches, then an exact Kuhn–Munkres (Hungarian)
//! solver over whatever is left. No crate in the retrieval pack solves
//! weighted bipartite matching, so this is hand-rolled rather than
//! fabricated as a dependency; everything else in the tracker leans on
//! `rstar` and the teacher's free-function style.

/// A large finite stand-in for a hard-gate rejection (§4.5). Using a large
/// finite sentinel rather than `f64::INFINITY` keeps the Hungarian solver's
/// potential arithmetic well-defined; callers still compare the *original*
/// cost against the acceptance threshold before trusting an assignment.
pub const REJECTED: f64 = 1.0e9;

/// Greedily commits any current observation (row) whose cheapest candidate
/// is uncontested: no other row's cheapest candidate is the same column,
/// the cost is below `max_cost`, and the altitude delta (passed alongside
/// the cost matrix as `alt_deltas`) is below `max_alt_delta`.
///
/// Returns `(assignment, unmatched_rows, unmatched_cols)` where
/// `assignment[row] = Some(col)` for committed rows.
pub fn greedy_phase(
    cost: &[Vec<f64>],
    alt_deltas: &[Vec<f64>],
    max_cost: f64,
    max_alt_delta: f64,
) -> (Vec<Option<usize>>, Vec<usize>, Vec<usize>) {
    let rows = cost.len();
    let cols = if rows == 0 { 0 } else { cost[0].len() };

    let mut best_col_for_row = vec![None; rows];
    for r in 0..rows {
        let mut best: Option<(usize, f64)> = None;
        for c in 0..cols {
            let v = cost[r][c];
            if v.is_finite() && best.map_or(true, |(_, bv)| v < bv) {
                best = Some((c, v));
            }
        }
        best_col_for_row[r] = best;
    }

    // A column is "contested" if more than one row names it as their best.
    let mut claimants: Vec<Vec<usize>> = vec![Vec::new(); cols];
    for (r, best) in best_col_for_row.iter().enumerate() {
        if let Some((c, _)) = best {
            claimants[*c].push(r);
        }
    }

    let mut assignment = vec![None; rows];
    let mut assigned_cols = vec![false; cols];
    for (c, rows_claiming) in claimants.iter().enumerate() {
        if rows_claiming.len() != 1 {
            continue;
        }
        let r = rows_claiming[0];
        let cost_val = cost[r][c];
        let alt_delta = alt_deltas[r][c];
        if cost_val < max_cost && alt_delta < max_alt_delta {
            assignment[r] = Some(c);
            assigned_cols[c] = true;
        }
    }

    let unmatched_rows: Vec<usize> = (0..rows).filter(|r| assignment[*r].is_none()).collect();
    let unmatched_cols: Vec<usize> = (0..cols).filter(|c| !assigned_cols[*c]).collect();

    (assignment, unmatched_rows, unmatched_cols)
}

/// Exact minimum-cost bipartite assignment (Kuhn–Munkres / Hungarian, O(n^3))
/// over a rectangular cost matrix. Non-square matrices are padded with
/// `REJECTED` so the algorithm always sees a square instance. Returns, for
/// each input row, `Some(col)` if assigned and the cost was not the padding
/// sentinel, else `None`.
pub fn hungarian_assign(cost: &[Vec<f64>]) -> Vec<Option<usize>> {
    let rows = cost.len();
    if rows == 0 {
        return Vec::new();
    }
    let cols = cost[0].len();
    if cols == 0 {
        return vec![None; rows];
    }

    let n = rows.max(cols);
    let mut a = vec![vec![REJECTED; n]; n];
    for (r, row) in cost.iter().enumerate() {
        for (c, &v) in row.iter().enumerate() {
            a[r][c] = if v.is_finite() { v } else { REJECTED };
        }
    }

    // Classic e-maxx style Hungarian algorithm, 1-indexed internally.
    const INF: f64 = f64::MAX / 4.0;
    let mut u = vec![0.0_f64; n + 1];
    let mut v = vec![0.0_f64; n + 1];
    let mut p = vec![0usize; n + 1]; // p[j] = row matched to column j, 0 = unmatched
    let mut way = vec![0usize; n + 1];

    for i in 1..=n {
        p[0] = i;
        let mut j0 = 0usize;
        let mut minv = vec![INF; n + 1];
        let mut used = vec![false; n + 1];
        loop {
            used[j0] = true;
            let i0 = p[j0];
            let mut delta = INF;
            let mut j1 = 0usize;
            for j in 1..=n {
                if !used[j] {
                    let cur = a[i0 - 1][j - 1] - u[i0] - v[j];
                    if cur < minv[j] {
                        minv[j] = cur;
                        way[j] = j0;
                    }
                    if minv[j] < delta {
                        delta = minv[j];
                        j1 = j;
                    }
                }
            }
            for j in 0..=n {
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

    let mut row_to_col = vec![None; n];
    for j in 1..=n {
        if p[j] != 0 {
            row_to_col[p[j] - 1] = Some(j - 1);
        }
    }

    // Padding rows/columns (indices >= the real bound) never carry a
    // genuine match; only a real (row, col) pair with a non-sentinel
    // original cost counts as an accepted assignment.
    (0..rows)
        .map(|r| match row_to_col[r] {
            Some(c) if c < cols && cost[r][c].is_finite() => Some(c),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hungarian_picks_global_minimum_over_greedy_local_choice() {
        // Row 0 prefers col 0 (cost 1) but row 1 can ONLY take col 0 (cost 2)
        // or col 1 (cost 100). The optimal assignment routes row 0 to col 1
        // so row 1 can take col 0, total cost 3 rather than leaving row 1
        // unmatched or paying 100.
        let cost = vec![vec![1.0, 5.0], vec![2.0, 100.0]];
        let assignment = hungarian_assign(&cost);
        assert_eq!(assignment, vec![Some(1), Some(0)]);
    }

    #[test]
    fn hungarian_respects_hard_gates() {
        let cost = vec![
            vec![f64::INFINITY, 10.0],
            vec![10.0, f64::INFINITY],
        ];
        let assignment = hungarian_assign(&cost);
        assert_eq!(assignment, vec![Some(1), Some(0)]);
    }

    #[test]
    fn hungarian_handles_rectangular_more_rows_than_cols() {
        let cost = vec![vec![1.0], vec![2.0], vec![3.0]];
        let assignment = hungarian_assign(&cost);
        assert_eq!(assignment.iter().filter(|a| a.is_some()).count(), 1);
        assert_eq!(assignment[0], Some(0));
    }

    #[test]
    fn greedy_phase_defers_contested_columns() {
        let cost = vec![vec![1.0, 50.0], vec![1.5, 50.0]];
        let alt = vec![vec![0.0, 0.0], vec![0.0, 0.0]];
        let (assignment, unmatched_rows, unmatched_cols) = greedy_phase(&cost, &alt, 30.0, 5.0);
        assert_eq!(assignment, vec![None, None]);
        assert_eq!(unmatched_rows, vec![0, 1]);
        assert_eq!(unmatched_cols, vec![0, 1]);
    }

    #[test]
    fn greedy_phase_commits_uncontested_cheap_match() {
        let cost = vec![vec![1.0, 50.0], vec![40.0, 2.0]];
        let alt = vec![vec![0.0, 0.0], vec![0.0, 0.0]];
        let (assignment, unmatched_rows, unmatched_cols) = greedy_phase(&cost, &alt, 30.0, 5.0);
        assert_eq!(assignment, vec![Some(0), Some(1)]);
        assert!(unmatched_rows.is_empty());
        assert!(unmatched_cols.is_empty());
    }

    #[test]
    fn greedy_phase_rejects_large_altitude_delta() {
        let cost = vec![vec![1.0]];
        let alt = vec![vec![6.0]];
        let (assignment, unmatched_rows, _) = greedy_phase(&cost, &alt, 30.0, 5.0);
        assert_eq!(assignment, vec![None]);
        assert_eq!(unmatched_rows, vec![0]);
    }
}
