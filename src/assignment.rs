//! Optimal bipartite assignment (Hungarian / Kuhn-Munkres algorithm).
//!
//! Used by the Mahalanobis voting path where greedy matching can pick a
//! locally good but globally suboptimal pairing.

use std::collections::VecDeque;

const ZERO_EPS: f64 = 1e-10;

/// A row/column pair produced by the solver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assignment {
    pub row: usize,
    pub col: usize,
}

/// Result of the linear sum assignment problem.
#[derive(Debug, Clone)]
pub struct AssignmentResult {
    /// Accepted (row, col) pairs with cost <= the threshold.
    pub assignments: Vec<Assignment>,
    /// Rows left without an accepted assignment.
    pub unmatched_rows: Vec<usize>,
    /// Columns left without an accepted assignment.
    pub unmatched_cols: Vec<usize>,
}

/// Solves the minimum-cost assignment over a rectangular matrix.
///
/// Assignments whose cost exceeds `max_cost` are rejected and their row
/// and column reported as unmatched.
pub fn linear_sum_assignment(cost_matrix: &[Vec<f64>], max_cost: f64) -> AssignmentResult {
    let n_rows = cost_matrix.len();
    let n_cols = cost_matrix.first().map(Vec::len).unwrap_or(0);

    if n_rows == 0 || n_cols == 0 {
        return AssignmentResult {
            assignments: Vec::new(),
            unmatched_rows: (0..n_rows).collect(),
            unmatched_cols: (0..n_cols).collect(),
        };
    }

    let row_assignment = solve_square(cost_matrix, n_rows, n_cols);

    let mut assignments = Vec::new();
    let mut row_matched = vec![false; n_rows];
    let mut col_matched = vec![false; n_cols];

    for (row, col) in row_assignment.iter().enumerate() {
        if let Some(col) = *col {
            if col < n_cols && cost_matrix[row][col] <= max_cost {
                assignments.push(Assignment { row, col });
                row_matched[row] = true;
                col_matched[col] = true;
            }
        }
    }

    AssignmentResult {
        assignments,
        unmatched_rows: (0..n_rows).filter(|&i| !row_matched[i]).collect(),
        unmatched_cols: (0..n_cols).filter(|&j| !col_matched[j]).collect(),
    }
}

/// Core Hungarian algorithm on the matrix padded to square shape.
/// Returns the column assigned to each original row.
fn solve_square(cost_matrix: &[Vec<f64>], n_rows: usize, n_cols: usize) -> Vec<Option<usize>> {
    let n = n_rows.max(n_cols);
    let mut cost = vec![vec![0.0; n]; n];
    for (i, row) in cost_matrix.iter().enumerate() {
        cost[i][..n_cols].copy_from_slice(&row[..n_cols]);
    }

    // row and column reduction
    for row in cost.iter_mut() {
        let min = row.iter().cloned().fold(f64::INFINITY, f64::min);
        if min.is_finite() {
            row.iter_mut().for_each(|c| *c -= min);
        }
    }
    for j in 0..n {
        let min = (0..n).map(|i| cost[i][j]).fold(f64::INFINITY, f64::min);
        if min.is_finite() {
            (0..n).for_each(|i| cost[i][j] -= min);
        }
    }

    let mut row_match: Vec<Option<usize>> = vec![None; n];
    let mut col_match: Vec<Option<usize>> = vec![None; n];

    // greedy seeding on the initial zeros
    for i in 0..n {
        for j in 0..n {
            if cost[i][j].abs() < ZERO_EPS && row_match[i].is_none() && col_match[j].is_none() {
                row_match[i] = Some(j);
                col_match[j] = Some(i);
            }
        }
    }

    loop {
        let free_rows: Vec<usize> = (0..n).filter(|&i| row_match[i].is_none()).collect();
        if free_rows.is_empty() {
            break;
        }

        // search for an augmenting path over the zero entries
        let mut augmented = false;
        for &start in &free_rows {
            let mut parent_col: Vec<Option<usize>> = vec![None; n];
            let mut col_visited = vec![false; n];
            let mut queue: VecDeque<usize> = VecDeque::from([start]);
            let mut end_col = None;

            'bfs: while let Some(row) = queue.pop_front() {
                for col in 0..n {
                    if col_visited[col] || cost[row][col].abs() >= ZERO_EPS {
                        continue;
                    }
                    col_visited[col] = true;
                    parent_col[col] = Some(row);

                    match col_match[col] {
                        None => {
                            end_col = Some(col);
                            break 'bfs;
                        }
                        Some(next_row) => queue.push_back(next_row),
                    }
                }
            }

            if let Some(mut col) = end_col {
                loop {
                    let row = parent_col[col].unwrap();
                    let prev = row_match[row];
                    row_match[row] = Some(col);
                    col_match[col] = Some(row);
                    match prev {
                        Some(prev_col) => col = prev_col,
                        None => break,
                    }
                }
                augmented = true;
                break;
            }
        }

        if augmented {
            continue;
        }

        // no augmenting path: rebalance the matrix to expose new zeros
        let mut row_covered = vec![false; n];
        let mut col_covered = vec![false; n];
        let mut stack = free_rows.clone();
        while let Some(row) = stack.pop() {
            if row_covered[row] {
                continue;
            }
            row_covered[row] = true;
            for col in 0..n {
                if cost[row][col].abs() < ZERO_EPS && !col_covered[col] {
                    col_covered[col] = true;
                    if let Some(matched_row) = col_match[col] {
                        stack.push(matched_row);
                    }
                }
            }
        }

        let mut min_uncovered = f64::INFINITY;
        for i in 0..n {
            if !row_covered[i] {
                continue;
            }
            for j in 0..n {
                if !col_covered[j] {
                    min_uncovered = min_uncovered.min(cost[i][j]);
                }
            }
        }

        if !min_uncovered.is_finite() || min_uncovered <= 0.0 {
            break;
        }

        for i in 0..n {
            for j in 0..n {
                if row_covered[i] && !col_covered[j] {
                    cost[i][j] -= min_uncovered;
                } else if !row_covered[i] && col_covered[j] {
                    cost[i][j] += min_uncovered;
                }
            }
        }
    }

    row_match.truncate(n_rows);
    row_match
}
