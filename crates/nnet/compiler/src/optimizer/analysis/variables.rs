// Dotlanth
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Variables: the finest regions of matrices that submatrices distinguish
//!
//! Each matrix is cut along every row and column boundary of every submatrix
//! defined on it. The resulting grid cells are variables; any submatrix is
//! exactly a union of variables, so reads and writes can be tracked per
//! variable without partial overlaps.

use nnet_common::{Computation, MatrixId, SubMatrixId};
use std::ops::Range;

/// Variable identifier
pub type VariableId = usize;

/// Decomposition of every matrix of a computation into variables
#[derive(Debug, Clone)]
pub struct ComputationVariables {
    /// First variable of each matrix; one extra entry marks the end
    matrix_offsets: Vec<VariableId>,
    /// Owning matrix of each variable
    variable_matrix: Vec<MatrixId>,
    /// Variables covered by each submatrix
    submatrix_variables: Vec<Vec<VariableId>>,
}

impl ComputationVariables {
    pub fn new(computation: &Computation) -> Self {
        let num_matrices = computation.num_matrices();
        let mut row_splits: Vec<Vec<usize>> = computation.matrices.iter().map(|m| vec![0, m.num_rows]).collect();
        let mut col_splits: Vec<Vec<usize>> = computation.matrices.iter().map(|m| vec![0, m.num_cols]).collect();

        for sub in &computation.submatrices {
            if let (Some(rows), Some(cols)) = (row_splits.get_mut(sub.matrix.0), col_splits.get_mut(sub.matrix.0)) {
                rows.extend([sub.row_offset, sub.row_end()]);
                cols.extend([sub.col_offset, sub.col_end()]);
            }
        }
        for splits in row_splits.iter_mut().chain(col_splits.iter_mut()) {
            splits.sort_unstable();
            splits.dedup();
        }

        let mut matrix_offsets = Vec::with_capacity(num_matrices + 1);
        let mut variable_matrix = Vec::new();
        for m in 0..num_matrices {
            matrix_offsets.push(variable_matrix.len());
            let cells = (row_splits[m].len() - 1) * (col_splits[m].len() - 1);
            variable_matrix.extend(std::iter::repeat_n(MatrixId(m), cells));
        }
        matrix_offsets.push(variable_matrix.len());

        let submatrix_variables = computation
            .submatrices
            .iter()
            .map(|sub| {
                let m = sub.matrix.0;
                let (Some(rows), Some(cols)) = (row_splits.get(m), col_splits.get(m)) else {
                    return Vec::new();
                };
                let row_cells = cell_range(rows, sub.row_offset, sub.row_end());
                let col_cells = cell_range(cols, sub.col_offset, sub.col_end());
                let base = matrix_offsets[m];
                let stride = cols.len() - 1;
                row_cells.flat_map(|r| col_cells.clone().map(move |c| base + r * stride + c)).collect()
            })
            .collect();

        Self {
            matrix_offsets,
            variable_matrix,
            submatrix_variables,
        }
    }

    pub fn num_variables(&self) -> usize {
        self.variable_matrix.len()
    }

    pub fn variables_for_submatrix(&self, submatrix: SubMatrixId) -> &[VariableId] {
        self.submatrix_variables.get(submatrix.0).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn variables_for_matrix(&self, matrix: MatrixId) -> Range<VariableId> {
        match (self.matrix_offsets.get(matrix.0), self.matrix_offsets.get(matrix.0 + 1)) {
            (Some(&begin), Some(&end)) => begin..end,
            _ => 0..0,
        }
    }

    pub fn matrix_of(&self, variable: VariableId) -> MatrixId {
        self.variable_matrix[variable]
    }
}

/// Grid cells between the split points `begin` and `end`
fn cell_range(splits: &[usize], begin: usize, end: usize) -> Range<usize> {
    let first = splits.partition_point(|&s| s < begin);
    let last = splits.partition_point(|&s| s < end);
    first..last
}
