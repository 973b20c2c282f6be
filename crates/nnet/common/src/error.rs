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

//! Error types for building and inspecting computations

use crate::computation::{MatrixId, SubMatrixId};
use thiserror::Error;

/// Errors raised when a computation refers to storage that does not exist
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ComputationError {
    #[error("Matrix {0} does not exist")]
    UnknownMatrix(MatrixId),

    #[error("Submatrix {0} does not exist")]
    UnknownSubMatrix(SubMatrixId),

    #[error("Submatrix rows {row_offset}..{row_end} cols {col_offset}..{col_end} exceed matrix {matrix} of shape {num_rows}x{num_cols}")]
    SubMatrixOutOfBounds {
        matrix: MatrixId,
        row_offset: usize,
        row_end: usize,
        col_offset: usize,
        col_end: usize,
        num_rows: usize,
        num_cols: usize,
    },

    #[error("Matrix dimensions must be non-zero, got {num_rows}x{num_cols}")]
    EmptyMatrix { num_rows: usize, num_cols: usize },
}

/// Result type for computation construction
pub type ComputationResult<T> = Result<T, ComputationError>;
