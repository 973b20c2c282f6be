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

//! Error types for computation optimization and compilation

use nnet_common::{ComponentId, ComputationError};
use thiserror::Error;

/// Errors that abort optimization or compilation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OptimizeError {
    #[error("Model update has already been consolidated for this computation")]
    ModelUpdateAlreadyConsolidated,

    #[error("Not implemented: {0}")]
    NotImplemented(&'static str),

    #[error("Invariant violated by {pass}: {detail}")]
    InvariantViolation { pass: String, detail: String },

    #[error("Invalid computation: {0}")]
    InvalidComputation(#[from] ComputationError),

    #[error("Component {component} is out of range (network has {num_components} components)")]
    UnknownComponent { component: ComponentId, num_components: usize },

    #[error("Compilation failed: {0}")]
    Compilation(String),
}

impl OptimizeError {
    pub fn invariant(pass: impl Into<String>, detail: impl Into<String>) -> Self {
        OptimizeError::InvariantViolation {
            pass: pass.into(),
            detail: detail.into(),
        }
    }
}

/// Result type for optimization operations
pub type OptimizeResult<T> = Result<T, OptimizeError>;
