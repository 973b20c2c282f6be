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

//! Plan files: a topology, a request and the computation compiled for it

use nnet_common::{ComponentTable, Computation, ComputationRequest};
use nnet_compiler::OptimizeError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors reported by the command-line tools
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Failed to access {}: {source}", path.display())]
    Io { path: PathBuf, source: std::io::Error },

    #[error("Invalid JSON in {}: {source}", path.display())]
    Json { path: PathBuf, source: serde_json::Error },

    #[error("Failed to serialize plan: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("{0}")]
    InvalidOption(String),

    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    #[error(transparent)]
    Optimize(#[from] OptimizeError),
}

/// Everything needed to optimize a computation offline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanFile {
    pub components: ComponentTable,
    #[serde(default)]
    pub request: ComputationRequest,
    pub computation: Computation,
}

impl PlanFile {
    pub fn load(path: &Path) -> Result<Self, ToolError> {
        let text = read_file(path)?;
        serde_json::from_str(&text).map_err(|source| ToolError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn to_json(&self) -> Result<String, ToolError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), ToolError> {
        fs::write(path, self.to_json()?).map_err(|source| ToolError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

pub(crate) fn read_file(path: &Path) -> Result<String, ToolError> {
    fs::read_to_string(path).map_err(|source| ToolError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// input -> copy -> copy -> output, with zeroed scratch
#[cfg(test)]
pub(crate) fn sample_plan() -> PlanFile {
    use nnet_common::{AllocKind, Command, ComponentProperties};

    let mut computation = Computation::new();
    let x = computation.add_matrix(2, 3).unwrap();
    let h = computation.add_matrix(2, 3).unwrap();
    let y = computation.add_matrix(2, 3).unwrap();
    let (sx, sh, sy) = (
        computation.add_whole_submatrix(x).unwrap(),
        computation.add_whole_submatrix(h).unwrap(),
        computation.add_whole_submatrix(y).unwrap(),
    );
    computation.push(Command::Allocate { matrix: h, kind: AllocKind::Zeroed });
    computation.push(Command::Allocate { matrix: y, kind: AllocKind::Zeroed });
    computation.push(Command::MatrixCopy { dest: sh, src: sx });
    computation.push(Command::MatrixCopy { dest: sy, src: sh });
    computation.push(Command::Deallocate { matrix: h });
    computation.bind_input("input", x, None);
    computation.bind_output("output", y, None);
    PlanFile {
        components: ComponentTable::new(vec![ComponentProperties::nonlinearity()]),
        request: ComputationRequest::default(),
        computation,
    }
}
