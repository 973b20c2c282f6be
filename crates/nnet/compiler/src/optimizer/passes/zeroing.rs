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

//! Removal of unnecessary zero-initialization
//!
//! A zeroed allocation can become an undefined one when every variable of
//! the matrix is overwritten before anything reads it.

use crate::error::OptimizeResult;
use crate::optimizer::analysis::{AccessType, ComputationAnalysis};
use crate::optimizer::framework::pass::{OptimizationPass, OptimizationResult, PassContext};
use crate::optimizer::options::OptimizeOptions;
use nnet_common::{Command, Computation, ComputationRequest, NetworkTopology};
use tracing::debug;

pub struct ZeroingElimination {
    downgraded: usize,
}

impl Default for ZeroingElimination {
    fn default() -> Self {
        Self::new()
    }
}

impl ZeroingElimination {
    pub fn new() -> Self {
        Self { downgraded: 0 }
    }

    /// Allocations downgraded by the last run
    pub fn downgraded(&self) -> usize {
        self.downgraded
    }

    pub fn eliminate(&mut self, computation: &mut Computation, topology: &dyn NetworkTopology) -> OptimizeResult<bool> {
        let analysis = ComputationAnalysis::new(computation, topology)?;
        self.downgraded = 0;

        for index in 0..computation.num_commands() {
            let Command::Allocate { matrix, kind } = computation.commands[index] else {
                continue;
            };
            if !kind.is_zeroed() {
                continue;
            }
            let is_output = analysis.matrix(matrix).is_output;
            let written_first = analysis.variables_of(matrix).all(|accesses| match accesses.first() {
                Some(first) => first.access_type == AccessType::Write,
                None => !is_output,
            });
            if written_first {
                computation.commands[index] = Command::Allocate {
                    matrix,
                    kind: kind.without_zeroing(),
                };
                self.downgraded += 1;
                debug!(command = index, %matrix, "zeroing removed");
            }
        }
        Ok(self.downgraded > 0)
    }
}

impl OptimizationPass for ZeroingElimination {
    fn name(&self) -> &'static str {
        "remove-unnecessary-zeroing"
    }

    fn description(&self) -> &'static str {
        "Drops zero-fills that are always overwritten before being read"
    }

    fn is_enabled(&self, options: &OptimizeOptions, _request: &ComputationRequest) -> bool {
        options.initialize_undefined
    }

    fn optimize(&mut self, computation: &Computation, ctx: &PassContext<'_>) -> OptimizeResult<OptimizationResult<Computation>> {
        let mut output = computation.clone();
        let changed = self.eliminate(&mut output, ctx.topology)?;
        Ok(OptimizationResult::new(output, changed))
    }
}

/// Downgrade provably unnecessary zeroed allocations of `computation`
pub fn remove_unnecessary_zeroing(topology: &dyn NetworkTopology, computation: &mut Computation) -> OptimizeResult<()> {
    ZeroingElimination::new().eliminate(computation, topology)?;
    Ok(())
}
