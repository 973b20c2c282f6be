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

//! Allocation reuse
//!
//! A deallocation followed closely by an allocation of the same shape is
//! turned into a storage hand-over, so the allocator is not asked for memory
//! it just got back.

use super::cleanup::remove_no_ops;
use crate::error::{OptimizeError, OptimizeResult};
use crate::optimizer::analysis::ComputationAnalysis;
use crate::optimizer::framework::pass::{OptimizationPass, OptimizationResult, PassContext};
use crate::optimizer::options::OptimizeOptions;
use nnet_common::{Command, Computation, ComputationRequest, MatrixId, NetworkTopology};
use tracing::{debug, warn};

pub struct AllocationReuse {
    reused: usize,
}

impl Default for AllocationReuse {
    fn default() -> Self {
        Self::new()
    }
}

impl AllocationReuse {
    pub fn new() -> Self {
        Self { reused: 0 }
    }

    /// Allocations turned into hand-overs by the last run
    pub fn reused(&self) -> usize {
        self.reused
    }

    /// Pair allocations with deallocations inside runs of sizing commands
    pub fn pair(&mut self, computation: &mut Computation, topology: &dyn NetworkTopology) -> OptimizeResult<bool> {
        let analysis = ComputationAnalysis::new(computation, topology)?;
        self.reused = 0;

        // deallocations of the current run not yet taken over, oldest first
        let mut pending: Vec<(usize, MatrixId)> = Vec::new();
        for index in 0..computation.num_commands() {
            match computation.commands[index] {
                Command::Deallocate { matrix } => {
                    if !analysis.matrix(matrix).is_output {
                        pending.push((index, matrix));
                    }
                }
                Command::Allocate { matrix, kind } => {
                    if kind.is_reuse() {
                        continue;
                    }
                    let shape = computation.matrices[matrix.0].shape();
                    let Some(position) = pending.iter().rposition(|(_, m)| computation.matrices[m.0].shape() == shape) else {
                        continue;
                    };
                    let (dealloc, source) = pending.remove(position);
                    computation.commands[dealloc] = Command::NoOperation;
                    computation.commands[index] = Command::Allocate {
                        matrix,
                        kind: kind.reusing(source),
                    };
                    self.reused += 1;
                    debug!(command = index, %matrix, %source, "allocation reuses freed storage");
                }
                Command::NoOperation => {}
                _ => pending.clear(),
            }
        }

        if self.reused == 0 {
            return Ok(false);
        }
        remove_no_ops(computation);
        Ok(true)
    }
}

impl OptimizationPass for AllocationReuse {
    fn name(&self) -> &'static str {
        "remove-unnecessary-allocation"
    }

    fn description(&self) -> &'static str {
        "Hands freed storage straight to the next allocation of the same shape"
    }

    fn is_enabled(&self, options: &OptimizeOptions, _request: &ComputationRequest) -> bool {
        options.allocate_from_other
    }

    fn optimize(&mut self, computation: &Computation, ctx: &PassContext<'_>) -> OptimizeResult<OptimizationResult<Computation>> {
        let mut output = computation.clone();
        let changed = self.pair(&mut output, ctx.topology)?;
        Ok(OptimizationResult::new(output, changed))
    }
}

/// Replace deallocate/allocate pairs of equal shape with storage hand-overs
pub fn remove_unnecessary_allocation(topology: &dyn NetworkTopology, computation: &mut Computation) -> OptimizeResult<()> {
    AllocationReuse::new().pair(computation, topology)?;
    Ok(())
}

/// Merge matrices with disjoint lifetimes into shared storage
///
/// Not implemented; always fails and leaves `computation` untouched.
pub fn consolidate_matrices(_topology: &dyn NetworkTopology, allow_unnecessary_zeroing: bool, _computation: &mut Computation) -> OptimizeResult<()> {
    warn!(allow_unnecessary_zeroing, "matrix consolidation requested but not implemented");
    Err(OptimizeError::NotImplemented("matrix consolidation"))
}
