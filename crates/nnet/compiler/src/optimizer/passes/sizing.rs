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

//! Sizing-command motion
//!
//! Allocations move down to just before the first access of their matrix
//! and deallocations move up to just after the last one, shrinking the time
//! each matrix is live. Everything else keeps its relative order, and
//! matrices involved in a storage hand-over stay where they are.

use crate::error::{OptimizeError, OptimizeResult};
use crate::optimizer::analysis::ComputationAnalysis;
use crate::optimizer::framework::pass::{OptimizationPass, OptimizationResult, PassContext};
use crate::optimizer::options::OptimizeOptions;
use nnet_common::{Command, Computation, ComputationRequest, MatrixId, NetworkTopology};
use tracing::debug;

const PASS_NAME: &str = "move-sizing-commands";

/// Sort rank within one command slot: allocations, the command, deallocations
const BEFORE: u8 = 0;
const AT: u8 = 1;
const AFTER: u8 = 2;

pub struct SizingCommandMotion {
    moved: usize,
}

impl Default for SizingCommandMotion {
    fn default() -> Self {
        Self::new()
    }
}

impl SizingCommandMotion {
    pub fn new() -> Self {
        Self { moved: 0 }
    }

    /// Commands whose position changed in the last run
    pub fn moved(&self) -> usize {
        self.moved
    }

    pub fn reorder(&mut self, computation: &mut Computation, topology: &dyn NetworkTopology) -> OptimizeResult<bool> {
        let analysis = ComputationAnalysis::new(computation, topology)?;
        self.moved = 0;

        for (i, accesses) in analysis.matrix_accesses.iter().enumerate() {
            let m = MatrixId(i);
            if let (Some(alloc), Some(first)) = (accesses.allocate_command, accesses.first_access()) {
                if first.command < alloc {
                    return Err(OptimizeError::invariant(PASS_NAME, format!("{m} is accessed at c{} before its allocation at c{alloc}", first.command)));
                }
            }
            if let (Some(dealloc), Some(last)) = (accesses.deallocate_command, accesses.last_access()) {
                if last.command > dealloc {
                    return Err(OptimizeError::invariant(PASS_NAME, format!("{m} is accessed at c{} after its deallocation at c{dealloc}", last.command)));
                }
            }
        }

        let mut pinned = vec![false; computation.num_matrices()];
        for command in &computation.commands {
            if let Command::Allocate { matrix, kind } = command {
                if let Some(source) = kind.source() {
                    pinned[matrix.0] = true;
                    pinned[source.0] = true;
                }
            }
        }

        let keys: Vec<(usize, u8)> = computation
            .commands
            .iter()
            .enumerate()
            .map(|(index, command)| match command {
                Command::Allocate { matrix, .. } if !pinned[matrix.0] => match analysis.matrix(*matrix).first_access() {
                    Some(first) => (first.command, BEFORE),
                    None => (index, AT),
                },
                Command::Deallocate { matrix } if !pinned[matrix.0] => {
                    let accesses = analysis.matrix(*matrix);
                    match (accesses.last_access(), accesses.allocate_command) {
                        (Some(last), _) => (last.command, AFTER),
                        (None, Some(alloc)) => (alloc, AT),
                        (None, None) => (index, AT),
                    }
                }
                _ => (index, AT),
            })
            .collect();

        let mut order: Vec<usize> = (0..computation.num_commands()).collect();
        order.sort_by_key(|&i| keys[i]);
        self.moved = order.iter().enumerate().filter(|&(position, &i)| position != i).count();
        if self.moved == 0 {
            return Ok(false);
        }

        let mut commands: Vec<Option<Command>> = std::mem::take(&mut computation.commands).into_iter().map(Some).collect();
        computation.commands = order.iter().filter_map(|&i| commands[i].take()).collect();
        debug!(moved = self.moved, "sizing commands moved");
        Ok(true)
    }
}

impl OptimizationPass for SizingCommandMotion {
    fn name(&self) -> &'static str {
        PASS_NAME
    }

    fn description(&self) -> &'static str {
        "Moves allocations and deallocations next to the first and last use"
    }

    fn is_enabled(&self, options: &OptimizeOptions, _request: &ComputationRequest) -> bool {
        options.move_sizing_commands
    }

    fn optimize(&mut self, computation: &Computation, ctx: &PassContext<'_>) -> OptimizeResult<OptimizationResult<Computation>> {
        let mut output = computation.clone();
        let changed = self.reorder(&mut output, ctx.topology)?;
        Ok(OptimizationResult::new(output, changed))
    }
}

/// Move the sizing commands of `computation` next to their accesses
pub fn move_sizing_commands(topology: &dyn NetworkTopology, computation: &mut Computation) -> OptimizeResult<()> {
    SizingCommandMotion::new().reorder(computation, topology)?;
    Ok(())
}
