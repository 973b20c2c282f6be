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

//! Memory footprint of a command sequence

use nnet_common::{Command, Computation, MatrixId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Allocation counts and peak live storage of a computation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryStats {
    pub num_commands: usize,
    pub num_matrices: usize,
    /// Allocations that obtain fresh storage
    pub fresh_allocations: usize,
    /// Allocations that take over freed storage
    pub reuse_allocations: usize,
    /// Allocations that zero their storage
    pub zeroed_allocations: usize,
    /// Largest number of matrices holding storage at once
    pub peak_live_matrices: usize,
    /// Largest number of elements held at once
    pub peak_live_elements: usize,
}

impl MemoryStats {
    /// Walk the commands in order; input matrices are live from the start
    pub fn of(computation: &Computation) -> Self {
        let mut stats = MemoryStats {
            num_commands: computation.num_commands(),
            num_matrices: computation.num_matrices(),
            ..Default::default()
        };
        let size = |m: MatrixId| computation.matrices.get(m.0).map_or(0, |info| info.num_elements());

        let mut live: BTreeSet<_> = computation.bindings.iter().filter_map(|b| b.supplied()).collect();
        let mut live_elements: usize = live.iter().map(|&m| size(m)).sum();
        stats.peak_live_matrices = live.len();
        stats.peak_live_elements = live_elements;

        for command in &computation.commands {
            match command {
                Command::Allocate { matrix, kind } => {
                    if kind.is_zeroed() {
                        stats.zeroed_allocations += 1;
                    }
                    match kind.source() {
                        Some(source) => {
                            stats.reuse_allocations += 1;
                            if live.remove(&source) {
                                live_elements -= size(source);
                            }
                        }
                        None => stats.fresh_allocations += 1,
                    }
                    if live.insert(*matrix) {
                        live_elements += size(*matrix);
                    }
                }
                Command::Deallocate { matrix } => {
                    if live.remove(matrix) {
                        live_elements -= size(*matrix);
                    }
                }
                _ => continue,
            }
            stats.peak_live_matrices = stats.peak_live_matrices.max(live.len());
            stats.peak_live_elements = stats.peak_live_elements.max(live_elements);
        }
        stats
    }
}
