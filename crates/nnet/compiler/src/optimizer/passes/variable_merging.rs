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

//! Variable merging
//!
//! Eliminates copies and runs in-place-capable operations in place by
//! letting one matrix take over the storage of another. A command that reads
//! `s1` and writes `s2` can share storage between their matrices when it is
//! the last access of the first and the first (pure write) access of the
//! second. In a left merge the written matrix disappears into region `s1` of
//! the read one; in a right merge the read matrix disappears into region
//! `s2` of the written one.

use super::cleanup::{remove_no_ops, renumber};
use crate::error::OptimizeResult;
use crate::optimizer::analysis::{Access, AccessType, ComputationAnalysis, MatrixAccesses, accesses::component_properties};
use crate::optimizer::framework::pass::{OptimizationPass, OptimizationResult, PassContext};
use crate::optimizer::options::OptimizeOptions;
use nnet_common::{AllocKind, Command, Computation, ComputationRequest, MatrixId, NetworkTopology, SubMatrixId};
use tracing::debug;

/// Statistics about merged variables
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MergeStats {
    pub left_merges: usize,
    pub right_merges: usize,
    /// Copy commands deleted after their operands were merged
    pub assignments_removed: usize,
    /// Sweeps that merged at least one pair
    pub sweeps: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MergeDirection {
    Left,
    Right,
}

/// Storage-sharing pass for copies and in-place operations
pub struct VariableMerging {
    stats: MergeStats,
}

impl Default for VariableMerging {
    fn default() -> Self {
        Self::new()
    }
}

impl VariableMerging {
    pub fn new() -> Self {
        Self { stats: MergeStats::default() }
    }

    /// Statistics of the last run
    pub fn stats(&self) -> &MergeStats {
        &self.stats
    }

    /// Merge until a sweep finds nothing more, then clean up
    pub fn merge(&mut self, computation: &mut Computation, options: &OptimizeOptions, topology: &dyn NetworkTopology) -> OptimizeResult<bool> {
        self.stats = MergeStats::default();
        loop {
            let analysis = ComputationAnalysis::new(computation, topology)?;
            if !self.sweep(computation, &analysis, options, topology)? {
                break;
            }
            self.stats.sweeps += 1;
        }

        let changed = self.stats.left_merges + self.stats.right_merges > 0;
        if changed {
            remove_no_ops(computation);
            renumber(computation);
        }
        debug!(
            left = self.stats.left_merges,
            right = self.stats.right_merges,
            assignments_removed = self.stats.assignments_removed,
            sweeps = self.stats.sweeps,
            "variable merging finished"
        );
        Ok(changed)
    }

    /// One pass over the commands; each matrix takes part in at most one merge
    fn sweep(&mut self, computation: &mut Computation, analysis: &ComputationAnalysis, options: &OptimizeOptions, topology: &dyn NetworkTopology) -> OptimizeResult<bool> {
        let mut dirty = vec![false; computation.num_matrices()];
        let mut merged = false;

        for index in 0..computation.num_commands() {
            let Some((s1, s2)) = merge_candidate(&computation.commands[index], options, topology)? else {
                continue;
            };
            let m1 = computation.submatrices[s1.0].matrix;
            let m2 = computation.submatrices[s2.0].matrix;
            if m1 == m2 || dirty[m1.0] || dirty[m2.0] {
                continue;
            }
            let Some(direction) = merge_direction(computation, analysis, options, index, s1, s2) else {
                continue;
            };
            match direction {
                MergeDirection::Left => self.left_merge(computation, analysis, index, s1, s2),
                MergeDirection::Right => self.right_merge(computation, analysis, index, s1, s2),
            }
            self.remove_assignment(computation, index);
            dirty[m1.0] = true;
            dirty[m2.0] = true;
            merged = true;
        }
        Ok(merged)
    }

    /// `m2` becomes region `s1` of `m1`
    fn left_merge(&mut self, computation: &mut Computation, analysis: &ComputationAnalysis, index: usize, s1: SubMatrixId, s2: SubMatrixId) {
        let region = computation.submatrices[s1.0];
        let (m1, m2) = (region.matrix, computation.submatrices[s2.0].matrix);
        retarget(computation, m2, m1, region.row_offset, region.col_offset);

        let (a1, a2) = (analysis.matrix(m1), analysis.matrix(m2));
        if let Some(c) = a2.allocate_command {
            computation.commands[c] = Command::NoOperation;
        }
        if let Some(c) = a1.deallocate_command {
            computation.commands[c] = Command::NoOperation;
        }
        if let Some(c) = a2.deallocate_command {
            computation.commands[c] = Command::Deallocate { matrix: m1 };
        }
        for binding in &mut computation.bindings {
            binding.map_matrices(|m| if m == m2 { m1 } else { m });
        }

        self.stats.left_merges += 1;
        debug!(command = index, kept = %m1, eliminated = %m2, "left merge");
    }

    /// `m1` becomes region `s2` of `m2`
    fn right_merge(&mut self, computation: &mut Computation, analysis: &ComputationAnalysis, index: usize, s1: SubMatrixId, s2: SubMatrixId) {
        let region = computation.submatrices[s2.0];
        let (m1, m2) = (computation.submatrices[s1.0].matrix, region.matrix);
        retarget(computation, m1, m2, region.row_offset, region.col_offset);

        let (a1, a2) = (analysis.matrix(m1), analysis.matrix(m2));
        let zeroed = [a1.allocate_command, a2.allocate_command]
            .into_iter()
            .flatten()
            .any(|c| matches!(&computation.commands[c], Command::Allocate { kind, .. } if kind.is_zeroed()));
        if let Some(c) = a2.allocate_command {
            computation.commands[c] = Command::NoOperation;
        }
        if let Some(c) = a1.allocate_command {
            let kind = if zeroed { AllocKind::Zeroed } else { AllocKind::Undefined };
            computation.commands[c] = Command::Allocate { matrix: m2, kind };
        }
        if let Some(c) = a1.deallocate_command {
            computation.commands[c] = Command::NoOperation;
        }
        for binding in &mut computation.bindings {
            binding.map_matrices(|m| if m == m1 { m2 } else { m });
        }

        self.stats.right_merges += 1;
        debug!(command = index, kept = %m2, eliminated = %m1, "right merge");
    }

    /// A merged copy has become a self-assignment
    fn remove_assignment(&mut self, computation: &mut Computation, index: usize) {
        if let Command::MatrixCopy { dest, src } = computation.commands[index] {
            if computation.submatrices[dest.0] == computation.submatrices[src.0] {
                computation.commands[index] = Command::NoOperation;
                self.stats.assignments_removed += 1;
            }
        }
    }
}

impl OptimizationPass for VariableMerging {
    fn name(&self) -> &'static str {
        "variable-merging"
    }

    fn description(&self) -> &'static str {
        "Shares storage across copies and in-place operations"
    }

    fn is_enabled(&self, options: &OptimizeOptions, _request: &ComputationRequest) -> bool {
        options.merging_enabled()
    }

    fn optimize(&mut self, computation: &Computation, ctx: &PassContext<'_>) -> OptimizeResult<OptimizationResult<Computation>> {
        let mut output = computation.clone();
        let changed = self.merge(&mut output, ctx.options, ctx.topology)?;
        Ok(OptimizationResult::new(output, changed))
    }
}

/// The (read, written) submatrix pair a command could merge, if any
fn merge_candidate(command: &Command, options: &OptimizeOptions, topology: &dyn NetworkTopology) -> OptimizeResult<Option<(SubMatrixId, SubMatrixId)>> {
    let candidate = match command {
        Command::MatrixCopy { dest, src } if options.remove_assignments => Some((*src, *dest)),
        Command::Propagate { component, input, output } if options.propagate_in_place => {
            let props = component_properties(topology, *component)?;
            (props.propagate_in_place && !props.propagate_adds).then_some((*input, *output))
        }
        Command::Backprop {
            component,
            out_deriv,
            in_deriv: Some(in_deriv),
            ..
        } if options.backprop_in_place => {
            let props = component_properties(topology, *component)?;
            (props.backprop_in_place && !props.backprop_adds).then_some((*out_deriv, *in_deriv))
        }
        _ => None,
    };
    Ok(candidate)
}

/// Whether the sizing commands of a matrix are plain allocate/deallocate
fn has_plain_sizing(computation: &Computation, accesses: &MatrixAccesses) -> bool {
    let plain_alloc = accesses
        .allocate_command
        .is_none_or(|c| matches!(&computation.commands[c], Command::Allocate { kind, .. } if !kind.is_reuse()));
    let plain_dealloc = accesses.deallocate_command.is_none_or(|c| matches!(computation.commands[c], Command::Deallocate { .. }));
    plain_alloc && plain_dealloc
}

fn merge_direction(computation: &Computation, analysis: &ComputationAnalysis, options: &OptimizeOptions, index: usize, s1: SubMatrixId, s2: SubMatrixId) -> Option<MergeDirection> {
    if !options.allow_left_merge && !options.allow_right_merge {
        return None;
    }
    let (sub1, sub2) = (computation.submatrices[s1.0], computation.submatrices[s2.0]);
    if (sub1.num_rows, sub1.num_cols) != (sub2.num_rows, sub2.num_cols) {
        return None;
    }
    let (m1, m2) = (sub1.matrix, sub2.matrix);
    let (a1, a2) = (analysis.matrix(m1), analysis.matrix(m2));

    if (a1.is_input && a2.is_input) || (a1.is_output && a2.is_output) {
        return None;
    }
    let any_input = a1.is_input || a2.is_input;
    let any_output = a1.is_output || a2.is_output;
    if any_input && any_output {
        return None;
    }
    let (whole1, whole2) = (computation.is_whole_matrix(s1), computation.is_whole_matrix(s2));
    if (any_input || any_output) && !(whole1 && whole2) {
        return None;
    }
    if !has_plain_sizing(computation, a1) || !has_plain_sizing(computation, a2) {
        return None;
    }

    let on_merged = computation.commands[index]
        .submatrices()
        .into_iter()
        .filter(|s| {
            let m = computation.submatrices[s.0].matrix;
            m == m1 || m == m2
        })
        .count();
    if on_merged != 2 {
        return None;
    }

    if a1.is_output || a1.last_access().map(|a| a.command) != Some(index) {
        return None;
    }
    let pure_write = Access {
        command: index,
        access_type: AccessType::Write,
    };
    if a2.is_input || a2.first_access() != Some(pure_write) {
        return None;
    }

    if options.allow_left_merge && whole2 {
        Some(MergeDirection::Left)
    } else if options.allow_right_merge && whole1 {
        Some(MergeDirection::Right)
    } else {
        None
    }
}

/// Move every submatrix of `from` into `to` at the given offset
fn retarget(computation: &mut Computation, from: MatrixId, to: MatrixId, row_offset: usize, col_offset: usize) {
    for sub in computation.submatrices.iter_mut().filter(|s| s.matrix == from) {
        sub.matrix = to;
        sub.row_offset += row_offset;
        sub.col_offset += col_offset;
    }
}

/// Run variable merging over `computation` in place
pub fn variable_merging_optimization(
    options: &OptimizeOptions,
    topology: &dyn NetworkTopology,
    _request: &ComputationRequest,
    computation: &mut Computation,
) -> OptimizeResult<()> {
    if !options.merging_enabled() {
        return Ok(());
    }
    VariableMerging::new().merge(computation, options, topology)?;
    Ok(())
}
