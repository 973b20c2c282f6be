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

//! Model-update consolidation
//!
//! Backprop commands of the same updatable component each contribute a
//! small parameter update. This pass gathers their inputs into row-stacked
//! matrices and performs one large update per component instead, which is
//! what makes the backward pass over many time steps cheap.
//!
//! Consolidation can only happen once per computation.

use super::cleanup::remove_no_ops;
use crate::error::{OptimizeError, OptimizeResult};
use crate::optimizer::analysis::accesses::component_properties;
use crate::optimizer::framework::pass::{OptimizationPass, OptimizationResult, PassContext};
use crate::optimizer::options::OptimizeOptions;
use nnet_common::{AllocKind, Command, ComponentId, Computation, ComputationRequest, MatrixId, NetworkTopology, SubMatrixId};
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConsolidationStats {
    /// Components whose updates were merged into one
    pub groups_consolidated: usize,
    /// Backprop commands that no longer update the model
    pub backprops_merged: usize,
    /// Components left alone because their backprops differ in shape
    pub groups_skipped: usize,
}

/// Argument shape shared by every backprop of one group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct UpdateSignature {
    in_value_cols: Option<usize>,
    out_value_cols: Option<usize>,
    out_deriv_cols: usize,
}

/// Commands spliced around the existing command list
struct Splices {
    before: Vec<Vec<Command>>,
    after: Vec<Vec<Command>>,
}

pub struct ModelUpdateConsolidation {
    stats: ConsolidationStats,
    /// Components whose backprops could not be stacked in the last run
    skipped: Vec<ComponentId>,
}

impl Default for ModelUpdateConsolidation {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelUpdateConsolidation {
    pub fn new() -> Self {
        Self {
            stats: ConsolidationStats::default(),
            skipped: Vec::new(),
        }
    }

    pub fn stats(&self) -> &ConsolidationStats {
        &self.stats
    }

    /// Consolidate every eligible group and mark the computation as consolidated
    pub fn consolidate(&mut self, computation: &mut Computation, topology: &dyn NetworkTopology) -> OptimizeResult<bool> {
        computation.validate_indexes()?;
        if computation.model_update_consolidated || computation.commands.iter().any(|c| matches!(c, Command::ModelUpdate { .. })) {
            return Err(OptimizeError::ModelUpdateAlreadyConsolidated);
        }
        self.stats = ConsolidationStats::default();
        self.skipped.clear();

        let mut updates = 0;
        let mut groups: BTreeMap<ComponentId, Vec<usize>> = BTreeMap::new();
        for (index, command) in computation.commands.iter().enumerate() {
            if let Command::Backprop { component, update_model: true, .. } = command {
                updates += 1;
                if component_properties(topology, *component)?.updatable {
                    groups.entry(*component).or_default().push(index);
                }
            }
        }
        // no backward phase that updates the model: nothing to consolidate, now or later
        if updates == 0 {
            debug!("no model-updating backprop, consolidation not attempted");
            return Ok(false);
        }
        computation.model_update_consolidated = true;

        let num_commands = computation.num_commands();
        let mut splices = Splices {
            before: vec![Vec::new(); num_commands],
            after: vec![Vec::new(); num_commands],
        };
        for (component, indexes) in groups {
            if indexes.len() < 2 {
                continue;
            }
            let Some(signature) = uniform_signature(computation, &indexes) else {
                debug!(%component, backprops = indexes.len(), "backprop shapes differ, model update left alone");
                self.stats.groups_skipped += 1;
                self.skipped.push(component);
                continue;
            };
            self.consolidate_group(computation, &mut splices, component, &indexes, signature)?;
        }

        if self.stats.groups_consolidated == 0 {
            return Ok(false);
        }

        let commands = std::mem::take(&mut computation.commands);
        for ((command, before), after) in commands.into_iter().zip(splices.before).zip(splices.after) {
            computation.commands.extend(before);
            computation.commands.push(command);
            computation.commands.extend(after);
        }
        remove_no_ops(computation);
        debug!(
            groups = self.stats.groups_consolidated,
            backprops = self.stats.backprops_merged,
            skipped = self.stats.groups_skipped,
            "model update consolidated"
        );
        Ok(true)
    }

    fn consolidate_group(&mut self, computation: &mut Computation, splices: &mut Splices, component: ComponentId, indexes: &[usize], signature: UpdateSignature) -> OptimizeResult<()> {
        let args: Vec<[Option<SubMatrixId>; 3]> = indexes.iter().map(|&i| update_arguments(&computation.commands[i])).collect();
        let last = indexes[indexes.len() - 1];

        let mut stacked = Vec::new();
        let in_value = match signature.in_value_cols {
            Some(cols) => Some(stack_rows(computation, splices, indexes, &args, 0, cols, &mut stacked)?),
            None => None,
        };
        let out_value = match signature.out_value_cols {
            Some(cols) => Some(stack_rows(computation, splices, indexes, &args, 1, cols, &mut stacked)?),
            None => None,
        };
        let out_deriv = stack_rows(computation, splices, indexes, &args, 2, signature.out_deriv_cols, &mut stacked)?;

        for &index in indexes {
            let command = &mut computation.commands[index];
            match command {
                Command::Backprop { in_deriv: None, .. } => *command = Command::NoOperation,
                Command::Backprop { update_model, .. } => *update_model = false,
                _ => {}
            }
        }

        splices.after[last].push(Command::ModelUpdate {
            component,
            in_value,
            out_value,
            out_deriv,
        });
        splices.after[last].extend(stacked.into_iter().map(|matrix| Command::Deallocate { matrix }));

        self.stats.groups_consolidated += 1;
        self.stats.backprops_merged += indexes.len();
        debug!(%component, backprops = indexes.len(), at = last, "consolidated model update");
        Ok(())
    }
}

impl OptimizationPass for ModelUpdateConsolidation {
    fn name(&self) -> &'static str {
        "consolidate-model-update"
    }

    fn description(&self) -> &'static str {
        "Merges per-step parameter updates into one update per component"
    }

    fn is_enabled(&self, options: &OptimizeOptions, request: &ComputationRequest) -> bool {
        options.consolidate_model_update && request.need_model_derivative
    }

    fn optimize(&mut self, computation: &Computation, ctx: &PassContext<'_>) -> OptimizeResult<OptimizationResult<Computation>> {
        let mut output = computation.clone();
        let changed = self.consolidate(&mut output, ctx.topology)?;
        let mut result = OptimizationResult::new(output, changed);
        for component in &self.skipped {
            result.warn(self.name(), format!("backprops of {component} differ in shape; their model updates were not consolidated"));
        }
        Ok(result)
    }
}

/// (in_value, out_value, out_deriv) of a model-updating backprop
fn update_arguments(command: &Command) -> [Option<SubMatrixId>; 3] {
    match command {
        Command::Backprop {
            in_value, out_value, out_deriv, ..
        } => [*in_value, *out_value, Some(*out_deriv)],
        _ => [None; 3],
    }
}

fn uniform_signature(computation: &Computation, indexes: &[usize]) -> Option<UpdateSignature> {
    let cols = |s: Option<SubMatrixId>| s.map(|s| computation.submatrices[s.0].num_cols);
    let mut signatures = indexes.iter().map(|&i| {
        let [in_value, out_value, out_deriv] = update_arguments(&computation.commands[i]);
        Some(UpdateSignature {
            in_value_cols: cols(in_value),
            out_value_cols: cols(out_value),
            out_deriv_cols: cols(out_deriv)?,
        })
    });
    let first = signatures.next()??;
    signatures.all(|s| s == Some(first)).then_some(first)
}

/// Allocate a matrix stacking argument `slot` of every backprop by rows and
/// copy each piece in right before its command
fn stack_rows(
    computation: &mut Computation,
    splices: &mut Splices,
    indexes: &[usize],
    args: &[[Option<SubMatrixId>; 3]],
    slot: usize,
    cols: usize,
    stacked: &mut Vec<MatrixId>,
) -> OptimizeResult<SubMatrixId> {
    let pieces: Vec<(usize, SubMatrixId)> = indexes.iter().zip(args).filter_map(|(&index, a)| a[slot].map(|s| (index, s))).collect();
    let num_rows = pieces.iter().map(|(_, s)| computation.submatrices[s.0].num_rows).sum();

    let matrix = computation.add_matrix(num_rows, cols)?;
    let whole = computation.add_whole_submatrix(matrix)?;
    splices.before[indexes[0]].push(Command::Allocate {
        matrix,
        kind: AllocKind::Undefined,
    });

    let mut row_offset = 0;
    for (index, src) in pieces {
        let rows = computation.submatrices[src.0].num_rows;
        let dest = computation.add_submatrix(matrix, row_offset, rows, 0, cols)?;
        splices.before[index].push(Command::MatrixCopy { dest, src });
        row_offset += rows;
    }
    stacked.push(matrix);
    Ok(whole)
}

/// Consolidate the model update of `computation` in place
///
/// Does nothing when the request needs no model derivative. Fails with
/// [`OptimizeError::ModelUpdateAlreadyConsolidated`] on a computation that
/// was consolidated before.
pub fn consolidate_model_update(topology: &dyn NetworkTopology, request: &ComputationRequest, computation: &mut Computation) -> OptimizeResult<()> {
    if !request.need_model_derivative {
        return Ok(());
    }
    ModelUpdateConsolidation::new().consolidate(computation, topology)?;
    Ok(())
}
