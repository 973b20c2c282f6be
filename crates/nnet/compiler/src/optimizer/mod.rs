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

//! Optimization of compiled computations

pub mod analysis;
pub mod framework;
pub mod options;
pub mod passes;

use crate::error::OptimizeResult;
use crate::optimizer::framework::metrics::OptimizationMetrics;
use crate::optimizer::framework::pass::PassContext;
use crate::optimizer::framework::pipeline::OptimizationPipeline;
use crate::optimizer::options::OptimizeOptions;
use nnet_common::{Computation, ComputationRequest, NetworkTopology};
use tracing::{info, instrument};

pub use passes::{consolidate_matrices, consolidate_model_update, move_sizing_commands, remove_unnecessary_allocation, remove_unnecessary_zeroing, variable_merging_optimization};

/// Runs the standard pipeline under a fixed set of options
pub struct Optimizer {
    options: OptimizeOptions,
    pipeline: OptimizationPipeline,
}

impl Optimizer {
    pub fn new(options: OptimizeOptions) -> Self {
        Self {
            options,
            pipeline: OptimizationPipeline::standard(),
        }
    }

    pub fn options(&self) -> &OptimizeOptions {
        &self.options
    }

    /// Optimize `computation` in place
    pub fn optimize(&mut self, topology: &dyn NetworkTopology, request: &ComputationRequest, computation: &mut Computation) -> OptimizeResult<OptimizationMetrics> {
        let ctx = PassContext::new(&self.options, topology, request);
        let metrics = self.pipeline.run(&ctx, computation)?;
        if let (Some(before), Some(after)) = (metrics.memory_before, metrics.memory_after) {
            info!(
                passes = metrics.total_passes,
                commands_before = before.num_commands,
                commands_after = after.num_commands,
                matrices_before = before.num_matrices,
                matrices_after = after.num_matrices,
                peak_live_before = before.peak_live_matrices,
                peak_live_after = after.peak_live_matrices,
                elapsed_us = metrics.total_duration().as_micros() as u64,
                "computation optimized"
            );
        }
        Ok(metrics)
    }
}

/// Optimize `computation` in place according to `options`
///
/// Passes run in a fixed order: variable merging, model-update
/// consolidation, zeroing elimination, sizing-command motion and allocation
/// reuse. With `options.optimize` off nothing changes. If a pass fails, the
/// computation keeps the result of the passes before it.
#[instrument(skip_all, fields(commands = computation.num_commands()))]
pub fn optimize(options: &OptimizeOptions, topology: &dyn NetworkTopology, request: &ComputationRequest, computation: &mut Computation) -> OptimizeResult<OptimizationMetrics> {
    Optimizer::new(*options).optimize(topology, request, computation)
}
