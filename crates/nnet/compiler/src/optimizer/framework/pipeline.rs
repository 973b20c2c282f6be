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

//! Pipeline that runs passes in a fixed order over one computation

use crate::error::{OptimizeError, OptimizeResult};
use crate::optimizer::analysis::{ComputationChecker, MemoryStats};
use crate::optimizer::framework::metrics::{OptimizationMetrics, PassMetrics};
use crate::optimizer::framework::pass::{OptimizationPass, OptimizationResult, PassContext};
use crate::optimizer::passes::{AllocationReuse, ModelUpdateConsolidation, SizingCommandMotion, VariableMerging, ZeroingElimination};
use nnet_common::Computation;
use std::time::Instant;
use tracing::{debug, warn};

/// Core optimization pipeline that runs a series of passes
pub struct OptimizationPipeline {
    passes: Vec<Box<dyn OptimizationPass>>,
}

impl Default for OptimizationPipeline {
    fn default() -> Self {
        Self::standard()
    }
}

impl OptimizationPipeline {
    /// Create a pipeline without passes
    pub fn new() -> Self {
        Self { passes: Vec::new() }
    }

    /// The standard pass order: merging, model-update consolidation,
    /// zeroing elimination, sizing-command motion, allocation reuse
    pub fn standard() -> Self {
        let mut pipeline = Self::new();
        pipeline.add_pass(VariableMerging::new());
        pipeline.add_pass(ModelUpdateConsolidation::new());
        pipeline.add_pass(ZeroingElimination::new());
        pipeline.add_pass(SizingCommandMotion::new());
        pipeline.add_pass(AllocationReuse::new());
        pipeline
    }

    /// Add an optimization pass to the end of the pipeline
    pub fn add_pass<P>(&mut self, pass: P)
    where
        P: OptimizationPass + 'static,
    {
        self.passes.push(Box::new(pass));
    }

    pub fn pass_names(&self) -> Vec<&'static str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    /// Run every enabled pass over `computation`
    ///
    /// Each pass works on a snapshot; its output is checked and only then
    /// committed. On failure the computation holds the output of the last
    /// pass that succeeded.
    pub fn run(&mut self, ctx: &PassContext<'_>, computation: &mut Computation) -> OptimizeResult<OptimizationMetrics> {
        let mut metrics = OptimizationMetrics::default();
        if !ctx.options.optimize {
            debug!("optimization disabled, computation left as compiled");
            return Ok(metrics);
        }

        ComputationChecker::new(computation, ctx.topology)
            .check()
            .map_err(|detail| OptimizeError::invariant("input", detail))?;
        metrics.memory_before = Some(MemoryStats::of(computation));

        for pass in &mut self.passes {
            let name = pass.name();
            if !pass.is_enabled(ctx.options, ctx.request) {
                debug!(pass = name, "pass disabled");
                continue;
            }

            let start = Instant::now();
            let commands_before = computation.num_commands();
            let OptimizationResult { output, changed, warnings } = pass.optimize(computation, ctx).inspect_err(|e| warn!(pass = name, error = %e, "pass failed"))?;

            if let Err(detail) = ComputationChecker::new(&output, ctx.topology).check() {
                warn!(pass = name, %detail, "pass produced an invalid computation");
                return Err(OptimizeError::invariant(name, detail));
            }

            for warning in &warnings {
                warn!(pass = warning.pass_name, "{}", warning.message);
            }
            let pass_metrics = PassMetrics {
                pass_name: name,
                duration: start.elapsed(),
                changed,
                commands_before,
                commands_after: output.num_commands(),
            };
            debug!(
                pass = name,
                changed,
                commands_before,
                commands_after = pass_metrics.commands_after,
                elapsed_us = pass_metrics.duration.as_micros() as u64,
                "pass finished"
            );
            metrics.record_pass(pass_metrics);
            metrics.warnings.extend(warnings);
            *computation = output;
        }

        metrics.memory_after = Some(MemoryStats::of(computation));
        Ok(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::options::OptimizeOptions;
    use nnet_common::{AllocKind, Command, ComponentTable, ComputationRequest};

    struct FailingPass;

    impl OptimizationPass for FailingPass {
        fn name(&self) -> &'static str {
            "failing"
        }
        fn description(&self) -> &'static str {
            "always fails"
        }
        fn is_enabled(&self, _options: &OptimizeOptions, _request: &ComputationRequest) -> bool {
            true
        }
        fn optimize(&mut self, _computation: &Computation, _ctx: &PassContext<'_>) -> OptimizeResult<OptimizationResult<Computation>> {
            Err(OptimizeError::NotImplemented("failing pass"))
        }
    }

    /// Drops every deallocation, which the checker must reject
    struct LeakingPass;

    impl OptimizationPass for LeakingPass {
        fn name(&self) -> &'static str {
            "leaking"
        }
        fn description(&self) -> &'static str {
            "removes deallocations"
        }
        fn is_enabled(&self, _options: &OptimizeOptions, _request: &ComputationRequest) -> bool {
            true
        }
        fn optimize(&mut self, computation: &Computation, _ctx: &PassContext<'_>) -> OptimizeResult<OptimizationResult<Computation>> {
            let mut output = computation.clone();
            output.commands.retain(|c| !matches!(c, Command::Deallocate { .. }));
            Ok(OptimizationResult::new(output, true))
        }
    }

    fn scratch_computation() -> Computation {
        let mut c = Computation::new();
        let m = c.add_matrix(2, 2).unwrap();
        c.push(Command::Allocate { matrix: m, kind: AllocKind::Zeroed });
        c.push(Command::Deallocate { matrix: m });
        c
    }

    #[test]
    fn test_standard_order() {
        let pipeline = OptimizationPipeline::standard();
        assert_eq!(
            pipeline.pass_names(),
            vec!["variable-merging", "consolidate-model-update", "remove-unnecessary-zeroing", "move-sizing-commands", "remove-unnecessary-allocation"]
        );
    }

    #[test]
    fn test_failure_halts_and_keeps_last_good_state() {
        let topology = ComponentTable::default();
        let options = OptimizeOptions::default();
        let request = ComputationRequest::default();
        let ctx = PassContext::new(&options, &topology, &request);

        let mut pipeline = OptimizationPipeline::new();
        pipeline.add_pass(FailingPass);
        pipeline.add_pass(LeakingPass);

        let original = scratch_computation();
        let mut computation = original.clone();
        let err = pipeline.run(&ctx, &mut computation).unwrap_err();
        assert_eq!(err, OptimizeError::NotImplemented("failing pass"));
        assert_eq!(computation, original);
    }

    #[test]
    fn test_invalid_output_is_rejected() {
        let topology = ComponentTable::default();
        let options = OptimizeOptions::default();
        let request = ComputationRequest::default();
        let ctx = PassContext::new(&options, &topology, &request);

        let mut pipeline = OptimizationPipeline::new();
        pipeline.add_pass(LeakingPass);

        let original = scratch_computation();
        let mut computation = original.clone();
        let err = pipeline.run(&ctx, &mut computation).unwrap_err();
        assert!(matches!(err, OptimizeError::InvariantViolation { ref pass, .. } if pass == "leaking"));
        assert_eq!(computation, original);
    }

    #[test]
    fn test_disabled_pipeline_runs_nothing() {
        let topology = ComponentTable::default();
        let options = OptimizeOptions::disabled();
        let request = ComputationRequest::default();
        let ctx = PassContext::new(&options, &topology, &request);

        let mut pipeline = OptimizationPipeline::new();
        pipeline.add_pass(FailingPass);
        let mut computation = scratch_computation();
        let metrics = pipeline.run(&ctx, &mut computation).unwrap();
        assert_eq!(metrics.total_passes, 0);
    }
}
