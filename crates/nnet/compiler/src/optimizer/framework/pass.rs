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

//! Optimization pass interface

use crate::error::OptimizeResult;
use crate::optimizer::framework::metrics::OptimizationWarning;
use crate::optimizer::options::OptimizeOptions;
use nnet_common::{Computation, ComputationRequest, NetworkTopology};

/// Everything a pass may consult besides the computation itself
#[derive(Clone, Copy)]
pub struct PassContext<'a> {
    pub options: &'a OptimizeOptions,
    pub topology: &'a dyn NetworkTopology,
    pub request: &'a ComputationRequest,
}

impl<'a> PassContext<'a> {
    pub fn new(options: &'a OptimizeOptions, topology: &'a dyn NetworkTopology, request: &'a ComputationRequest) -> Self {
        Self { options, topology, request }
    }
}

/// Trait representing a single optimization pass
///
/// A pass reads a snapshot of the computation and returns the rewritten
/// computation; it never keeps references to either after returning.
pub trait OptimizationPass {
    /// Unique name of the pass
    fn name(&self) -> &'static str;
    /// Short description of the pass
    fn description(&self) -> &'static str;

    /// Whether the pass runs under the given options and request
    fn is_enabled(&self, options: &OptimizeOptions, request: &ComputationRequest) -> bool;

    /// Run the pass, returning the transformed computation, change flag and warnings
    fn optimize(&mut self, computation: &Computation, ctx: &PassContext<'_>) -> OptimizeResult<OptimizationResult<Computation>>;
}

/// Result of running an optimization pass
#[derive(Debug, Clone)]
pub struct OptimizationResult<T> {
    /// Transformed output
    pub output: T,
    /// Whether the pass changed the input
    pub changed: bool,
    /// Warnings emitted during the pass
    pub warnings: Vec<OptimizationWarning>,
}

impl<T> OptimizationResult<T> {
    pub fn new(output: T, changed: bool) -> Self {
        Self {
            output,
            changed,
            warnings: Vec::new(),
        }
    }

    /// Attach a warning to be reported by the pipeline
    pub fn warn(&mut self, pass_name: &'static str, message: impl Into<String>) {
        self.warnings.push(OptimizationWarning {
            pass_name,
            message: message.into(),
        });
    }
}
