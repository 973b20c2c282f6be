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

//! Optimizer for compiled neural-network computations
//!
//! A [`Computation`](nnet_common::Computation) is a flat list of matrix
//! commands produced by a compiler for one request. [`optimize`] rewrites
//! it to use less memory and fewer commands without changing what it
//! computes, and [`CachingOptimizingCompiler`] keeps the most recent
//! optimized result so repeated requests skip the work.

pub mod caching;
pub mod error;
pub mod interfaces;
pub mod optimizer;

pub use caching::{CacheStats, CachingOptimizingCompiler};
pub use error::{OptimizeError, OptimizeResult};
pub use interfaces::{ComputationCompiler, DeviceIndexPreparer};
pub use optimizer::analysis::{ComputationChecker, MemoryStats};
pub use optimizer::framework::metrics::{OptimizationMetrics, PassMetrics};
pub use optimizer::options::OptimizeOptions;
pub use optimizer::{
    Optimizer, consolidate_matrices, consolidate_model_update, move_sizing_commands, optimize, remove_unnecessary_allocation, remove_unnecessary_zeroing,
    variable_merging_optimization,
};
