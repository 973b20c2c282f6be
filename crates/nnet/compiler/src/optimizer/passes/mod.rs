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

//! Optimization passes over a computation

pub mod allocation;
pub mod cleanup;
pub mod model_update;
pub mod sizing;
pub mod variable_merging;
pub mod zeroing;

pub use allocation::{AllocationReuse, consolidate_matrices, remove_unnecessary_allocation};
pub use model_update::{ConsolidationStats, ModelUpdateConsolidation, consolidate_model_update};
pub use sizing::{SizingCommandMotion, move_sizing_commands};
pub use variable_merging::{MergeStats, VariableMerging, variable_merging_optimization};
pub use zeroing::{ZeroingElimination, remove_unnecessary_zeroing};
