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

//! nnet-opt tools library
//!
//! Command-line front-ends for inspecting and optimizing computation plans
//! stored as JSON.

pub mod cli;
pub mod plan;

pub use cli::optimize::{OptimizeArgs, run_optimize};
pub use cli::stats::{StatsArgs, run_stats};
pub use plan::{PlanFile, ToolError};
