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

//! Shared types for neural-network computation plans
//!
//! This crate holds the intermediate representation produced by network
//! compilation and consumed by the optimizer and execution engines.

pub mod computation;
pub mod error;
pub mod request;
pub mod topology;

pub use computation::{AllocKind, Command, Computation, IoBinding, IoDirection, MatrixId, MatrixInfo, SubMatrixId, SubMatrixInfo};
pub use error::{ComputationError, ComputationResult};
pub use request::{ComputationRequest, Index, IoSpecification};
pub use topology::{ComponentId, ComponentProperties, ComponentTable, NetworkTopology};
