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

//! Collaborators of the caching compiler

use crate::error::OptimizeResult;
use nnet_common::{Computation, ComputationRequest};

/// Builds an unoptimized computation for a request
#[cfg_attr(test, mockall::automock)]
pub trait ComputationCompiler {
    fn compile(&self, request: &ComputationRequest) -> OptimizeResult<Computation>;
}

impl<F> ComputationCompiler for F
where
    F: Fn(&ComputationRequest) -> OptimizeResult<Computation>,
{
    fn compile(&self, request: &ComputationRequest) -> OptimizeResult<Computation> {
        self(request)
    }
}

/// Prepares device-side index tables of an optimized computation
#[cfg_attr(test, mockall::automock)]
pub trait DeviceIndexPreparer {
    fn prepare(&self, computation: &mut Computation) -> OptimizeResult<()>;
}
