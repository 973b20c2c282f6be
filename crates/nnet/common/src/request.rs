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

//! Structural description of what a computation must produce

use serde::{Deserialize, Serialize};

/// Identifies one row of a network input or output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Index {
    /// Sequence within the minibatch
    pub n: i32,
    /// Time step
    pub t: i32,
    /// Extra dimension, usually zero
    pub x: i32,
}

impl Index {
    pub fn new(n: i32, t: i32) -> Self {
        Self { n, t, x: 0 }
    }
}

/// One named input or output and the rows requested for it
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IoSpecification {
    pub name: String,
    pub indexes: Vec<Index>,
    /// Whether the derivative w.r.t. this node is supplied (outputs) or wanted (inputs)
    #[serde(default)]
    pub has_deriv: bool,
}

impl IoSpecification {
    pub fn new(name: impl Into<String>, indexes: Vec<Index>, has_deriv: bool) -> Self {
        Self {
            name: name.into(),
            indexes,
            has_deriv,
        }
    }

    /// Rows for `num_sequences` sequences over time steps `t_begin..t_end`
    pub fn frames(name: impl Into<String>, num_sequences: i32, t_begin: i32, t_end: i32, has_deriv: bool) -> Self {
        let indexes = (t_begin..t_end).flat_map(|t| (0..num_sequences).map(move |n| Index::new(n, t))).collect();
        Self::new(name, indexes, has_deriv)
    }

    pub fn num_rows(&self) -> usize {
        self.indexes.len()
    }
}

/// What a caller wants from one evaluation of the network
///
/// Requests that compare equal compile to identical computations, which is
/// what lets a compiler reuse its previous result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ComputationRequest {
    pub inputs: Vec<IoSpecification>,
    pub outputs: Vec<IoSpecification>,
    /// Whether parameter gradients are computed
    #[serde(default)]
    pub need_model_derivative: bool,
    #[serde(default)]
    pub store_component_stats: bool,
}

impl ComputationRequest {
    pub fn input(&self, name: &str) -> Option<&IoSpecification> {
        self.inputs.iter().find(|io| io.name == name)
    }

    pub fn output(&self, name: &str) -> Option<&IoSpecification> {
        self.outputs.iter().find(|io| io.name == name)
    }

    /// Whether any backward pass is needed at all
    pub fn needs_backprop(&self) -> bool {
        self.need_model_derivative || self.inputs.iter().any(|io| io.has_deriv) || self.outputs.iter().any(|io| io.has_deriv)
    }
}
