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

//! The narrow view of a network that the optimizer needs
//!
//! The optimizer never looks at parameters or layer types; it only asks a
//! [`NetworkTopology`] which in-place and accumulation behaviors each
//! component supports.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Index of a component in the network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComponentId(pub usize);

impl ComponentId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "comp{}", self.0)
    }
}

/// Behavioral flags of a component
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct ComponentProperties {
    /// Has trainable parameters
    pub updatable: bool,
    /// Propagate may write its output over its input
    pub propagate_in_place: bool,
    /// Backprop may write the input derivative over the output derivative
    pub backprop_in_place: bool,
    /// Propagate adds to its output instead of overwriting it
    pub propagate_adds: bool,
    /// Backprop adds to the input derivative instead of overwriting it
    pub backprop_adds: bool,
    pub backprop_needs_input: bool,
    pub backprop_needs_output: bool,
}

impl ComponentProperties {
    /// Elementwise nonlinearity: in-place both ways, backprop reads the output
    pub fn nonlinearity() -> Self {
        Self {
            propagate_in_place: true,
            backprop_in_place: true,
            backprop_needs_output: true,
            ..Default::default()
        }
    }

    /// Trainable layer whose backprop reads its input
    pub fn affine() -> Self {
        Self {
            updatable: true,
            backprop_needs_input: true,
            ..Default::default()
        }
    }
}

/// Read-only access to the properties of a network's components
pub trait NetworkTopology {
    fn num_components(&self) -> usize;

    /// Properties of `component`, or `None` when the index is out of range
    fn component_properties(&self, component: ComponentId) -> Option<ComponentProperties>;
}

impl<T: NetworkTopology + ?Sized> NetworkTopology for &T {
    fn num_components(&self) -> usize {
        (**self).num_components()
    }

    fn component_properties(&self, component: ComponentId) -> Option<ComponentProperties> {
        (**self).component_properties(component)
    }
}

/// A topology described by a plain list of component properties
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComponentTable {
    components: Vec<ComponentProperties>,
}

impl ComponentTable {
    pub fn new(components: Vec<ComponentProperties>) -> Self {
        Self { components }
    }

    /// Append a component and return its id
    pub fn add(&mut self, properties: ComponentProperties) -> ComponentId {
        self.components.push(properties);
        ComponentId(self.components.len() - 1)
    }

    pub fn components(&self) -> &[ComponentProperties] {
        &self.components
    }
}

impl NetworkTopology for ComponentTable {
    fn num_components(&self) -> usize {
        self.components.len()
    }

    fn component_properties(&self, component: ComponentId) -> Option<ComponentProperties> {
        self.components.get(component.0).copied()
    }
}
