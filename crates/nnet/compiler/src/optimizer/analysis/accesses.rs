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

//! Read/write accesses of variables and matrices
//!
//! This is the read-only view every pass reasons with: which command first
//! touches a variable, whether that touch reads or overwrites it, and where
//! each matrix is allocated and freed.

use super::variables::{ComputationVariables, VariableId};
use crate::error::{OptimizeError, OptimizeResult};
use nnet_common::{Command, ComponentId, ComponentProperties, Computation, ComputationError, MatrixId, NetworkTopology, SubMatrixId};
use std::collections::BTreeMap;

/// How a command touches a variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessType {
    Read,
    Write,
    ReadWrite,
}

impl AccessType {
    /// Combined access of two argument slots hitting the same variable
    pub fn combine(self, other: AccessType) -> AccessType {
        if self == other { self } else { AccessType::ReadWrite }
    }

    pub fn reads(self) -> bool {
        matches!(self, AccessType::Read | AccessType::ReadWrite)
    }
}

/// One command's access to a variable or matrix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Access {
    pub command: usize,
    pub access_type: AccessType,
}

/// Everything that happens to one matrix, in command order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatrixAccesses {
    /// Command that allocates the matrix (possibly from another matrix)
    pub allocate_command: Option<usize>,
    /// Command that frees the matrix (possibly by handing it to another matrix)
    pub deallocate_command: Option<usize>,
    /// Non-sizing accesses, one per command
    pub accesses: Vec<Access>,
    /// Contents supplied by the caller
    pub is_input: bool,
    /// Contents read by the caller after execution
    pub is_output: bool,
}

impl MatrixAccesses {
    pub fn first_access(&self) -> Option<Access> {
        self.accesses.first().copied()
    }

    pub fn last_access(&self) -> Option<Access> {
        self.accesses.last().copied()
    }
}

/// Look up a component, failing on an out-of-range index
pub fn component_properties(topology: &dyn NetworkTopology, component: ComponentId) -> OptimizeResult<ComponentProperties> {
    topology.component_properties(component).ok_or(OptimizeError::UnknownComponent {
        component,
        num_components: topology.num_components(),
    })
}

/// Submatrix arguments of a command with the way each is accessed
pub fn command_accesses(command: &Command, topology: &dyn NetworkTopology) -> OptimizeResult<Vec<(SubMatrixId, AccessType)>> {
    let written = |adds: bool| if adds { AccessType::ReadWrite } else { AccessType::Write };
    let accesses = match command {
        Command::Propagate { component, input, output } => {
            let props = component_properties(topology, *component)?;
            vec![(*input, AccessType::Read), (*output, written(props.propagate_adds))]
        }
        Command::Backprop {
            component,
            in_value,
            out_value,
            out_deriv,
            in_deriv,
            ..
        } => {
            let props = component_properties(topology, *component)?;
            let mut accesses: Vec<_> = [*in_value, *out_value, Some(*out_deriv)].into_iter().flatten().map(|s| (s, AccessType::Read)).collect();
            accesses.extend(in_deriv.map(|s| (s, written(props.backprop_adds))));
            accesses
        }
        Command::ModelUpdate { component, .. } => {
            component_properties(topology, *component)?;
            command.submatrices().into_iter().map(|s| (s, AccessType::Read)).collect()
        }
        Command::MatrixCopy { dest, src } => vec![(*src, AccessType::Read), (*dest, AccessType::Write)],
        Command::MatrixAdd { dest, src } => vec![(*src, AccessType::Read), (*dest, AccessType::ReadWrite)],
        Command::Allocate { .. } | Command::Deallocate { .. } | Command::NoOperation | Command::PhaseMarker => Vec::new(),
    };
    Ok(accesses)
}

/// Variable and matrix access tables for one computation snapshot
#[derive(Debug, Clone)]
pub struct ComputationAnalysis {
    pub variables: ComputationVariables,
    /// Accesses of each variable in command order
    pub variable_accesses: Vec<Vec<Access>>,
    pub matrix_accesses: Vec<MatrixAccesses>,
}

impl ComputationAnalysis {
    /// Analyze `computation`, rejecting ids that point at nothing
    pub fn new(computation: &Computation, topology: &dyn NetworkTopology) -> OptimizeResult<Self> {
        computation.validate_indexes()?;
        let variables = ComputationVariables::new(computation);
        let mut variable_accesses = vec![Vec::new(); variables.num_variables()];
        let mut matrix_accesses = vec![MatrixAccesses::default(); computation.num_matrices()];

        for binding in &computation.bindings {
            if let Some(m) = binding.supplied() {
                matrix_accesses.get_mut(m.0).ok_or(ComputationError::UnknownMatrix(m))?.is_input = true;
            }
            if let Some(m) = binding.produced() {
                matrix_accesses.get_mut(m.0).ok_or(ComputationError::UnknownMatrix(m))?.is_output = true;
            }
        }

        for (index, command) in computation.commands.iter().enumerate() {
            match command {
                Command::Allocate { matrix, kind } => {
                    let entry = matrix_accesses.get_mut(matrix.0).ok_or(ComputationError::UnknownMatrix(*matrix))?;
                    entry.allocate_command.get_or_insert(index);
                    if let Some(source) = kind.source() {
                        let entry = matrix_accesses.get_mut(source.0).ok_or(ComputationError::UnknownMatrix(source))?;
                        entry.deallocate_command.get_or_insert(index);
                    }
                    continue;
                }
                Command::Deallocate { matrix } => {
                    let entry = matrix_accesses.get_mut(matrix.0).ok_or(ComputationError::UnknownMatrix(*matrix))?;
                    entry.deallocate_command.get_or_insert(index);
                    continue;
                }
                _ => {}
            }

            let mut per_variable: BTreeMap<VariableId, AccessType> = BTreeMap::new();
            for (submatrix, access_type) in command_accesses(command, topology)? {
                computation.submatrix(submatrix)?;
                for &v in variables.variables_for_submatrix(submatrix) {
                    per_variable.entry(v).and_modify(|a| *a = a.combine(access_type)).or_insert(access_type);
                }
            }

            let mut per_matrix: BTreeMap<MatrixId, AccessType> = BTreeMap::new();
            for (v, access_type) in per_variable {
                variable_accesses[v].push(Access { command: index, access_type });
                per_matrix.entry(variables.matrix_of(v)).and_modify(|a| *a = a.combine(access_type)).or_insert(access_type);
            }
            for (m, access_type) in per_matrix {
                matrix_accesses[m.0].accesses.push(Access { command: index, access_type });
            }
        }

        Ok(Self {
            variables,
            variable_accesses,
            matrix_accesses,
        })
    }

    pub fn matrix(&self, matrix: MatrixId) -> &MatrixAccesses {
        &self.matrix_accesses[matrix.0]
    }

    /// Accesses of every variable of `matrix`
    pub fn variables_of(&self, matrix: MatrixId) -> impl Iterator<Item = &[Access]> + '_ {
        self.variables.variables_for_matrix(matrix).map(move |v| self.variable_accesses[v].as_slice())
    }
}
