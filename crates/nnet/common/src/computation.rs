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

//! The command-sequence representation of one network evaluation
//!
//! A [`Computation`] is a table of matrices, a table of submatrices (row and
//! column windows into those matrices) and an ordered list of [`Command`]s
//! that allocate storage, run components forward and backward, and move data
//! between submatrices. Commands execute strictly in order.

use crate::error::{ComputationError, ComputationResult};
use crate::topology::ComponentId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Index of a matrix in [`Computation::matrices`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MatrixId(pub usize);

impl MatrixId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for MatrixId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m{}", self.0)
    }
}

/// Index of a submatrix in [`Computation::submatrices`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubMatrixId(pub usize);

impl SubMatrixId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for SubMatrixId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// Shape of a matrix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MatrixInfo {
    pub num_rows: usize,
    pub num_cols: usize,
}

impl MatrixInfo {
    pub fn new(num_rows: usize, num_cols: usize) -> Self {
        Self { num_rows, num_cols }
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.num_rows, self.num_cols)
    }

    pub fn num_elements(&self) -> usize {
        self.num_rows * self.num_cols
    }
}

/// A rectangular window into a matrix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubMatrixInfo {
    pub matrix: MatrixId,
    pub row_offset: usize,
    pub num_rows: usize,
    pub col_offset: usize,
    pub num_cols: usize,
}

impl SubMatrixInfo {
    pub fn row_end(&self) -> usize {
        self.row_offset + self.num_rows
    }

    pub fn col_end(&self) -> usize {
        self.col_offset + self.num_cols
    }

    /// Whether the two windows share at least one element
    pub fn overlaps(&self, other: &SubMatrixInfo) -> bool {
        self.matrix == other.matrix
            && self.row_offset < other.row_end()
            && other.row_offset < self.row_end()
            && self.col_offset < other.col_end()
            && other.col_offset < self.col_end()
    }
}

/// How an allocate command obtains and initializes its storage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocKind {
    /// Fresh storage filled with zeros
    Zeroed,
    /// Fresh storage with unspecified contents
    Undefined,
    /// Take over the storage of `source`, which is freed by this command
    ReuseOther { source: MatrixId },
    /// Take over the storage of `source` and zero it
    ReuseOtherZeroed { source: MatrixId },
}

impl AllocKind {
    pub fn is_zeroed(&self) -> bool {
        matches!(self, AllocKind::Zeroed | AllocKind::ReuseOtherZeroed { .. })
    }

    pub fn is_reuse(&self) -> bool {
        self.source().is_some()
    }

    /// The matrix whose storage is taken over, if any
    pub fn source(&self) -> Option<MatrixId> {
        match self {
            AllocKind::ReuseOther { source } | AllocKind::ReuseOtherZeroed { source } => Some(*source),
            AllocKind::Zeroed | AllocKind::Undefined => None,
        }
    }

    /// The same allocation with the zero-fill dropped
    pub fn without_zeroing(self) -> Self {
        match self {
            AllocKind::Zeroed => AllocKind::Undefined,
            AllocKind::ReuseOtherZeroed { source } => AllocKind::ReuseOther { source },
            other => other,
        }
    }

    /// Reuse form of this allocation taking its storage from `source`
    pub fn reusing(self, source: MatrixId) -> Self {
        if self.is_zeroed() { AllocKind::ReuseOtherZeroed { source } } else { AllocKind::ReuseOther { source } }
    }
}

/// One instruction of a computation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    Allocate {
        matrix: MatrixId,
        kind: AllocKind,
    },
    Deallocate {
        matrix: MatrixId,
    },
    Propagate {
        component: ComponentId,
        input: SubMatrixId,
        output: SubMatrixId,
    },
    Backprop {
        component: ComponentId,
        in_value: Option<SubMatrixId>,
        out_value: Option<SubMatrixId>,
        out_deriv: SubMatrixId,
        in_deriv: Option<SubMatrixId>,
        update_model: bool,
    },
    /// Parameter update for a component over concatenated time steps
    ModelUpdate {
        component: ComponentId,
        in_value: Option<SubMatrixId>,
        out_value: Option<SubMatrixId>,
        out_deriv: SubMatrixId,
    },
    MatrixCopy {
        dest: SubMatrixId,
        src: SubMatrixId,
    },
    MatrixAdd {
        dest: SubMatrixId,
        src: SubMatrixId,
    },
    NoOperation,
    /// Boundary between the forward and backward phases
    PhaseMarker,
}

impl Command {
    /// Allocate and deallocate commands
    pub fn is_sizing(&self) -> bool {
        matches!(self, Command::Allocate { .. } | Command::Deallocate { .. })
    }

    pub fn is_no_op(&self) -> bool {
        matches!(self, Command::NoOperation)
    }

    pub fn component(&self) -> Option<ComponentId> {
        match self {
            Command::Propagate { component, .. } | Command::Backprop { component, .. } | Command::ModelUpdate { component, .. } => Some(*component),
            _ => None,
        }
    }

    /// Every submatrix argument, in argument order
    pub fn submatrices(&self) -> Vec<SubMatrixId> {
        match self {
            Command::Propagate { input, output, .. } => vec![*input, *output],
            Command::Backprop {
                in_value,
                out_value,
                out_deriv,
                in_deriv,
                ..
            } => [*in_value, *out_value, Some(*out_deriv), *in_deriv].into_iter().flatten().collect(),
            Command::ModelUpdate { in_value, out_value, out_deriv, .. } => [*in_value, *out_value, Some(*out_deriv)].into_iter().flatten().collect(),
            Command::MatrixCopy { dest, src } | Command::MatrixAdd { dest, src } => vec![*dest, *src],
            Command::Allocate { .. } | Command::Deallocate { .. } | Command::NoOperation | Command::PhaseMarker => Vec::new(),
        }
    }

    /// Every matrix named directly (sizing commands and reuse sources)
    pub fn matrices(&self) -> Vec<MatrixId> {
        match self {
            Command::Allocate { matrix, kind } => std::iter::once(*matrix).chain(kind.source()).collect(),
            Command::Deallocate { matrix } => vec![*matrix],
            _ => Vec::new(),
        }
    }

    /// Rewrite every submatrix argument through `f`
    pub fn map_submatrices(&mut self, mut f: impl FnMut(SubMatrixId) -> SubMatrixId) {
        match self {
            Command::Propagate { input, output, .. } => {
                *input = f(*input);
                *output = f(*output);
            }
            Command::Backprop {
                in_value,
                out_value,
                out_deriv,
                in_deriv,
                ..
            } => {
                *in_value = in_value.map(&mut f);
                *out_value = out_value.map(&mut f);
                *out_deriv = f(*out_deriv);
                *in_deriv = in_deriv.map(&mut f);
            }
            Command::ModelUpdate { in_value, out_value, out_deriv, .. } => {
                *in_value = in_value.map(&mut f);
                *out_value = out_value.map(&mut f);
                *out_deriv = f(*out_deriv);
            }
            Command::MatrixCopy { dest, src } | Command::MatrixAdd { dest, src } => {
                *dest = f(*dest);
                *src = f(*src);
            }
            Command::Allocate { .. } | Command::Deallocate { .. } | Command::NoOperation | Command::PhaseMarker => {}
        }
    }

    /// Rewrite every directly named matrix through `f`
    pub fn map_matrices(&mut self, mut f: impl FnMut(MatrixId) -> MatrixId) {
        match self {
            Command::Allocate { matrix, kind } => {
                *matrix = f(*matrix);
                *kind = match *kind {
                    AllocKind::ReuseOther { source } => AllocKind::ReuseOther { source: f(source) },
                    AllocKind::ReuseOtherZeroed { source } => AllocKind::ReuseOtherZeroed { source: f(source) },
                    other => other,
                };
            }
            Command::Deallocate { matrix } => *matrix = f(*matrix),
            _ => {}
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn opt(s: &Option<SubMatrixId>) -> String {
            s.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string())
        }

        match self {
            Command::Allocate { matrix, kind } => match kind {
                AllocKind::Zeroed => write!(f, "{matrix} = alloc_zeroed()"),
                AllocKind::Undefined => write!(f, "{matrix} = alloc_undefined()"),
                AllocKind::ReuseOther { source } => write!(f, "{matrix} = reuse({source})"),
                AllocKind::ReuseOtherZeroed { source } => write!(f, "{matrix} = reuse_zeroed({source})"),
            },
            Command::Deallocate { matrix } => write!(f, "dealloc({matrix})"),
            Command::Propagate { component, input, output } => write!(f, "propagate({component}, {input} -> {output})"),
            Command::Backprop {
                component,
                in_value,
                out_value,
                out_deriv,
                in_deriv,
                update_model,
            } => write!(
                f,
                "backprop({component}, in={}, out={}, out_deriv={out_deriv} -> in_deriv={}{})",
                opt(in_value),
                opt(out_value),
                opt(in_deriv),
                if *update_model { ", update" } else { "" }
            ),
            Command::ModelUpdate {
                component,
                in_value,
                out_value,
                out_deriv,
            } => write!(f, "model_update({component}, in={}, out={}, out_deriv={out_deriv})", opt(in_value), opt(out_value)),
            Command::MatrixCopy { dest, src } => write!(f, "{dest} = {src}"),
            Command::MatrixAdd { dest, src } => write!(f, "{dest} += {src}"),
            Command::NoOperation => write!(f, "no_op"),
            Command::PhaseMarker => write!(f, "# begin backward"),
        }
    }
}

/// Whether a binding belongs to a network input or a network output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IoDirection {
    Input,
    Output,
}

/// Connects a named network input/output to the matrices holding its value and derivative
///
/// The value of an input node and the derivative of an output node are
/// supplied by the caller before execution; the other two are read back
/// after execution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IoBinding {
    pub name: String,
    pub direction: IoDirection,
    pub value: MatrixId,
    pub deriv: Option<MatrixId>,
}

impl IoBinding {
    /// Matrices whose contents are provided by the caller
    pub fn supplied(&self) -> Option<MatrixId> {
        match self.direction {
            IoDirection::Input => Some(self.value),
            IoDirection::Output => self.deriv,
        }
    }

    /// Matrices whose contents are read by the caller
    pub fn produced(&self) -> Option<MatrixId> {
        match self.direction {
            IoDirection::Input => self.deriv,
            IoDirection::Output => Some(self.value),
        }
    }

    pub fn map_matrices(&mut self, mut f: impl FnMut(MatrixId) -> MatrixId) {
        self.value = f(self.value);
        self.deriv = self.deriv.map(f);
    }
}

/// A compiled evaluation plan
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Computation {
    pub matrices: Vec<MatrixInfo>,
    pub submatrices: Vec<SubMatrixInfo>,
    pub commands: Vec<Command>,
    pub bindings: Vec<IoBinding>,
    /// Set once the model-update phase has been consolidated
    #[serde(default)]
    pub model_update_consolidated: bool,
}

impl Computation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn num_matrices(&self) -> usize {
        self.matrices.len()
    }

    pub fn num_submatrices(&self) -> usize {
        self.submatrices.len()
    }

    pub fn num_commands(&self) -> usize {
        self.commands.len()
    }

    pub fn add_matrix(&mut self, num_rows: usize, num_cols: usize) -> ComputationResult<MatrixId> {
        if num_rows == 0 || num_cols == 0 {
            return Err(ComputationError::EmptyMatrix { num_rows, num_cols });
        }
        self.matrices.push(MatrixInfo::new(num_rows, num_cols));
        Ok(MatrixId(self.matrices.len() - 1))
    }

    pub fn add_submatrix(&mut self, matrix: MatrixId, row_offset: usize, num_rows: usize, col_offset: usize, num_cols: usize) -> ComputationResult<SubMatrixId> {
        let info = SubMatrixInfo {
            matrix,
            row_offset,
            num_rows,
            col_offset,
            num_cols,
        };
        self.check_submatrix(&info)?;
        self.submatrices.push(info);
        Ok(SubMatrixId(self.submatrices.len() - 1))
    }

    /// Add a submatrix covering all of `matrix`
    pub fn add_whole_submatrix(&mut self, matrix: MatrixId) -> ComputationResult<SubMatrixId> {
        let info = *self.matrix(matrix)?;
        self.add_submatrix(matrix, 0, info.num_rows, 0, info.num_cols)
    }

    /// Existing submatrix covering all of `matrix`, if there is one
    pub fn whole_submatrix(&self, matrix: MatrixId) -> Option<SubMatrixId> {
        (0..self.submatrices.len()).map(SubMatrixId).find(|&s| self.submatrices[s.0].matrix == matrix && self.is_whole_matrix(s))
    }

    pub fn matrix(&self, id: MatrixId) -> ComputationResult<&MatrixInfo> {
        self.matrices.get(id.0).ok_or(ComputationError::UnknownMatrix(id))
    }

    pub fn submatrix(&self, id: SubMatrixId) -> ComputationResult<&SubMatrixInfo> {
        self.submatrices.get(id.0).ok_or(ComputationError::UnknownSubMatrix(id))
    }

    /// Whether `id` spans its entire matrix
    pub fn is_whole_matrix(&self, id: SubMatrixId) -> bool {
        let Some(sub) = self.submatrices.get(id.0) else {
            return false;
        };
        let Some(matrix) = self.matrices.get(sub.matrix.0) else {
            return false;
        };
        sub.row_offset == 0 && sub.col_offset == 0 && sub.num_rows == matrix.num_rows && sub.num_cols == matrix.num_cols
    }

    /// Validate that a submatrix lies within its matrix
    pub fn check_submatrix(&self, info: &SubMatrixInfo) -> ComputationResult<()> {
        let matrix = self.matrix(info.matrix)?;
        if info.num_rows == 0 || info.num_cols == 0 || info.row_end() > matrix.num_rows || info.col_end() > matrix.num_cols {
            return Err(ComputationError::SubMatrixOutOfBounds {
                matrix: info.matrix,
                row_offset: info.row_offset,
                row_end: info.row_end(),
                col_offset: info.col_offset,
                col_end: info.col_end(),
                num_rows: matrix.num_rows,
                num_cols: matrix.num_cols,
            });
        }
        Ok(())
    }

    /// Check that every submatrix, binding and command refers to storage that exists
    pub fn validate_indexes(&self) -> ComputationResult<()> {
        for sub in &self.submatrices {
            self.check_submatrix(sub)?;
        }
        for binding in &self.bindings {
            self.matrix(binding.value)?;
            if let Some(deriv) = binding.deriv {
                self.matrix(deriv)?;
            }
        }
        for command in &self.commands {
            for s in command.submatrices() {
                self.submatrix(s)?;
            }
            for m in command.matrices() {
                self.matrix(m)?;
            }
        }
        Ok(())
    }

    /// Append a command and return its index
    pub fn push(&mut self, command: Command) -> usize {
        self.commands.push(command);
        self.commands.len() - 1
    }

    /// Allocation kind of `matrix`, if some command allocates it
    pub fn allocation_kind(&self, matrix: MatrixId) -> Option<AllocKind> {
        self.commands.iter().find_map(|c| match c {
            Command::Allocate { matrix: m, kind } if *m == matrix => Some(*kind),
            _ => None,
        })
    }

    pub fn bind_input(&mut self, name: impl Into<String>, value: MatrixId, deriv: Option<MatrixId>) {
        self.bindings.push(IoBinding {
            name: name.into(),
            direction: IoDirection::Input,
            value,
            deriv,
        });
    }

    pub fn bind_output(&mut self, name: impl Into<String>, value: MatrixId, deriv: Option<MatrixId>) {
        self.bindings.push(IoBinding {
            name: name.into(),
            direction: IoDirection::Output,
            value,
            deriv,
        });
    }

    /// Whether the caller supplies the contents of `matrix`
    pub fn is_input(&self, matrix: MatrixId) -> bool {
        self.bindings.iter().any(|b| b.supplied() == Some(matrix))
    }

    /// Whether the caller reads the contents of `matrix` after execution
    pub fn is_output(&self, matrix: MatrixId) -> bool {
        self.bindings.iter().any(|b| b.produced() == Some(matrix))
    }

    pub fn binding(&self, name: &str, direction: IoDirection) -> Option<&IoBinding> {
        self.bindings.iter().find(|b| b.name == name && b.direction == direction)
    }
}

impl fmt::Display for Computation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "# {} matrices, {} submatrices, {} commands", self.matrices.len(), self.submatrices.len(), self.commands.len())?;
        for (i, m) in self.matrices.iter().enumerate() {
            writeln!(f, "{}: {}x{}", MatrixId(i), m.num_rows, m.num_cols)?;
        }
        for (i, s) in self.submatrices.iter().enumerate() {
            writeln!(f, "{}: {}[{}:{}, {}:{}]", SubMatrixId(i), s.matrix, s.row_offset, s.row_end(), s.col_offset, s.col_end())?;
        }
        for b in &self.bindings {
            let direction = match b.direction {
                IoDirection::Input => "input",
                IoDirection::Output => "output",
            };
            match b.deriv {
                Some(d) => writeln!(f, "{direction} '{}': value={}, deriv={d}", b.name, b.value)?,
                None => writeln!(f, "{direction} '{}': value={}", b.name, b.value)?,
            }
        }
        for (i, c) in self.commands.iter().enumerate() {
            writeln!(f, "c{i}: {c}")?;
        }
        Ok(())
    }
}
