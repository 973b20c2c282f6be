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

//! Structural validity checks for computations
//!
//! The optimizer runs these on its input and after every pass so that a
//! rewrite that would break the plan is reported instead of executed.

use super::accesses::{ComputationAnalysis, component_properties};
use nnet_common::{Command, Computation, MatrixId, NetworkTopology};

/// Checks that a computation is executable as written
pub struct ComputationChecker<'a> {
    computation: &'a Computation,
    topology: &'a dyn NetworkTopology,
}

impl<'a> ComputationChecker<'a> {
    pub fn new(computation: &'a Computation, topology: &'a dyn NetworkTopology) -> Self {
        Self { computation, topology }
    }

    /// Run every check, returning a description of the first problem found
    pub fn check(&self) -> Result<(), String> {
        self.check_indexes()?;
        let analysis = ComputationAnalysis::new(self.computation, self.topology).map_err(|e| e.to_string())?;
        self.check_sizing(&analysis)?;
        self.check_undefined_reads(&analysis)?;
        self.check_consolidation()
    }

    fn check_indexes(&self) -> Result<(), String> {
        let c = self.computation;
        for (i, sub) in c.submatrices.iter().enumerate() {
            c.check_submatrix(sub).map_err(|e| format!("s{i}: {e}"))?;
        }
        for binding in &c.bindings {
            for m in std::iter::once(binding.value).chain(binding.deriv) {
                c.matrix(m).map_err(|e| format!("binding '{}': {e}", binding.name))?;
            }
        }
        for (index, command) in c.commands.iter().enumerate() {
            for s in command.submatrices() {
                c.submatrix(s).map_err(|e| format!("c{index}: {e}"))?;
            }
            for m in command.matrices() {
                c.matrix(m).map_err(|e| format!("c{index}: {e}"))?;
            }
            if let Some(component) = command.component() {
                component_properties(self.topology, component).map_err(|e| format!("c{index}: {e}"))?;
            }
        }
        Ok(())
    }

    fn check_sizing(&self, analysis: &ComputationAnalysis) -> Result<(), String> {
        let c = self.computation;
        let mut allocations = vec![0usize; c.num_matrices()];
        let mut deallocations = vec![0usize; c.num_matrices()];

        for (index, command) in c.commands.iter().enumerate() {
            match command {
                Command::Allocate { matrix, kind } => {
                    allocations[matrix.0] += 1;
                    if let Some(source) = kind.source() {
                        deallocations[source.0] += 1;
                        if source == *matrix {
                            return Err(format!("c{index}: {matrix} reuses its own storage"));
                        }
                        if c.matrices[source.0].shape() != c.matrices[matrix.0].shape() {
                            return Err(format!("c{index}: {matrix} reuses {source} of a different shape"));
                        }
                    }
                }
                Command::Deallocate { matrix } => deallocations[matrix.0] += 1,
                _ => {}
            }
        }

        for (i, accesses) in analysis.matrix_accesses.iter().enumerate() {
            let m = MatrixId(i);
            if allocations[i] > 1 {
                return Err(format!("{m} is allocated {} times", allocations[i]));
            }
            if deallocations[i] > 1 {
                return Err(format!("{m} is deallocated {} times", deallocations[i]));
            }
            if accesses.is_input && accesses.allocate_command.is_some() {
                return Err(format!("input matrix {m} is allocated by the computation"));
            }
            if accesses.is_output && accesses.deallocate_command.is_some() {
                return Err(format!("output matrix {m} is deallocated before it can be read"));
            }
            if !accesses.is_input && accesses.allocate_command.is_none() && (!accesses.accesses.is_empty() || accesses.deallocate_command.is_some()) {
                return Err(format!("{m} is used without being allocated"));
            }
            if !accesses.is_output && accesses.allocate_command.is_some() && accesses.deallocate_command.is_none() {
                return Err(format!("{m} is allocated but never deallocated"));
            }
            if let (Some(alloc), Some(first)) = (accesses.allocate_command, accesses.first_access()) {
                if first.command < alloc {
                    return Err(format!("{m} is accessed at c{} before its allocation at c{alloc}", first.command));
                }
            }
            if let (Some(dealloc), Some(last)) = (accesses.deallocate_command, accesses.last_access()) {
                if last.command > dealloc {
                    return Err(format!("{m} is accessed at c{} after its deallocation at c{dealloc}", last.command));
                }
            }
            if let (Some(alloc), Some(dealloc)) = (accesses.allocate_command, accesses.deallocate_command) {
                if dealloc < alloc {
                    return Err(format!("{m} is deallocated at c{dealloc} before its allocation at c{alloc}"));
                }
            }
        }
        Ok(())
    }

    fn check_undefined_reads(&self, analysis: &ComputationAnalysis) -> Result<(), String> {
        let c = self.computation;
        for (i, accesses) in analysis.matrix_accesses.iter().enumerate() {
            let Some(alloc) = accesses.allocate_command else {
                continue;
            };
            let zeroed = matches!(&c.commands[alloc], Command::Allocate { kind, .. } if kind.is_zeroed());
            if zeroed {
                continue;
            }
            let m = MatrixId(i);
            for variable in analysis.variables_of(m) {
                if let Some(first) = variable.first() {
                    if first.access_type.reads() {
                        return Err(format!("c{} reads undefined data of {m}", first.command));
                    }
                }
            }
        }
        Ok(())
    }

    fn check_consolidation(&self) -> Result<(), String> {
        let c = self.computation;
        match c.commands.iter().position(|cmd| matches!(cmd, Command::ModelUpdate { .. })) {
            Some(index) if !c.model_update_consolidated => Err(format!("c{index}: model update command in an unconsolidated computation")),
            _ => Ok(()),
        }
    }
}
