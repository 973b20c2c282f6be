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

//! Cleanup shared by the passes: no-op removal and renumbering

use nnet_common::{Computation, MatrixId, SubMatrixId, SubMatrixInfo};
use std::collections::HashMap;

/// Drop every `NoOperation` command, returning how many were removed
pub fn remove_no_ops(computation: &mut Computation) -> usize {
    let before = computation.commands.len();
    computation.commands.retain(|c| !c.is_no_op());
    before - computation.commands.len()
}

/// Drop unreferenced submatrices and matrices, fold duplicate submatrices
/// together and renumber what is left in its original order
pub fn renumber(computation: &mut Computation) {
    let mut used_submatrices = vec![false; computation.num_submatrices()];
    for command in &computation.commands {
        for s in command.submatrices() {
            used_submatrices[s.0] = true;
        }
    }

    let mut submatrix_map: Vec<Option<SubMatrixId>> = vec![None; computation.num_submatrices()];
    let mut canonical: HashMap<SubMatrixInfo, SubMatrixId> = HashMap::new();
    let mut submatrices: Vec<SubMatrixInfo> = Vec::new();
    for (i, info) in computation.submatrices.iter().enumerate() {
        if !used_submatrices[i] {
            continue;
        }
        let id = *canonical.entry(*info).or_insert_with(|| {
            submatrices.push(*info);
            SubMatrixId(submatrices.len() - 1)
        });
        submatrix_map[i] = Some(id);
    }

    let mut used_matrices = vec![false; computation.num_matrices()];
    for sub in &submatrices {
        used_matrices[sub.matrix.0] = true;
    }
    for command in &computation.commands {
        for m in command.matrices() {
            used_matrices[m.0] = true;
        }
    }
    for binding in &computation.bindings {
        used_matrices[binding.value.0] = true;
        if let Some(d) = binding.deriv {
            used_matrices[d.0] = true;
        }
    }

    let mut matrix_map: Vec<Option<MatrixId>> = vec![None; computation.num_matrices()];
    let mut matrices = Vec::new();
    for (i, info) in computation.matrices.iter().enumerate() {
        if used_matrices[i] {
            matrix_map[i] = Some(MatrixId(matrices.len()));
            matrices.push(*info);
        }
    }

    // every id looked up below was marked used above
    let map_matrix = |m: MatrixId| matrix_map[m.0].unwrap_or(m);
    for sub in &mut submatrices {
        sub.matrix = map_matrix(sub.matrix);
    }
    for command in &mut computation.commands {
        command.map_submatrices(|s| submatrix_map[s.0].unwrap_or(s));
        command.map_matrices(map_matrix);
    }
    for binding in &mut computation.bindings {
        binding.map_matrices(map_matrix);
    }
    computation.matrices = matrices;
    computation.submatrices = submatrices;
}

#[cfg(test)]
mod tests {
    use super::*;
    use nnet_common::{AllocKind, Command};

    #[test]
    fn test_remove_no_ops() {
        let mut c = Computation::new();
        c.push(Command::NoOperation);
        c.push(Command::PhaseMarker);
        c.push(Command::NoOperation);
        assert_eq!(remove_no_ops(&mut c), 2);
        assert_eq!(c.commands, vec![Command::PhaseMarker]);
    }

    #[test]
    fn test_renumber_drops_unused_and_merges_duplicates() {
        let mut c = Computation::new();
        let unused = c.add_matrix(3, 3).unwrap();
        let a = c.add_matrix(2, 2).unwrap();
        let b = c.add_matrix(2, 2).unwrap();
        c.add_whole_submatrix(unused).unwrap();
        let sa = c.add_whole_submatrix(a).unwrap();
        let sa_dup = c.add_whole_submatrix(a).unwrap();
        let sb = c.add_whole_submatrix(b).unwrap();
        c.push(Command::Allocate { matrix: b, kind: AllocKind::Undefined });
        c.push(Command::MatrixCopy { dest: sb, src: sa });
        c.push(Command::MatrixAdd { dest: sb, src: sa_dup });
        c.bind_input("x", a, None);
        c.bind_output("y", b, None);

        renumber(&mut c);

        assert_eq!(c.num_matrices(), 2);
        assert_eq!(c.num_submatrices(), 2);
        let (a, b) = (MatrixId(0), MatrixId(1));
        assert_eq!(c.submatrices[0].matrix, a);
        assert_eq!(c.submatrices[1].matrix, b);
        assert_eq!(
            c.commands,
            vec![
                Command::Allocate { matrix: b, kind: AllocKind::Undefined },
                Command::MatrixCopy { dest: SubMatrixId(1), src: SubMatrixId(0) },
                Command::MatrixAdd { dest: SubMatrixId(1), src: SubMatrixId(0) },
            ]
        );
        assert!(c.is_input(a));
        assert!(c.is_output(b));
    }
}
