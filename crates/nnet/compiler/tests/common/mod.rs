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

//! Shared helpers for the optimizer integration tests
//!
//! Provides a three-component test network, a compiler that unrolls a
//! (possibly recurrent) chain over time, and a reference interpreter that
//! executes computations on integer data so results compare exactly.

#![allow(dead_code)]

use nnet_common::{AllocKind, Command, ComponentId, ComponentProperties, ComponentTable, Computation, ComputationRequest, IoDirection, IoSpecification, MatrixId, SubMatrixId};
use nnet_compiler::{ComputationCompiler, OptimizeError, OptimizeResult};
use std::collections::{BTreeMap, BTreeSet};

pub const AFFINE: ComponentId = ComponentId(0);
pub const RELU: ComponentId = ComponentId(1);
/// Adds its input to its output, and its output derivative to its input derivative
pub const SUM: ComponentId = ComponentId(2);

pub const INPUT_DIM: usize = 3;
pub const HIDDEN_DIM: usize = 4;

pub fn topology() -> ComponentTable {
    ComponentTable::new(vec![
        ComponentProperties::affine(),
        ComponentProperties::nonlinearity(),
        ComponentProperties {
            propagate_adds: true,
            backprop_adds: true,
            ..Default::default()
        },
    ])
}

pub fn request(num_sequences: i32, num_frames: i32, input_deriv: bool, output_deriv: bool, model_deriv: bool) -> ComputationRequest {
    ComputationRequest {
        inputs: vec![IoSpecification::frames("input", num_sequences, 0, num_frames, input_deriv)],
        outputs: vec![IoSpecification::frames("output", num_sequences, 0, num_frames, output_deriv)],
        need_model_derivative: model_deriv,
        store_component_stats: false,
    }
}

/// Unrolls affine -> relu (-> running sum when recurrent) over every frame
///
/// Like a straightforward compiler it allocates every matrix zeroed up
/// front and frees it at the end, leaving all the work to the optimizer.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChainCompiler {
    pub recurrent: bool,
}

impl ComputationCompiler for ChainCompiler {
    fn compile(&self, request: &ComputationRequest) -> OptimizeResult<Computation> {
        compile_chain(request, self.recurrent)
    }
}

struct Builder {
    computation: Computation,
    /// Matrices allocated up front, with whether they are freed at the end
    allocated: Vec<(MatrixId, bool)>,
    body: Vec<Command>,
}

impl Builder {
    fn matrix(&mut self, rows: usize, cols: usize) -> OptimizeResult<MatrixId> {
        Ok(self.computation.add_matrix(rows, cols)?)
    }

    fn scratch(&mut self, rows: usize, cols: usize) -> OptimizeResult<SubMatrixId> {
        let m = self.matrix(rows, cols)?;
        self.allocated.push((m, true));
        Ok(self.computation.add_whole_submatrix(m)?)
    }

    fn frame(&mut self, m: MatrixId, t: usize, n: usize) -> OptimizeResult<SubMatrixId> {
        let cols = self.computation.matrix(m)?.num_cols;
        Ok(self.computation.add_submatrix(m, t * n, n, 0, cols)?)
    }

    fn push(&mut self, command: Command) {
        self.body.push(command);
    }

    fn finish(mut self) -> Computation {
        for &(matrix, _) in &self.allocated {
            self.computation.push(Command::Allocate { matrix, kind: AllocKind::Zeroed });
        }
        self.computation.commands.append(&mut self.body);
        for &(matrix, free) in &self.allocated {
            if free {
                self.computation.push(Command::Deallocate { matrix });
            }
        }
        self.computation
    }
}

pub fn compile_chain(request: &ComputationRequest, recurrent: bool) -> OptimizeResult<Computation> {
    let input = request.input("input").ok_or_else(|| OptimizeError::Compilation("request has no 'input'".to_string()))?;
    let output = request.output("output").ok_or_else(|| OptimizeError::Compilation("request has no 'output'".to_string()))?;
    let frames = input.indexes.iter().map(|i| i.t).collect::<BTreeSet<_>>().len();
    if frames == 0 || output.num_rows() != input.num_rows() {
        return Err(OptimizeError::Compilation("input and output frames differ".to_string()));
    }
    let n = input.num_rows() / frames;
    let backward = output.has_deriv;
    let input_deriv = backward && input.has_deriv;
    let model_deriv = backward && request.need_model_derivative;

    let mut b = Builder {
        computation: Computation::new(),
        allocated: Vec::new(),
        body: Vec::new(),
    };
    let x = b.matrix(n * frames, INPUT_DIM)?;
    let y = b.matrix(n * frames, HIDDEN_DIM)?;
    b.allocated.push((y, false));

    let mut saved = Vec::new();
    let mut state: Option<SubMatrixId> = None;
    for t in 0..frames {
        let x_t = b.frame(x, t, n)?;
        let h_t = b.scratch(n, HIDDEN_DIM)?;
        b.push(Command::Propagate { component: AFFINE, input: x_t, output: h_t });
        let r_t = b.scratch(n, HIDDEN_DIM)?;
        b.push(Command::Propagate { component: RELU, input: h_t, output: r_t });
        let out_t = if recurrent {
            let s_t = b.scratch(n, HIDDEN_DIM)?;
            b.push(Command::Propagate { component: SUM, input: r_t, output: s_t });
            if let Some(previous) = state {
                b.push(Command::MatrixAdd { dest: s_t, src: previous });
            }
            state = Some(s_t);
            s_t
        } else {
            r_t
        };
        let y_t = b.frame(y, t, n)?;
        b.push(Command::MatrixCopy { dest: y_t, src: out_t });
        saved.push((x_t, r_t));
    }

    let mut dx = None;
    let mut dy = None;
    if backward {
        b.push(Command::PhaseMarker);
        let dy_matrix = b.matrix(n * frames, HIDDEN_DIM)?;
        dy = Some(dy_matrix);
        if input_deriv {
            let m = b.matrix(n * frames, INPUT_DIM)?;
            b.allocated.push((m, false));
            dx = Some(m);
        }

        let mut state_deriv: Option<SubMatrixId> = None;
        for t in (0..frames).rev() {
            let (x_t, r_t) = saved[t];
            let dy_t = b.frame(dy_matrix, t, n)?;
            let dr_t = if recurrent {
                let ds_t = b.scratch(n, HIDDEN_DIM)?;
                b.push(Command::MatrixAdd { dest: ds_t, src: dy_t });
                if let Some(next) = state_deriv {
                    b.push(Command::MatrixAdd { dest: ds_t, src: next });
                }
                state_deriv = Some(ds_t);
                let dr_t = b.scratch(n, HIDDEN_DIM)?;
                b.push(Command::Backprop {
                    component: SUM,
                    in_value: None,
                    out_value: None,
                    out_deriv: ds_t,
                    in_deriv: Some(dr_t),
                    update_model: false,
                });
                dr_t
            } else {
                let dr_t = b.scratch(n, HIDDEN_DIM)?;
                b.push(Command::MatrixCopy { dest: dr_t, src: dy_t });
                dr_t
            };
            let dh_t = b.scratch(n, HIDDEN_DIM)?;
            b.push(Command::Backprop {
                component: RELU,
                in_value: None,
                out_value: Some(r_t),
                out_deriv: dr_t,
                in_deriv: Some(dh_t),
                update_model: false,
            });
            let dx_t = match dx {
                Some(m) => Some(b.frame(m, t, n)?),
                None => None,
            };
            if dx_t.is_some() || model_deriv {
                b.push(Command::Backprop {
                    component: AFFINE,
                    in_value: Some(x_t),
                    out_value: None,
                    out_deriv: dh_t,
                    in_deriv: dx_t,
                    update_model: model_deriv,
                });
            }
        }
    }

    let mut computation = b.finish();
    computation.bind_input("input", x, dx);
    computation.bind_output("output", y, dy);
    Ok(computation)
}

/// Key under which the data of a binding's matrix is supplied or produced
fn data_key(name: &str, is_deriv: bool) -> String {
    if is_deriv { format!("{name}.deriv") } else { name.to_string() }
}

/// Deterministic small integers for every matrix the caller supplies
pub fn supplied_data(computation: &Computation, seed: u64) -> BTreeMap<String, Vec<i64>> {
    let mut data = BTreeMap::new();
    for binding in &computation.bindings {
        let Some(m) = binding.supplied() else {
            continue;
        };
        let key = data_key(&binding.name, binding.direction == IoDirection::Output);
        let mut state = key.bytes().fold(seed ^ 0x9e37_79b9_7f4a_7c15, |h, b| h.rotate_left(5) ^ u64::from(b));
        let values = (0..computation.matrices[m.0].num_elements())
            .map(|_| {
                state = state.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1_442_695_040_888_963_407);
                ((state >> 33) % 7) as i64 - 3
            })
            .collect();
        data.insert(key, values);
    }
    data
}

/// Everything observable after running a computation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub produced: BTreeMap<String, Vec<i64>>,
    pub gradients: BTreeMap<ComponentId, Vec<i64>>,
}

fn weight(component: ComponentId, k: usize, c: usize) -> i64 {
    ((k + 2 * c + component.0) % 3) as i64 - 1
}

/// Dense row-major block read out of a submatrix
struct Block {
    rows: usize,
    cols: usize,
    data: Vec<i64>,
}

impl Block {
    fn at(&self, r: usize, c: usize) -> i64 {
        self.data[r * self.cols + c]
    }
}

struct Machine<'a> {
    topology: &'a ComponentTable,
    computation: &'a Computation,
    storage: Vec<Option<Vec<i64>>>,
    gradients: BTreeMap<ComponentId, Vec<i64>>,
}

impl Machine<'_> {
    fn read(&self, s: SubMatrixId) -> Result<Block, String> {
        let info = self.computation.submatrices[s.0];
        let cols = self.computation.matrices[info.matrix.0].num_cols;
        let buffer = self.storage[info.matrix.0].as_ref().ok_or_else(|| format!("read of {} which holds no storage", info.matrix))?;
        let mut data = Vec::with_capacity(info.num_rows * info.num_cols);
        for r in info.row_offset..info.row_end() {
            data.extend_from_slice(&buffer[r * cols + info.col_offset..r * cols + info.col_end()]);
        }
        Ok(Block {
            rows: info.num_rows,
            cols: info.num_cols,
            data,
        })
    }

    fn shape(&self, s: SubMatrixId) -> (usize, usize) {
        let info = self.computation.submatrices[s.0];
        (info.num_rows, info.num_cols)
    }

    fn write(&mut self, s: SubMatrixId, data: &[i64], add: bool) -> Result<(), String> {
        let info = self.computation.submatrices[s.0];
        let cols = self.computation.matrices[info.matrix.0].num_cols;
        let buffer = self.storage[info.matrix.0].as_mut().ok_or_else(|| format!("write of {} which holds no storage", info.matrix))?;
        for r in 0..info.num_rows {
            for c in 0..info.num_cols {
                let slot = &mut buffer[(info.row_offset + r) * cols + info.col_offset + c];
                let value = data[r * info.num_cols + c];
                *slot = if add { slot.wrapping_add(value) } else { value };
            }
        }
        Ok(())
    }

    fn accumulate_gradient(&mut self, component: ComponentId, in_value: Option<SubMatrixId>, out_deriv: SubMatrixId) -> Result<(), String> {
        if component != AFFINE {
            return Ok(());
        }
        let input = self.read(in_value.ok_or("affine update without input")?)?;
        let deriv = self.read(out_deriv)?;
        let gradient = self.gradients.entry(component).or_insert_with(|| vec![0; input.cols * deriv.cols]);
        for k in 0..input.cols {
            for c in 0..deriv.cols {
                let sum: i64 = (0..input.rows).map(|r| input.at(r, k).wrapping_mul(deriv.at(r, c))).fold(0, i64::wrapping_add);
                gradient[k * deriv.cols + c] = gradient[k * deriv.cols + c].wrapping_add(sum);
            }
        }
        Ok(())
    }

    fn step(&mut self, command: &Command) -> Result<(), String> {
        match *command {
            Command::Allocate { matrix, kind } => {
                if self.storage[matrix.0].is_some() {
                    return Err(format!("{matrix} allocated twice"));
                }
                let size = self.computation.matrices[matrix.0].num_elements();
                let buffer = match kind {
                    AllocKind::Zeroed => vec![0; size],
                    AllocKind::Undefined => (0..size).map(|i| 1_000_000 + i as i64).collect(),
                    AllocKind::ReuseOther { source } | AllocKind::ReuseOtherZeroed { source } => {
                        let mut buffer = self.storage[source.0].take().ok_or_else(|| format!("{matrix} reuses {source} which holds no storage"))?;
                        if buffer.len() != size {
                            return Err(format!("{matrix} reuses {source} of a different size"));
                        }
                        if kind.is_zeroed() {
                            buffer.fill(0);
                        }
                        buffer
                    }
                };
                self.storage[matrix.0] = Some(buffer);
            }
            Command::Deallocate { matrix } => {
                self.storage[matrix.0].take().ok_or_else(|| format!("{matrix} freed without storage"))?;
            }
            Command::Propagate { component, input, output } => {
                let props = self.topology.components()[component.0];
                let x = self.read(input)?;
                let (_, out_cols) = self.shape(output);
                let result: Vec<i64> = match component {
                    AFFINE => (0..x.rows)
                        .flat_map(|r| (0..out_cols).map(move |c| (r, c)))
                        .map(|(r, c)| (0..x.cols).map(|k| x.at(r, k) * weight(component, k, c)).sum())
                        .collect(),
                    RELU => x.data.iter().map(|&v| v.max(0)).collect(),
                    _ => x.data.clone(),
                };
                self.write(output, &result, props.propagate_adds)?;
            }
            Command::Backprop {
                component,
                in_value,
                out_value,
                out_deriv,
                in_deriv,
                update_model,
            } => {
                let props = self.topology.components()[component.0];
                if let Some(in_deriv) = in_deriv {
                    let od = self.read(out_deriv)?;
                    let (_, in_cols) = self.shape(in_deriv);
                    let result: Vec<i64> = match component {
                        AFFINE => (0..od.rows)
                            .flat_map(|r| (0..in_cols).map(move |k| (r, k)))
                            .map(|(r, k)| (0..od.cols).map(|c| od.at(r, c) * weight(component, k, c)).sum())
                            .collect(),
                        RELU => {
                            let ov = self.read(out_value.ok_or("relu backprop without output")?)?;
                            od.data.iter().zip(&ov.data).map(|(&d, &v)| if v > 0 { d } else { 0 }).collect()
                        }
                        _ => od.data.clone(),
                    };
                    self.write(in_deriv, &result, props.backprop_adds)?;
                }
                if update_model {
                    self.accumulate_gradient(component, in_value, out_deriv)?;
                }
            }
            Command::ModelUpdate {
                component, in_value, out_deriv, ..
            } => self.accumulate_gradient(component, in_value, out_deriv)?,
            Command::MatrixCopy { dest, src } => {
                let block = self.read(src)?;
                self.write(dest, &block.data, false)?;
            }
            Command::MatrixAdd { dest, src } => {
                let block = self.read(src)?;
                self.write(dest, &block.data, true)?;
            }
            Command::NoOperation | Command::PhaseMarker => {}
        }
        Ok(())
    }
}

/// Run `computation` on `supplied` data
pub fn execute(topology: &ComponentTable, computation: &Computation, supplied: &BTreeMap<String, Vec<i64>>) -> Result<Outcome, String> {
    let mut machine = Machine {
        topology,
        computation,
        storage: vec![None; computation.num_matrices()],
        gradients: BTreeMap::new(),
    };
    for binding in &computation.bindings {
        if let Some(m) = binding.supplied() {
            let key = data_key(&binding.name, binding.direction == IoDirection::Output);
            let data = supplied.get(&key).ok_or_else(|| format!("no data supplied for '{key}'"))?;
            machine.storage[m.0] = Some(data.clone());
        }
    }
    for (index, command) in computation.commands.iter().enumerate() {
        machine.step(command).map_err(|e| format!("c{index} ({command}): {e}"))?;
    }

    let mut produced = BTreeMap::new();
    for binding in &computation.bindings {
        if let Some(m) = binding.produced() {
            let key = data_key(&binding.name, binding.direction == IoDirection::Input);
            let data = machine.storage[m.0].clone().ok_or_else(|| format!("'{key}' holds no storage at the end"))?;
            produced.insert(key, data);
        }
    }
    Ok(Outcome {
        produced,
        gradients: machine.gradients,
    })
}

/// Run a computation and its optimized form on the same supplied data
pub fn run_both(computation: &Computation, optimized: &Computation, seed: u64) -> (Outcome, Outcome) {
    let topology = topology();
    let data = supplied_data(computation, seed);
    let expected = execute(&topology, computation, &data).unwrap_or_else(|e| panic!("raw computation failed: {e}\n{computation}"));
    let actual = execute(&topology, optimized, &data).unwrap_or_else(|e| panic!("optimized computation failed: {e}\n{optimized}"));
    (expected, actual)
}
