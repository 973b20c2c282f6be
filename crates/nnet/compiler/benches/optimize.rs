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

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use nnet_compiler::{OptimizeOptions, optimize};

#[path = "../tests/common/mod.rs"]
mod common;

use common::{compile_chain, request, topology};

fn bench_optimize(c: &mut Criterion) {
    let topology = topology();
    let mut group = c.benchmark_group("optimize");
    for frames in [4, 16, 64] {
        let request = request(8, frames, true, true, true);
        let raw = compile_chain(&request, true).expect("chain compiles");
        group.bench_with_input(BenchmarkId::new("recurrent_training", frames), &raw, |b, raw| {
            b.iter(|| {
                let mut computation = raw.clone();
                optimize(&OptimizeOptions::default(), &topology, &request, &mut computation).expect("optimize succeeds");
                black_box(computation)
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_optimize);
criterion_main!(benches);
