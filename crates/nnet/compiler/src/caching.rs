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

//! Compiler front-end that remembers its most recent result
//!
//! Training loops ask for the same computation over and over, so a single
//! cached (request, computation) pair avoids recompiling and reoptimizing on
//! every minibatch. A request that differs from the cached one replaces it.

use crate::error::OptimizeResult;
use crate::interfaces::{ComputationCompiler, DeviceIndexPreparer};
use crate::optimizer::optimize;
use crate::optimizer::options::OptimizeOptions;
use nnet_common::{Computation, ComputationRequest, NetworkTopology};
use tracing::{debug, instrument};

/// Hit and miss counts of a [`CachingOptimizingCompiler`]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

struct CachedEntry {
    request: ComputationRequest,
    computation: Computation,
}

/// Compiles, optimizes and caches the computation for one request at a time
pub struct CachingOptimizingCompiler<'a, T: ?Sized, C> {
    topology: &'a T,
    compiler: C,
    options: OptimizeOptions,
    device_indexes: Option<Box<dyn DeviceIndexPreparer + 'a>>,
    cached: Option<CachedEntry>,
    stats: CacheStats,
}

impl<'a, T, C> CachingOptimizingCompiler<'a, T, C>
where
    T: NetworkTopology + ?Sized,
    C: ComputationCompiler,
{
    pub fn new(topology: &'a T, compiler: C) -> Self {
        Self::with_options(topology, compiler, OptimizeOptions::default())
    }

    pub fn with_options(topology: &'a T, compiler: C, options: OptimizeOptions) -> Self {
        Self {
            topology,
            compiler,
            options,
            device_indexes: None,
            cached: None,
            stats: CacheStats::default(),
        }
    }

    /// Run `preparer` on every freshly optimized computation
    pub fn with_device_indexes(mut self, preparer: impl DeviceIndexPreparer + 'a) -> Self {
        self.device_indexes = Some(Box::new(preparer));
        self
    }

    /// Computation for `request`, compiled and optimized on a cache miss
    ///
    /// A failed compilation leaves the previously cached entry in place.
    #[instrument(skip_all)]
    pub fn compile(&mut self, request: &ComputationRequest) -> OptimizeResult<&Computation> {
        let entry = match self.cached.take() {
            Some(entry) if entry.request == *request => {
                self.stats.hits += 1;
                debug!(hits = self.stats.hits, "computation cache hit");
                entry
            }
            previous => {
                self.stats.misses += 1;
                debug!(misses = self.stats.misses, replacing = previous.is_some(), "computation cache miss");
                match self.build(request) {
                    Ok(entry) => entry,
                    Err(e) => {
                        self.cached = previous;
                        return Err(e);
                    }
                }
            }
        };
        Ok(&self.cached.insert(entry).computation)
    }

    fn build(&self, request: &ComputationRequest) -> OptimizeResult<CachedEntry> {
        let mut computation = self.compiler.compile(request)?;
        optimize(&self.options, &self.topology, request, &mut computation)?;
        if let Some(preparer) = &self.device_indexes {
            preparer.prepare(&mut computation)?;
        }
        Ok(CachedEntry {
            request: request.clone(),
            computation,
        })
    }

    pub fn is_cached(&self, request: &ComputationRequest) -> bool {
        self.cached_request() == Some(request)
    }

    pub fn cached_request(&self) -> Option<&ComputationRequest> {
        self.cached.as_ref().map(|e| &e.request)
    }

    /// Forget the cached computation
    pub fn clear(&mut self) {
        self.cached = None;
    }

    pub fn options(&self) -> &OptimizeOptions {
        &self.options
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OptimizeError;
    use crate::interfaces::{MockComputationCompiler, MockDeviceIndexPreparer};
    use nnet_common::{AllocKind, Command, ComponentId, ComponentProperties, ComponentTable, IoSpecification, MatrixId};

    fn topology() -> ComponentTable {
        ComponentTable::new(vec![ComponentProperties::nonlinearity()])
    }

    fn request(num_sequences: i32) -> ComputationRequest {
        ComputationRequest {
            inputs: vec![IoSpecification::frames("input", num_sequences, 0, 2, false)],
            outputs: vec![IoSpecification::frames("output", num_sequences, 0, 2, false)],
            ..Default::default()
        }
    }

    /// output = relu(input), sized from the request
    fn raw(request: &ComputationRequest) -> Computation {
        let rows = request.inputs[0].num_rows();
        let mut c = Computation::new();
        let x = c.add_matrix(rows, 3).unwrap();
        let y = c.add_matrix(rows, 3).unwrap();
        let (sx, sy) = (c.add_whole_submatrix(x).unwrap(), c.add_whole_submatrix(y).unwrap());
        c.push(Command::Allocate { matrix: y, kind: AllocKind::Zeroed });
        c.push(Command::Propagate {
            component: ComponentId(0),
            input: sx,
            output: sy,
        });
        c.bind_input("input", x, None);
        c.bind_output("output", y, None);
        c
    }

    fn raw_compiler(request: &ComputationRequest) -> OptimizeResult<Computation> {
        Ok(raw(request))
    }

    #[test]
    fn test_equal_requests_hit() {
        let topology = topology();
        let mut compiler = MockComputationCompiler::new();
        compiler.expect_compile().times(1).returning(|r| Ok(raw(r)));
        let mut preparer = MockDeviceIndexPreparer::new();
        preparer.expect_prepare().times(1).returning(|_| Ok(()));

        let mut cache = CachingOptimizingCompiler::new(&topology, compiler).with_device_indexes(preparer);
        let first = cache.compile(&request(2)).unwrap().clone();
        let second = cache.compile(&request(2)).unwrap().clone();
        assert_eq!(first, second);
        assert_eq!(cache.stats(), CacheStats { hits: 1, misses: 1 });
        assert!(cache.is_cached(&request(2)));
    }

    #[test]
    fn test_different_request_replaces_entry() {
        let topology = topology();
        let mut compiler = MockComputationCompiler::new();
        compiler.expect_compile().times(3).returning(|r| Ok(raw(r)));

        let mut cache = CachingOptimizingCompiler::new(&topology, compiler);
        let small = cache.compile(&request(1)).unwrap().matrices[0].num_rows;
        let large = cache.compile(&request(3)).unwrap().matrices[0].num_rows;
        assert_eq!((small, large), (2, 6));
        assert_eq!(cache.cached_request(), Some(&request(3)));

        cache.compile(&request(1)).unwrap();
        assert_eq!(cache.stats(), CacheStats { hits: 0, misses: 3 });
    }

    #[test]
    fn test_result_is_optimized() {
        let topology = topology();
        let mut cache = CachingOptimizingCompiler::new(&topology, raw_compiler);
        let computation = cache.compile(&request(2)).unwrap();
        assert_eq!(computation.allocation_kind(MatrixId(1)), Some(AllocKind::Undefined));

        let options = OptimizeOptions::disabled();
        let mut cache = CachingOptimizingCompiler::with_options(&topology, raw_compiler, options);
        assert_eq!(cache.compile(&request(2)).unwrap(), &raw(&request(2)));
        assert_eq!(cache.options(), &options);
    }

    #[test]
    fn test_failed_compile_keeps_previous_entry() {
        let topology = topology();
        let mut compiler = MockComputationCompiler::new();
        compiler.expect_compile().returning(|r| {
            if r.inputs[0].num_rows() > 4 {
                Err(OptimizeError::Compilation("too many frames".to_string()))
            } else {
                Ok(raw(r))
            }
        });

        let mut cache = CachingOptimizingCompiler::new(&topology, compiler);
        cache.compile(&request(1)).unwrap();
        let err = cache.compile(&request(5)).unwrap_err();
        assert_eq!(err, OptimizeError::Compilation("too many frames".to_string()));
        assert_eq!(cache.cached_request(), Some(&request(1)));

        cache.clear();
        assert_eq!(cache.cached_request(), None);
    }

    #[test]
    fn test_preparer_failure_propagates() {
        let topology = topology();
        let mut preparer = MockDeviceIndexPreparer::new();
        preparer.expect_prepare().times(1).returning(|_| Err(OptimizeError::NotImplemented("device indexes")));

        let mut cache = CachingOptimizingCompiler::new(&topology, raw_compiler).with_device_indexes(preparer);
        assert_eq!(cache.compile(&request(1)).unwrap_err(), OptimizeError::NotImplemented("device indexes"));
        assert!(!cache.is_cached(&request(1)));
    }
}
