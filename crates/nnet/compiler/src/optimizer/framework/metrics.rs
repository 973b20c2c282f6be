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

//! Optimization metrics and warnings

use crate::optimizer::analysis::MemoryStats;
use serde::Serialize;
use std::time::Duration;

/// Metrics for a single pass invocation
#[derive(Debug, Clone, Serialize)]
pub struct PassMetrics {
    /// Name of the pass
    pub pass_name: &'static str,
    /// Wall-clock time spent in the pass
    pub duration: Duration,
    /// Whether the pass reported a change
    pub changed: bool,
    pub commands_before: usize,
    pub commands_after: usize,
}

/// Warning produced during optimization
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OptimizationWarning {
    /// Pass that emitted the warning
    pub pass_name: &'static str,
    /// Warning message
    pub message: String,
}

/// Metrics recorded by one run of the pipeline
#[derive(Default, Debug, Clone, Serialize)]
pub struct OptimizationMetrics {
    /// Per-pass metrics, in execution order
    pub pass_metrics: Vec<PassMetrics>,
    /// Total number of passes executed
    pub total_passes: usize,
    pub warnings: Vec<OptimizationWarning>,
    pub memory_before: Option<MemoryStats>,
    pub memory_after: Option<MemoryStats>,
}

impl OptimizationMetrics {
    /// Record metrics for a completed pass
    pub fn record_pass(&mut self, metrics: PassMetrics) {
        self.pass_metrics.push(metrics);
        self.total_passes += 1;
    }

    /// Names of the passes that ran, in order
    pub fn passes_run(&self) -> Vec<&'static str> {
        self.pass_metrics.iter().map(|m| m.pass_name).collect()
    }

    /// Whether any pass changed the computation
    pub fn changed(&self) -> bool {
        self.pass_metrics.iter().any(|m| m.changed)
    }

    pub fn total_duration(&self) -> Duration {
        self.pass_metrics.iter().map(|m| m.duration).sum()
    }
}
