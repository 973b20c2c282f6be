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

//! Stats command: memory profile and validity of a plan

use crate::plan::{PlanFile, ToolError};
use clap::Args;
use nnet_compiler::{ComputationChecker, MemoryStats};
use std::path::PathBuf;

/// Arguments for the stats command
#[derive(Args, Debug)]
pub struct StatsArgs {
    /// Plan file to inspect
    #[arg(value_name = "PLAN_FILE")]
    pub plan: PathBuf,
}

/// Render the report printed by the stats command
pub fn report(plan: &PlanFile) -> Result<String, ToolError> {
    ComputationChecker::new(&plan.computation, &plan.components).check().map_err(ToolError::InvalidPlan)?;
    let stats = MemoryStats::of(&plan.computation);
    Ok(format!(
        "commands:            {}\nmatrices:            {}\nfresh allocations:   {}\nreused allocations:  {}\nzeroed allocations:  {}\npeak live matrices:  {}\npeak live elements:  {}\n",
        stats.num_commands,
        stats.num_matrices,
        stats.fresh_allocations,
        stats.reuse_allocations,
        stats.zeroed_allocations,
        stats.peak_live_matrices,
        stats.peak_live_elements,
    ))
}

/// Execute the stats command
pub fn run_stats(args: StatsArgs) -> Result<(), ToolError> {
    let plan = PlanFile::load(&args.plan)?;
    print!("{}", report(&plan)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::sample_plan;
    use nnet_common::Command;

    #[test]
    fn test_report_counts_sample_plan() {
        let report = report(&sample_plan()).unwrap();
        assert!(report.contains("commands:            5"));
        assert!(report.contains("zeroed allocations:  2"));
    }

    #[test]
    fn test_invalid_plan_is_rejected() {
        let mut plan = sample_plan();
        plan.computation.commands.retain(|c| !matches!(c, Command::Allocate { .. }));
        assert!(matches!(report(&plan), Err(ToolError::InvalidPlan(_))));
    }

    #[test]
    fn test_run_stats_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plan.json");
        sample_plan().save(&path).unwrap();
        run_stats(StatsArgs { plan: path }).unwrap();
    }
}
