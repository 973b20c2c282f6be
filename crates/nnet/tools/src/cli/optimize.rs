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

//! Optimize command: run the optimizer over a plan file

use crate::plan::{PlanFile, ToolError, read_file};
use clap::{ArgAction, Args};
use nnet_compiler::{MemoryStats, OptimizeOptions, optimize};
use std::io::Write;
use std::path::PathBuf;
use tracing::{debug, info};

/// Arguments for the optimize command
#[derive(Args, Debug, Default)]
pub struct OptimizeArgs {
    /// Plan file holding the topology, request and computation
    #[arg(value_name = "PLAN_FILE")]
    pub plan: PathBuf,

    /// JSON file with optimization options; command-line switches override it
    #[arg(long, value_name = "OPTIONS_FILE")]
    pub config: Option<PathBuf>,

    /// Write the optimized plan here instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Print a readable listing of the optimized computation to stderr
    #[arg(long)]
    pub print: bool,

    /// Run the optimizer at all
    #[arg(long, value_name = "BOOL", action = ArgAction::Set)]
    pub optimize: Option<bool>,

    #[arg(long, value_name = "BOOL", action = ArgAction::Set)]
    pub consolidate_model_update: Option<bool>,

    #[arg(long, value_name = "BOOL", action = ArgAction::Set)]
    pub propagate_in_place: Option<bool>,

    #[arg(long, value_name = "BOOL", action = ArgAction::Set)]
    pub backprop_in_place: Option<bool>,

    #[arg(long, value_name = "BOOL", action = ArgAction::Set)]
    pub remove_assignments: Option<bool>,

    #[arg(long, value_name = "BOOL", action = ArgAction::Set)]
    pub allow_left_merge: Option<bool>,

    #[arg(long, value_name = "BOOL", action = ArgAction::Set)]
    pub allow_right_merge: Option<bool>,

    /// Drop zero-fills that are always overwritten
    #[arg(long, value_name = "BOOL", action = ArgAction::Set)]
    pub initialize_undefined: Option<bool>,

    #[arg(long, value_name = "BOOL", action = ArgAction::Set)]
    pub move_sizing_commands: Option<bool>,

    #[arg(long, value_name = "BOOL", action = ArgAction::Set)]
    pub allocate_from_other: Option<bool>,
}

impl OptimizeArgs {
    fn overrides(&self) -> [(&'static str, Option<bool>); OptimizeOptions::NUM_FLAGS] {
        [
            ("optimize", self.optimize),
            ("consolidate-model-update", self.consolidate_model_update),
            ("propagate-in-place", self.propagate_in_place),
            ("backprop-in-place", self.backprop_in_place),
            ("remove-assignments", self.remove_assignments),
            ("allow-left-merge", self.allow_left_merge),
            ("allow-right-merge", self.allow_right_merge),
            ("initialize-undefined", self.initialize_undefined),
            ("move-sizing-commands", self.move_sizing_commands),
            ("allocate-from-other", self.allocate_from_other),
        ]
    }

    /// Options from the config file (or defaults) with switches applied on top
    pub fn options(&self) -> Result<OptimizeOptions, ToolError> {
        let mut options = match &self.config {
            Some(path) => OptimizeOptions::from_json(&read_file(path)?).map_err(|source| ToolError::Json { path: path.clone(), source })?,
            None => OptimizeOptions::default(),
        };
        for (name, value) in self.overrides() {
            if let Some(value) = value {
                options.set(name, value).map_err(ToolError::InvalidOption)?;
            }
        }
        Ok(options)
    }
}

/// Execute the optimize command
pub fn run_optimize(args: OptimizeArgs) -> Result<(), ToolError> {
    let options = args.options()?;
    debug!(?options, "optimization options");

    let mut plan = PlanFile::load(&args.plan)?;
    let before = MemoryStats::of(&plan.computation);
    let metrics = optimize(&options, &plan.components, &plan.request, &mut plan.computation)?;
    let after = MemoryStats::of(&plan.computation);

    for pass in &metrics.pass_metrics {
        info!(
            pass = pass.pass_name,
            changed = pass.changed,
            commands_before = pass.commands_before,
            commands_after = pass.commands_after,
            "pass finished in {:?}",
            pass.duration
        );
    }
    info!(
        plan = %args.plan.display(),
        commands_before = before.num_commands,
        commands_after = after.num_commands,
        matrices_before = before.num_matrices,
        matrices_after = after.num_matrices,
        peak_live_before = before.peak_live_matrices,
        peak_live_after = after.peak_live_matrices,
        "plan optimized"
    );

    if args.print {
        eprint!("{}", plan.computation);
    }

    match &args.output {
        Some(path) => plan.save(path)?,
        None => {
            let mut stdout = std::io::stdout().lock();
            writeln!(stdout, "{}", plan.to_json()?).map_err(|source| ToolError::Io { path: PathBuf::from("<stdout>"), source })?;
        }
    }
    Ok(())
}
