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

use clap::{Parser, Subcommand};
use nnet_tools::{OptimizeArgs, StatsArgs, run_optimize, run_stats};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nnet-opt")]
#[command(about = "Optimize compiled neural-network computations")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Optimize the computation in a plan file
    Optimize(OptimizeArgs),
    /// Print memory statistics for a plan file
    Stats(StatsArgs),
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Optimize(args) => run_optimize(args)?,
        Commands::Stats(args) => run_stats(args)?,
    }
    Ok(())
}
