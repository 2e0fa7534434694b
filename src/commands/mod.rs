// src/commands/mod.rs

//! Command implementations behind the CLI surface

mod bootstrap;
mod build_order;
mod build_parallel;
mod list_overrides;
mod server;

use crate::cli::{Cli, Commands};
use anyhow::Result;

/// Dispatch the parsed command line
pub fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Bootstrap {
            options,
            requirements,
            requirements_files,
            plan_only,
        } => bootstrap::run(&options, &requirements, &requirements_files, plan_only),
        Commands::BuildParallel { options, plan_file } => {
            build_parallel::run(&options, &plan_file)
        }
        Commands::BuildOrder { plan_file } => build_order::run(&plan_file),
        Commands::Server { mirror_dir, bind } => server::run(&mirror_dir, bind),
        Commands::ListOverrides => list_overrides::run(),
    }
}
