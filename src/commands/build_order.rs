// src/commands/build_order.rs

//! Print the round ordering recorded in a plan file

use anyhow::Result;
use forgeron::BuildPlan;
use std::path::Path;

pub fn run(plan_file: &Path) -> Result<()> {
    let plan = BuildPlan::load_from(plan_file)?;
    println!("{}", plan.render());
    Ok(())
}
