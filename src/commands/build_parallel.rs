// src/commands/build_parallel.rs

//! Replay an existing plan file without re-resolving anything

use crate::cli::BuildOptions;
use anyhow::{bail, Result};
use forgeron::{BuildPlan, MirrorServer, OverrideRegistry, ParallelExecutor, WorkContext};
use std::path::Path;
use tracing::info;

pub fn run(options: &BuildOptions, plan_file: &Path) -> Result<()> {
    let plan = BuildPlan::load_from(plan_file)?;
    info!(
        "loaded plan with {} packages in {} rounds",
        plan.package_count,
        plan.round_count()
    );
    println!("{}", plan.render());

    let registry = OverrideRegistry::discover(Vec::new())?;
    let ctx = WorkContext::new(options.to_context_config(), registry)?;

    let mirror = MirrorServer::start(
        ctx.repository.root().to_path_buf(),
        "127.0.0.1:0".parse().expect("loopback address"),
    )?;
    ctx.set_mirror_url(mirror.url.clone());

    let report = ParallelExecutor::new(&ctx, &plan).execute()?;
    print!("{report}");
    mirror.stop();

    if !report.all_succeeded() {
        bail!("build finished with failures");
    }
    Ok(())
}
