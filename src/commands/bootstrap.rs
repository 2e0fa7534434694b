// src/commands/bootstrap.rs

//! Resolve requirements into a graph and plan, then build everything

use crate::cli::BuildOptions;
use anyhow::{bail, Context, Result};
use forgeron::{
    requirements, BuildPlan, GraphBuilder, MirrorServer, OverrideRegistry, ParallelExecutor,
    WorkContext,
};
use std::path::PathBuf;
use tracing::info;

pub fn run(
    options: &BuildOptions,
    requirement_args: &[String],
    requirement_files: &[PathBuf],
    plan_only: bool,
) -> Result<()> {
    let toplevel = requirements::collect_toplevel(requirement_args, requirement_files)?;
    if toplevel.is_empty() {
        bail!("no requirements given; pass REQUIREMENT arguments or -r FILE");
    }

    let registry = OverrideRegistry::discover(Vec::new())?;
    let ctx = WorkContext::new(options.to_context_config(), registry)?;

    // Resolution is single-threaded and completes before any build.
    let mut builder = GraphBuilder::new(&ctx);
    for (origin, req) in &toplevel {
        info!("{}: requirement {}", origin, req);
        builder
            .resolve_toplevel(req)
            .with_context(|| format!("resolving {req} (from {origin})"))?;
    }
    let graph = builder.finish();
    graph.write_to(&ctx.graph_file())?;
    info!("wrote dependency graph to {}", ctx.graph_file().display());

    let plan = BuildPlan::from_graph(&graph)?;
    plan.write_to(&ctx.plan_file())?;
    println!("{}", plan.render());

    if plan_only {
        return Ok(());
    }

    // Serve already-built artifacts to the builds themselves.
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
