// tests/plan_replay.rs

//! A plan file is replayable: the parallel entry point reproduces the
//! recorded rounds without invoking any resolver provider.

mod common;

use common::{pin_for, pinned_context, FAKE_BUILD_SETTINGS};
use forgeron::{
    BuildPlan, ContextConfig, GraphBuilder, OverrideRegistry, ParallelExecutor, Requirement,
    ResolvedCandidate, ResolverProvider, WorkContext,
};

/// A resolver that fails the test the moment anyone consults it
struct ForbiddenResolver;

impl ResolverProvider for ForbiddenResolver {
    fn resolve(
        &self,
        _ctx: &WorkContext,
        req: &Requirement,
    ) -> forgeron::Result<ResolvedCandidate> {
        panic!("resolver invoked for {req} during plan replay");
    }
}

#[test]
fn replay_reproduces_rounds_without_resolving() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path();

    // first: a normal bootstrap writes the plan file
    let ctx = pinned_context(
        src,
        FAKE_BUILD_SETTINGS,
        vec![
            pin_for(src, "app", "1.0", &["lib"], &[]),
            pin_for(src, "lib", "2.0", &[], &[]),
            pin_for(src, "solo", "3.0", &[], &[]),
        ],
    );
    let mut builder = GraphBuilder::new(&ctx);
    builder
        .resolve_toplevel(&Requirement::parse("app").unwrap())
        .unwrap();
    builder
        .resolve_toplevel(&Requirement::parse("solo").unwrap())
        .unwrap();
    let plan = BuildPlan::from_graph(&builder.finish()).unwrap();
    plan.write_to(&ctx.plan_file()).unwrap();

    // second: a fresh context whose resolver refuses to run, driven
    // purely by the plan file
    std::fs::write(src.join("settings.toml"), FAKE_BUILD_SETTINGS).unwrap();
    let mut registry = OverrideRegistry::empty();
    registry.set_base_resolver(Box::new(ForbiddenResolver));
    let replay_ctx = WorkContext::new(
        ContextConfig {
            work_dir: src.join("replay-work"),
            patches_dir: src.join("patches"),
            mirror_dir: src.join("replay-repo"),
            settings_file: src.join("settings.toml"),
            max_workers: 2,
            ..ContextConfig::default()
        },
        registry,
    )
    .unwrap();

    let loaded = BuildPlan::load_from(&ctx.plan_file()).unwrap();
    assert_eq!(loaded.package_count, plan.package_count);
    assert_eq!(loaded.round_count(), plan.round_count());
    let recorded: Vec<String> = plan.entries().map(|e| e.key()).collect();
    let replayed: Vec<String> = loaded.entries().map(|e| e.key()).collect();
    assert_eq!(recorded, replayed);

    let report = ParallelExecutor::new(&replay_ctx, &loaded).execute().unwrap();
    assert!(report.all_succeeded(), "{report}");
    assert_eq!(report.succeeded.len(), 3);
}
