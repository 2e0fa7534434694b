// tests/build_pipeline.rs

//! End-to-end resolve, plan and build flows over fake source packages.
//! The build command is a stub that drops an empty wheel, so the whole
//! pipeline runs without a real build backend.

mod common;

use common::{pin_for, pinned_context, FAKE_BUILD_SETTINGS};
use forgeron::{BuildPlan, GraphBuilder, ParallelExecutor, Requirement};

#[test]
fn builds_dependency_chain_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path();
    let ctx = pinned_context(
        src,
        FAKE_BUILD_SETTINGS,
        vec![
            pin_for(src, "app", "1.0", &["lib>=2.0"], &[]),
            pin_for(src, "lib", "2.5", &[], &[]),
        ],
    );

    let mut builder = GraphBuilder::new(&ctx);
    builder
        .resolve_toplevel(&Requirement::parse("app").unwrap())
        .unwrap();
    let graph = builder.finish();
    graph.write_to(&ctx.graph_file()).unwrap();

    let plan = BuildPlan::from_graph(&graph).unwrap();
    plan.write_to(&ctx.plan_file()).unwrap();
    assert_eq!(plan.round_count(), 2);
    assert_eq!(plan.rounds[0][0].name, "lib");
    assert_eq!(plan.rounds[1][0].name, "app");

    let report = ParallelExecutor::new(&ctx, &plan).execute().unwrap();
    assert!(report.all_succeeded(), "unexpected failures: {report}");
    assert_eq!(report.succeeded.len(), 2);

    // both wheels and sdists were published under deterministic names
    for entry in plan.entries() {
        let listing = ctx.repository.listing(&entry.name);
        assert!(
            listing
                .iter()
                .any(|f| f.ends_with(".whl") && f.contains(&entry.build_tag)),
            "no wheel for {} in {listing:?}",
            entry.name
        );
        assert!(
            listing.iter().any(|f| f.ends_with(".tar.gz")),
            "no sdist for {} in {listing:?}",
            entry.name
        );
        assert!(
            listing.iter().any(|f| f.ends_with(".metadata.json")),
            "no metadata for {} in {listing:?}",
            entry.name
        );
    }
}

#[test]
fn failed_package_skips_transitive_dependents_only() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path();
    // bad fails to build; mid depends on bad; top depends on mid;
    // solo has no relation to any of them
    let settings = format!(
        "{FAKE_BUILD_SETTINGS}\n[packages.bad]\nbuild_command = 'false'\n"
    );
    let ctx = pinned_context(
        src,
        &settings,
        vec![
            pin_for(src, "top", "1.0", &["mid"], &[]),
            pin_for(src, "mid", "1.0", &["bad"], &[]),
            pin_for(src, "bad", "1.0", &[], &[]),
            pin_for(src, "solo", "1.0", &[], &[]),
        ],
    );

    let mut builder = GraphBuilder::new(&ctx);
    builder
        .resolve_toplevel(&Requirement::parse("top").unwrap())
        .unwrap();
    builder
        .resolve_toplevel(&Requirement::parse("solo").unwrap())
        .unwrap();
    let plan = BuildPlan::from_graph(&builder.finish()).unwrap();

    let report = ParallelExecutor::new(&ctx, &plan).execute().unwrap();
    assert!(!report.all_succeeded());
    assert_eq!(report.succeeded, vec!["solo==1.0"]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "bad==1.0");

    let skipped: Vec<&str> = report.skipped.iter().map(|(k, _)| k.as_str()).collect();
    assert_eq!(skipped, vec!["mid==1.0", "top==1.0"]);
    // the skip reason points at the blocking dependency
    assert_eq!(report.skipped[0].1, "bad==1.0");
}

#[test]
fn second_run_reuses_published_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path();
    let ctx = pinned_context(
        src,
        FAKE_BUILD_SETTINGS,
        vec![pin_for(src, "frob", "1.0", &[], &[])],
    );

    let mut builder = GraphBuilder::new(&ctx);
    builder
        .resolve_toplevel(&Requirement::parse("frob").unwrap())
        .unwrap();
    let plan = BuildPlan::from_graph(&builder.finish()).unwrap();

    let first = ParallelExecutor::new(&ctx, &plan).execute().unwrap();
    assert!(first.all_succeeded());
    assert!(ctx.progress_file().exists());

    // second run over the same directories, but with a build command
    // that would fail: the mirrored artifact matches the build tag, so
    // nothing is rebuilt and the failing command never runs
    let ctx2 = pinned_context(
        src,
        "default_build_command = 'false'\n",
        vec![pin_for(src, "frob", "1.0", &[], &[])],
    );
    let second = ParallelExecutor::new(&ctx2, &plan).execute().unwrap();
    assert!(second.all_succeeded(), "{second}");
}

#[test]
fn per_package_environment_reaches_the_build_command() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path();
    let settings = "\
default_build_command = 'printf %s \"$GREETING\" > \"$WHEEL_OUTPUT_DIR/result.whl\"'

[packages.envy.env]
GREETING = \"hello from settings\"
";
    let ctx = pinned_context(src, settings, vec![pin_for(src, "envy", "1.0", &[], &[])]);

    let mut builder = GraphBuilder::new(&ctx);
    builder
        .resolve_toplevel(&Requirement::parse("envy").unwrap())
        .unwrap();
    let plan = BuildPlan::from_graph(&builder.finish()).unwrap();
    let report = ParallelExecutor::new(&ctx, &plan).execute().unwrap();
    assert!(report.all_succeeded(), "{report}");

    let wheel = ctx
        .repository
        .listing("envy")
        .into_iter()
        .find(|f| f.ends_with(".whl"))
        .unwrap();
    let bytes = std::fs::read(ctx.repository.artifact_path("envy", &wheel)).unwrap();
    assert_eq!(bytes, b"hello from settings");
}

#[test]
fn pre_built_marker_downloads_instead_of_building() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path();
    // no pins: the default index resolver answers from the local
    // repository listing; the build command would fail if it ever ran
    std::fs::write(
        src.join("settings.toml"),
        "default_build_command = 'false'\n\n[packages.binpkg]\npre_built = true\n",
    )
    .unwrap();
    let config = forgeron::ContextConfig {
        work_dir: src.join("work-dir"),
        patches_dir: src.join("patches"),
        mirror_dir: src.join("wheels-repo"),
        settings_file: src.join("settings.toml"),
        ..forgeron::ContextConfig::default()
    };
    let ctx = forgeron::WorkContext::new(config, forgeron::OverrideRegistry::empty()).unwrap();
    ctx.repository
        .publish_bytes("binpkg", "binpkg-2.0-py3abc123456.whl", b"prebuilt bytes")
        .unwrap();

    let mut builder = GraphBuilder::new(&ctx);
    builder
        .resolve_toplevel(&Requirement::parse("binpkg").unwrap())
        .unwrap();
    let graph = builder.finish();
    let node = graph.node_by_name("binpkg").unwrap();
    assert!(node.pre_built);
    assert_eq!(node.key.version.to_string(), "2.0");

    let plan = BuildPlan::from_graph(&graph).unwrap();
    let report = ParallelExecutor::new(&ctx, &plan).execute().unwrap();
    assert!(report.all_succeeded(), "{report}");
}

#[test]
fn local_version_label_changes_artifact_names() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path();
    let mut ctx = pinned_context(
        src,
        FAKE_BUILD_SETTINGS,
        vec![pin_for(src, "frob", "1.2.3", &[], &[])],
    );
    ctx.local_version_label = Some("rebuild1".to_string());

    let mut builder = GraphBuilder::new(&ctx);
    builder
        .resolve_toplevel(&Requirement::parse("frob").unwrap())
        .unwrap();
    let plan = BuildPlan::from_graph(&builder.finish()).unwrap();
    let report = ParallelExecutor::new(&ctx, &plan).execute().unwrap();
    assert!(report.all_succeeded(), "{report}");

    let listing = ctx.repository.listing("frob");
    assert!(
        listing.iter().any(|f| f.contains("1.2.3+rebuild1")),
        "expected labelled artifacts in {listing:?}"
    );
}
