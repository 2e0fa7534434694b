// tests/overrides_and_patches.rs

//! Override dispatch and patch application observed through real builds:
//! an override fires only for its own package, and patches land in the
//! published sdist.

mod common;

use common::{pin_for, FAKE_BUILD_SETTINGS};
use forgeron::build::environment::BuildEnvironment;
use forgeron::overrides::WheelBuilder;
use forgeron::{
    archive, BuildPlan, ContextConfig, GraphBuilder, OverrideBundle, OverrideRegistry,
    PackageVersion, ParallelExecutor, Pin, PinnedResolver, Requirement, WorkContext,
};
use std::fs;
use std::path::Path;
use std::sync::Arc;

/// Wheel builder that writes a recognizable marker instead of running a
/// build command
struct MarkerWheelBuilder;

impl WheelBuilder for MarkerWheelBuilder {
    fn build_wheel(
        &self,
        _ctx: &WorkContext,
        env: &BuildEnvironment,
        _req: &Requirement,
        _version: &PackageVersion,
    ) -> forgeron::Result<std::path::PathBuf> {
        let out = env.dist_dir().join("marker.whl");
        fs::write(&out, b"override wheel")?;
        Ok(out)
    }
}

struct SpecialBundle;

impl OverrideBundle for SpecialBundle {
    fn package(&self) -> &str {
        "special"
    }
    fn wheel_builder(&self) -> Option<&dyn WheelBuilder> {
        Some(&MarkerWheelBuilder)
    }
}

fn context_with_bundle(root: &Path, pins: Vec<(String, Pin)>) -> WorkContext {
    fs::write(root.join("settings.toml"), FAKE_BUILD_SETTINGS).unwrap();
    let mut resolver = PinnedResolver::new();
    for (name, pin) in pins {
        resolver.pin(name, pin);
    }
    let mut registry = OverrideRegistry::discover(vec![Arc::new(SpecialBundle)]).unwrap();
    registry.set_base_resolver(Box::new(resolver));
    WorkContext::new(
        ContextConfig {
            work_dir: root.join("work-dir"),
            patches_dir: root.join("patches"),
            mirror_dir: root.join("wheels-repo"),
            settings_file: root.join("settings.toml"),
            max_workers: 2,
            ..ContextConfig::default()
        },
        registry,
    )
    .unwrap()
}

#[test]
fn override_builder_fires_only_for_its_package() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path();
    let ctx = context_with_bundle(
        src,
        vec![
            pin_for(src, "special", "1.0", &[], &[]),
            pin_for(src, "plain", "1.0", &[], &[]),
        ],
    );

    let mut builder = GraphBuilder::new(&ctx);
    builder
        .resolve_toplevel(&Requirement::parse("special").unwrap())
        .unwrap();
    builder
        .resolve_toplevel(&Requirement::parse("plain").unwrap())
        .unwrap();
    let plan = BuildPlan::from_graph(&builder.finish()).unwrap();
    let report = ParallelExecutor::new(&ctx, &plan).execute().unwrap();
    assert!(report.all_succeeded(), "{report}");

    let special_wheel = ctx
        .repository
        .listing("special")
        .into_iter()
        .find(|f| f.ends_with(".whl"))
        .unwrap();
    let special_bytes = fs::read(ctx.repository.artifact_path("special", &special_wheel)).unwrap();
    assert_eq!(special_bytes, b"override wheel");

    // the override did not leak onto the other package
    let plain_wheel = ctx
        .repository
        .listing("plain")
        .into_iter()
        .find(|f| f.ends_with(".whl"))
        .unwrap();
    let plain_bytes = fs::read(ctx.repository.artifact_path("plain", &plain_wheel)).unwrap();
    assert!(plain_bytes.is_empty());
}

#[test]
fn patches_are_applied_before_the_sdist_is_cut() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path();
    let ctx = context_with_bundle(src, vec![pin_for(src, "plain", "1.0", &[], &[])]);

    let patch_dir = ctx.patches_dir.join("plain-1.0");
    fs::create_dir_all(&patch_dir).unwrap();
    fs::write(
        patch_dir.join("0001-greeting.patch"),
        "--- a/src/main.py\n+++ b/src/main.py\n@@ -1 +1 @@\n-print('hello')\n+print('patched')\n",
    )
    .unwrap();

    let mut builder = GraphBuilder::new(&ctx);
    builder
        .resolve_toplevel(&Requirement::parse("plain").unwrap())
        .unwrap();
    let plan = BuildPlan::from_graph(&builder.finish()).unwrap();
    let report = ParallelExecutor::new(&ctx, &plan).execute().unwrap();
    assert!(report.all_succeeded(), "{report}");

    // the published sdist carries the patched content
    let sdist = ctx
        .repository
        .listing("plain")
        .into_iter()
        .find(|f| f.ends_with(".tar.gz"))
        .unwrap();
    let unpack = dir.path().join("unpacked");
    archive::extract_archive(&ctx.repository.artifact_path("plain", &sdist), &unpack).unwrap();
    let content = fs::read_to_string(unpack.join("plain-1.0/src/main.py")).unwrap();
    assert_eq!(content, "print('patched')\n");
}

#[test]
fn unappliable_patch_fails_only_that_package() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path();
    let ctx = context_with_bundle(
        src,
        vec![
            pin_for(src, "plain", "1.0", &[], &[]),
            pin_for(src, "other", "1.0", &[], &[]),
        ],
    );

    let patch_dir = ctx.patches_dir.join("plain-1.0");
    fs::create_dir_all(&patch_dir).unwrap();
    fs::write(
        patch_dir.join("0001-bad.patch"),
        "--- a/src/main.py\n+++ b/src/main.py\n@@ -1 +1 @@\n-does not match\n+anything\n",
    )
    .unwrap();

    let mut builder = GraphBuilder::new(&ctx);
    builder
        .resolve_toplevel(&Requirement::parse("plain").unwrap())
        .unwrap();
    builder
        .resolve_toplevel(&Requirement::parse("other").unwrap())
        .unwrap();
    let plan = BuildPlan::from_graph(&builder.finish()).unwrap();
    let report = ParallelExecutor::new(&ctx, &plan).execute().unwrap();

    assert_eq!(report.succeeded, vec!["other==1.0"]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "plain==1.0");
    assert!(report.failed[0].1.contains("0001-bad.patch"));
}
