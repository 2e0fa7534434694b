// tests/common/mod.rs

//! Shared fixtures for the integration suites

use forgeron::{
    archive, ContextConfig, OverrideRegistry, Pin, PinnedResolver, Requirement, WorkContext,
};
use std::fs;
use std::path::{Path, PathBuf};

/// A buildable fake source package: a tiny tree archived as
/// `{name}-{version}.tar.gz`
pub fn make_source_archive(dir: &Path, name: &str, version: &str) -> PathBuf {
    let tree = dir.join(format!("{name}-{version}-tree"));
    fs::create_dir_all(tree.join("src")).unwrap();
    fs::write(
        tree.join("pyproject.toml"),
        format!("[project]\nname = \"{name}\"\nversion = \"{version}\"\n"),
    )
    .unwrap();
    fs::write(tree.join("src/main.py"), "print('hello')\n").unwrap();

    let archive_path = dir.join(format!("{name}-{version}.tar.gz"));
    archive::create_deterministic_archive(&tree, &archive_path, &format!("{name}-{version}"))
        .unwrap();
    archive_path
}

/// Pin entry pointing at a locally created source archive
pub fn pin_for(
    dir: &Path,
    name: &str,
    version: &str,
    installs: &[&str],
    builds: &[&str],
) -> (String, Pin) {
    let archive_path = make_source_archive(dir, name, version);
    (
        name.to_string(),
        Pin {
            version: forgeron::PackageVersion::parse(version).unwrap(),
            source_url: archive_path.display().to_string(),
            pre_built: false,
            install_requires: installs
                .iter()
                .map(|s| Requirement::parse(s).unwrap())
                .collect(),
            build_requires: builds
                .iter()
                .map(|s| Requirement::parse(s).unwrap())
                .collect(),
        },
    )
}

/// Settings file whose default build command fakes a wheel without
/// needing a real build backend
pub const FAKE_BUILD_SETTINGS: &str =
    "default_build_command = 'touch \"$WHEEL_OUTPUT_DIR/result.whl\"'\n";

/// Work context over temp directories with pinned resolution
pub fn pinned_context(root: &Path, settings: &str, pins: Vec<(String, Pin)>) -> WorkContext {
    fs::write(root.join("settings.toml"), settings).unwrap();

    let mut resolver = PinnedResolver::new();
    for (name, pin) in pins {
        resolver.pin(name, pin);
    }
    let mut registry = OverrideRegistry::empty();
    registry.set_base_resolver(Box::new(resolver));

    let config = ContextConfig {
        work_dir: root.join("work-dir"),
        patches_dir: root.join("patches"),
        mirror_dir: root.join("wheels-repo"),
        settings_file: root.join("settings.toml"),
        max_workers: 2,
        ..ContextConfig::default()
    };
    WorkContext::new(config, registry).unwrap()
}
