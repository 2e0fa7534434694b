// src/commands/list_overrides.rs

//! List package names with a registered override bundle

use anyhow::Result;
use forgeron::OverrideRegistry;

pub fn run() -> Result<()> {
    let registry = OverrideRegistry::discover(Vec::new())?;
    let registered = registry.registered();
    if registered.is_empty() {
        println!("no overrides registered");
        return Ok(());
    }
    for name in registered {
        println!("{name}");
    }
    Ok(())
}
