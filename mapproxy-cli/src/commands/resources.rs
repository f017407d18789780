//! Resources command - list what the backend defines.

use std::path::PathBuf;

use mapproxy::resource::{JsonFileBackend, ResourceBackend};

use crate::error::CliError;
use crate::runner::CliRunner;

pub struct ResourcesArgs {
    pub config: Option<PathBuf>,
}

pub fn run(args: ResourcesArgs) -> Result<(), CliError> {
    let runner = CliRunner::new(args.config.as_deref())?;
    let backend = JsonFileBackend::new(&runner.config().resources.definitions);
    let resources = backend.list_resources()?;

    if resources.is_empty() {
        println!("No resources defined in {}", backend.path().display());
        return Ok(());
    }

    for (id, resource) in &resources {
        println!(
            "{:<48} {:<24} lod {:<6} rev {}",
            id.to_string(),
            resource.generator.to_string(),
            resource.lod_range.to_string(),
            resource.revision
        );
    }
    println!();
    println!("{} resource(s)", resources.len());
    Ok(())
}
