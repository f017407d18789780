//! Prepare command - run preparation of one resource in the foreground.

use std::path::PathBuf;
use std::time::Instant;

use mapproxy::resource::{GeneratorType, ResourceId};

use crate::error::CliError;
use crate::runner::CliRunner;

pub struct PrepareArgs {
    pub config: Option<PathBuf>,
    pub reference_frame: String,
    pub generator_type: String,
    pub group: String,
    pub id: String,
}

pub fn run(args: PrepareArgs) -> Result<(), CliError> {
    let runner = CliRunner::new(args.config.as_deref())?;
    runner.log_startup("prepare");

    let generator_type: GeneratorType = args.generator_type.parse().map_err(|_| {
        CliError::Usage(format!(
            "Unknown generator type '{}'. Use one of: tms, surface, geodata.",
            args.generator_type
        ))
    })?;
    let id = ResourceId::new(&args.reference_frame, generator_type, &args.group, &args.id);

    let service = runner.create_service()?;
    let registry = service.content().registry();
    registry.refresh()?;
    if registry.resource(&id).is_none() {
        return Err(CliError::Usage(format!("Resource {} is not defined.", id)));
    }

    let started = Instant::now();
    let generator = registry.prepare_now(&id)?;
    println!(
        "Prepared {} in {:.1}s (store {})",
        id,
        started.elapsed().as_secs_f64(),
        generator.core().store().display()
    );
    Ok(())
}
