//! Serve command - run the proxy until Ctrl-C.

use std::net::SocketAddr;
use std::path::PathBuf;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::CliError;
use crate::runner::CliRunner;

/// Arguments for the serve command.
pub struct ServeArgs {
    pub config: Option<PathBuf>,
    pub listen: Option<SocketAddr>,
}

pub fn run(args: ServeArgs) -> Result<(), CliError> {
    let mut runner = CliRunner::new(args.config.as_deref())?;
    runner.log_startup("serve");
    if let Some(listen) = args.listen {
        runner.config_mut().http.listen = listen;
    }

    let service = runner.create_service()?;
    println!("Serving on http://{}/ (Ctrl-C to stop)", service.listen());

    let cancel = CancellationToken::new();
    let signal = cancel.clone();
    ctrlc::set_handler(move || {
        info!("Shutdown requested");
        signal.cancel();
    })
    .map_err(|e| CliError::Usage(format!("Failed to set signal handler: {}", e)))?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| CliError::Serve(e.into()))?;

    runtime
        .block_on(service.run(cancel))
        .map_err(CliError::Serve)?;

    info!("Mapproxy stopped");
    Ok(())
}
