//! Classify command - show the routing of a request path.

use std::path::PathBuf;

use mapproxy::path::{FileFlags, FileInfo, Request, Route};
use mapproxy::reference_frame::ReferenceFrameRegistry;

use crate::error::CliError;
use crate::runner::CliRunner;

pub struct ClassifyArgs {
    pub config: Option<PathBuf>,
    pub url: String,
}

pub fn run(args: ClassifyArgs) -> Result<(), CliError> {
    let runner = CliRunner::new(args.config.as_deref())?;
    let config = runner.config();
    let frames = ReferenceFrameRegistry::load(&config.resources.reference_frames)?;
    let flags = FileFlags {
        browser_enabled: config.generators.browser,
    };

    let fi = FileInfo::new(&Request::new(request_target(&args.url)), flags, &frames)?;
    println!("{}", describe(&fi));
    Ok(())
}

/// Strips scheme and authority from absolute URLs.
fn request_target(url: &str) -> &str {
    match url.split_once("://") {
        Some((_, rest)) => rest.find('/').map_or("/", |i| &rest[i..]),
        None => url,
    }
}

fn describe(fi: &FileInfo) -> String {
    match &fi.route {
        Route::ResourceFile(id) => format!("resource {} file <{}>", id, fi.filename),
        Route::DirRedirect => format!("redirect to {}/", fi.path),
        other => format!("{:?}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_target() {
        assert_eq!(request_target("http://localhost:3070/rf/tms/"), "/rf/tms/");
        assert_eq!(request_target("https://example.com"), "/");
        assert_eq!(request_target("/rf/x?y=1"), "/rf/x?y=1");
    }
}
