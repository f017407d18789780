//! Mapproxy - on-the-fly map tile proxy
//!
//! Serves map resources (raster tile sets, terrain surfaces and vector
//! geodata) addressed as `/<reference-frame>/<type>/<group>/<id>/<file>`.
//! Files are derived from source datasets when requested.
//!
//! # High-Level API
//!
//! The [`service`] module wires the collaborators together:
//!
//! ```ignore
//! use mapproxy::config::ConfigFile;
//! use mapproxy::service::MapproxyService;
//!
//! let config = ConfigFile::load()?;
//! let service = MapproxyService::from_config(&config)?;
//! service.run(cancel).await?;
//! ```

pub mod arsenal;
pub mod config;
pub mod content;
pub mod coverage;
pub mod dataset;
pub mod error;
pub mod fetch;
pub mod generator;
pub mod logging;
pub mod mask_tree;
pub mod metatile;
pub mod path;
pub mod reference_frame;
pub mod resource;
pub mod server;
pub mod service;
pub mod sink;
pub mod tile;

pub use error::{MapproxyError, Result};

/// Version of the library and CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
