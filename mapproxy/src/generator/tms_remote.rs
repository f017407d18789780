//! TMS bound layer served directly by a remote imagery provider (`tms-bing`).
//!
//! Nothing is generated locally. The bound layer definition is built from the
//! provider's imagery metadata, fetched on every request for it.

use serde_json::Value;

use super::{inline_credits, Generator, GeneratorCore, GeneratorParams, MapConfig, Reply};
use crate::arsenal::Arsenal;
use crate::error::{MapproxyError, Result};
use crate::fetch::HttpFetcher;
use crate::path::file_kind::{TmsFile, BOUND_LAYER};
use crate::path::FileInfo;
use crate::resource::{Definition, Resource};

pub struct TmsRemote {
    core: GeneratorCore,
}

impl TmsRemote {
    pub fn new(params: GeneratorParams) -> Result<Self> {
        metadata_url(&params.resource)?;
        let core = GeneratorCore::new(params);
        tracing::info!(resource = %core.id(), "Generator not ready");
        Ok(Self { core })
    }
}

fn metadata_url(resource: &Resource) -> Result<String> {
    match &resource.definition {
        Definition::TmsRemote(def) => Ok(def.metadata_url.clone()),
        _ => Err(MapproxyError::format(format!(
            "Resource <{}> has no tms-bing definition.",
            resource.id
        ))),
    }
}

/// Fetches imagery metadata and turns it into a client URL template.
///
/// `{quadkey}` becomes `{quad}` and `{subdomain}` becomes an `{alt(..)}`
/// list of the advertised subdomains.
fn tile_url_template(fetcher: &dyn HttpFetcher, metadata_url: &str) -> Result<String> {
    let body = fetcher.get(metadata_url)?;
    let reply: Value = serde_json::from_slice(&body).map_err(|e| {
        MapproxyError::internal(format!("Unable to parse imagery metadata: {}", e))
    })?;

    let resource = &reply["resourceSets"][0]["resources"][0];
    let url = resource["imageUrl"]
        .as_str()
        .ok_or_else(|| MapproxyError::internal("Cannot find imageUrl in imagery metadata."))?;
    let subdomains = resource["imageUrlSubdomains"].as_array().ok_or_else(|| {
        MapproxyError::internal("Cannot find imageUrlSubdomains in imagery metadata.")
    })?;

    let alternatives = subdomains
        .iter()
        .filter_map(Value::as_str)
        .collect::<Vec<_>>()
        .join(",");

    Ok(url
        .replace("{quadkey}", "{quad}")
        .replace("{subdomain}", &format!("{{alt({})}}", alternatives)))
}

fn bound_layer(resource: &Resource, url: String) -> Value {
    serde_json::json!({
        "id": resource.id.full_id(),
        "type": "raster",
        "url": url,
        "lodRange": [resource.lod_range.min, resource.lod_range.max],
        "tileRange": [
            [resource.tile_range.ll.0, resource.tile_range.ll.1],
            [resource.tile_range.ur.0, resource.tile_range.ur.1]
        ],
        "credits": inline_credits(resource),
        "availability": {
            "type": "negative-type",
            "mime": "negative-type",
        },
    })
}

impl Generator for TmsRemote {
    fn core(&self) -> &GeneratorCore {
        &self.core
    }

    fn prepare_impl(&self, _: &Arsenal) -> Result<()> {
        tracing::debug!(resource = %self.core.id(), "Nothing to prepare");
        Ok(())
    }

    fn map_config(&self) -> Result<MapConfig> {
        let resource = self.core.resource();
        Ok(MapConfig::new(&resource, self.core.reference_frame())
            .with_bound_layer(resource.id.full_id(), BOUND_LAYER))
    }

    fn generate_file(&self, fi: &FileInfo) -> Result<Reply> {
        let file = TmsFile::classify(fi);
        let info = file.sink_file_info().map(|info| self.core.file_info(info));

        match (file, info) {
            (TmsFile::Config, Some(info)) => Reply::json(&self.map_config()?, info),
            (TmsFile::Definition, Some(info)) => {
                let resource = self.core.resource();
                let url = metadata_url(&resource)?;
                Ok(Reply::deferred("remote boundlayer", move |sink, arsenal| {
                    let template = tile_url_template(arsenal.fetcher.as_ref(), &url)?;
                    sink.check_aborted()?;
                    let data = serde_json::to_vec_pretty(&bound_layer(&resource, template))?;
                    sink.content(data.into(), info);
                    Ok(())
                }))
            }
            (TmsFile::Support(support), _) => Ok(Reply::support(support)),
            (TmsFile::Image { .. }, _) => Err(MapproxyError::not_found(
                "Remote tms driver is unable to generate any image.",
            )),
            (TmsFile::Mask(_), _) => Err(MapproxyError::not_found(
                "Remote tms driver is unable to generate any mask.",
            )),
            (TmsFile::Metatile(_), _) => Err(MapproxyError::not_found(
                "Remote tms driver is unable to generate any metatile.",
            )),
            _ => Err(MapproxyError::not_found("Unrecognized filename.")),
        }
    }
}
