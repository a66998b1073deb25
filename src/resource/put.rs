use std::path::{Path, PathBuf};

use figment::{
    Figment,
    providers::{Format, Json, Serialized},
};
use tracing::{debug, info, warn};

use crate::address::{registry_reference, repository_path};
use crate::artifactory::MetadataStore;
use crate::buildinfo::BuildInfo;
use crate::clock::Clock;
use crate::error::{ResourceError, Result};
use crate::metadata::item_metadata;
use crate::normalize::normalize;
use crate::properties::{EnvFilter, Properties};
use crate::registry::ImageRegistry;
use crate::resource::{PutParams, PutRequest, Response};
use crate::vcs::VcsInspector;
use crate::version::Version;

/// Everything `out` talks to besides the request itself.
pub struct PutContext<'a> {
    pub store: &'a dyn MetadataStore,
    pub registry: &'a dyn ImageRegistry,
    pub vcs: &'a dyn VcsInspector,
    /// Environment lookup, normally `std::env::var`.
    pub env: &'a dyn Fn(&str) -> Option<String>,
    pub clock: Clock,
}

/// Applies the JSON file named by `params.params` on top of `params`.
fn resolve_params(params: PutParams, dir: &Path) -> Result<PutParams> {
    if params.params.is_empty() {
        return Ok(params);
    }

    let file = dir.join(&params.params);
    if !file.is_file() {
        return Err(ResourceError::validation(format!(
            "params file {} does not exist",
            file.display()
        )));
    }

    debug!(file = %file.display(), "Reading params file");
    Ok(Figment::from(Serialized::defaults(&params))
        .merge(Json::file(&file))
        .extract()?)
}

fn read_properties(dir: &Path, name: &str, what: &str) -> Properties {
    match Properties::from_file(&dir.join(name)) {
        Ok(properties) => properties,
        Err(err) => {
            warn!("Failed to read {what} file: {err}");
            Properties::default()
        }
    }
}

fn build_info(params: &PutParams, dir: &Path, context: &PutContext<'_>) -> Result<BuildInfo> {
    let mut build = BuildInfo::from_env(context.env, context.clock.now());

    if !params.build_env.is_empty() {
        let include = EnvFilter::parse(&params.env_include)?;
        let exclude = EnvFilter::parse(&params.env_exclude)?;
        build.env = read_properties(dir, &params.build_env, "build environment")
            .filter(&include, &exclude);
        debug!(count = build.env.len(), "Build environment");
    }

    if !params.repo_path.is_empty() {
        build.vcs = Some(context.vcs.inspect(&dir.join(&params.repo_path), &params.repo));
    }

    Ok(build)
}

fn find_archive(dir: &Path, pattern: &str) -> Result<PathBuf> {
    let pattern = dir.join(pattern);
    let pattern = pattern.to_string_lossy();

    let mut matches = glob::glob(&pattern)
        .map_err(|err| ResourceError::validation(format!("invalid pattern {pattern:?}: {err}")))?;

    match matches.next() {
        Some(path) => Ok(path.map_err(std::io::Error::from)?),
        None => Err(ResourceError::validation(format!(
            "no file matches pattern {pattern:?}"
        ))),
    }
}

/// Publishes the image archive found in `dir`.
pub async fn put(request: PutRequest, dir: &Path, context: &PutContext<'_>) -> Result<Response> {
    let source = request.source;
    source.validate_registry()?;

    let params = resolve_params(request.params, dir)?;
    params.validate()?;

    info!(dir = %dir.display(), "Publishing image");
    debug!(?params, "Put parameters");

    let build = build_info(&params, dir, context)?;
    let mut properties = build.properties();
    if !params.properties.is_empty() {
        properties.extend(read_properties(dir, &params.properties, "properties"));
    }
    debug!(?properties, "Artifact properties");

    let archive = find_archive(dir, &params.pattern)?;

    let mut version = Version {
        repo: params.target.clone(),
        image: params.image.clone(),
        tag: params.tags[0].clone(),
        digest: None,
        modified: None,
    };
    let (path, pushed) = {
        let address = version.address()?;
        let reference = registry_reference(&source, &address);

        info!(archive = %archive.display(), %reference, tags = ?params.tags, "Pushing image");
        let pushed = context
            .registry
            .push(&archive, &reference, &params.tags)
            .await?;

        (repository_path(&address), pushed)
    };

    let item = context.store.search_item(&path).await?;
    let stored = normalize(&item)?;
    version.digest = Some(stored.digest.unwrap_or_else(|| pushed.to_string()));
    version.modified = stored.modified;

    context.store.set_properties(&path, &properties).await?;

    Ok(Response {
        metadata: item_metadata(&path, &item),
        version,
    })
}
