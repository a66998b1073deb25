use serde::{Deserialize, Serialize};

use crate::config::PlatformConfig;
use crate::digest::Digest;
use crate::error::{ResourceError, Result};

pub const DOCKER_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";
pub const DOCKER_MANIFEST_LIST: &str = "application/vnd.docker.distribution.manifest.list.v2+json";
pub const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
pub const OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";

pub const DOCKER_CONFIG: &str = "application/vnd.docker.container.image.v1+json";
pub const DOCKER_LAYER: &str = "application/vnd.docker.image.rootfs.diff.tar.gzip";

/// Media types sent as `Accept` when fetching a manifest by tag.
pub const ACCEPTED: [&str; 4] = [DOCKER_MANIFEST, DOCKER_MANIFEST_LIST, OCI_MANIFEST, OCI_INDEX];

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Platform {
    pub architecture: String,
    pub os: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    pub media_type: String,
    pub digest: Digest,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
}

impl Descriptor {
    pub fn new(media_type: &str, digest: Digest, size: usize) -> Self {
        Self {
            media_type: media_type.to_string(),
            digest,
            size: Some(size as u64),
            platform: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "mediaType")]
enum Manifest {
    #[serde(rename = "application/vnd.docker.distribution.manifest.v2+json")]
    DockerImage {
        config: Descriptor,
        layers: Vec<Descriptor>,
    },
    #[serde(rename = "application/vnd.docker.distribution.manifest.list.v2+json")]
    DockerList { manifests: Vec<Descriptor> },
    #[serde(rename = "application/vnd.oci.image.manifest.v1+json")]
    OciImage {
        config: Descriptor,
        layers: Vec<Descriptor>,
    },
    #[serde(rename = "application/vnd.oci.image.index.v1+json")]
    OciList { manifests: Vec<Descriptor> },
}

/// A single-platform image manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageManifest {
    pub schema_version: u32,
    pub media_type: String,
    pub config: Descriptor,
    pub layers: Vec<Descriptor>,
}

impl ImageManifest {
    /// A Docker v2 schema 2 manifest, the format pushed by this resource.
    pub fn docker(config: Descriptor, layers: Vec<Descriptor>) -> Self {
        Self {
            schema_version: 2,
            media_type: DOCKER_MANIFEST.to_string(),
            config,
            layers,
        }
    }
}

#[derive(Debug)]
pub enum Parsed {
    Image(ImageManifest),
    Index(Vec<Descriptor>),
}

/// Parses a manifest body. OCI documents may leave out `mediaType`, in which
/// case the `Content-Type` the registry answered with is used instead.
pub fn parse_manifest(input: &[u8], content_type: Option<&str>) -> Result<Parsed> {
    let mut value: serde_json::Value = serde_json::from_slice(input)?;

    if let (Some(object), Some(content_type)) = (value.as_object_mut(), content_type) {
        object
            .entry("mediaType")
            .or_insert_with(|| content_type.into());
    }

    let manifest: Manifest = serde_json::from_value(value)
        .map_err(|err| ResourceError::image(format!("unsupported manifest: {err}")))?;

    Ok(match manifest {
        Manifest::DockerImage { config, layers } => Parsed::Image(ImageManifest {
            schema_version: 2,
            media_type: DOCKER_MANIFEST.into(),
            config,
            layers,
        }),
        Manifest::OciImage { config, layers } => Parsed::Image(ImageManifest {
            schema_version: 2,
            media_type: OCI_MANIFEST.into(),
            config,
            layers,
        }),
        Manifest::DockerList { manifests } | Manifest::OciList { manifests } => {
            Parsed::Index(manifests)
        }
    })
}

/// Picks the manifest built for `platform` out of a manifest list.
pub fn select_platform<'a>(
    manifests: &'a [Descriptor],
    platform: &PlatformConfig,
) -> Result<&'a Descriptor> {
    manifests
        .iter()
        .find(|descriptor| {
            descriptor.platform.as_ref().is_some_and(|p| {
                p.os == platform.os && p.architecture == platform.architecture
            })
        })
        .ok_or_else(|| {
            ResourceError::image(format!(
                "no manifest for platform {}/{}",
                platform.os, platform.architecture
            ))
        })
}

/// The parts of an image configuration exported next to a root filesystem.
#[derive(Debug, Default, Deserialize)]
pub struct ImageConfig {
    #[serde(default)]
    pub config: Option<ContainerConfig>,
}

#[derive(Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct ContainerConfig {
    #[serde(rename(deserialize = "Env"), default)]
    pub env: Vec<String>,
    #[serde(rename(deserialize = "User"), default)]
    pub user: String,
}
