//! Moving images in and out of a Docker v2 registry.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::address::RegistryReference;
use crate::digest::Digest;
use crate::error::Result;

pub mod archive;
mod client;
pub mod manifest;

pub use client::RegistryClient;

/// How a pulled image is laid out in the destination directory.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// Layers flattened into `rootfs/` plus a `metadata.json`.
    #[default]
    Rootfs,
    /// A `docker load`-able `image.tar`.
    Oci,
}

#[async_trait]
pub trait ImageRegistry: Send + Sync {
    /// Fetches `reference:tag` into `dest` and returns the manifest digest.
    async fn pull(
        &self,
        reference: &RegistryReference,
        tag: &str,
        dest: &Path,
        format: Format,
    ) -> Result<Digest>;

    /// Pushes the image in the `docker save` archive under every tag and
    /// returns the digest of the pushed manifest.
    async fn push(
        &self,
        archive: &Path,
        reference: &RegistryReference,
        tags: &[String],
    ) -> Result<Digest>;
}
