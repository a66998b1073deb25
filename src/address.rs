//! Deterministic artifact addressing.
//!
//! `get` and `put` both go through these functions so an artifact is only
//! ever referred to one way, whether as a metadata-store path or a registry
//! reference. They take an [`Address`], which can only be obtained from a
//! non-empty version.

use std::fmt;

use crate::query::MANIFEST_FILE;
use crate::source::Source;
use crate::version::Address;

/// A registry repository reference, `<host>/<name>`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegistryReference {
    pub host: String,
    pub name: String,
}

impl fmt::Display for RegistryReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.host, self.name)
    }
}

/// Location of the image manifest inside the metadata store:
/// `<repo>/<image>/<tag>/manifest.json`. With an `owner/name` image this is
/// the `<repo>/<owner>/<name>/<tag>/manifest.json` layout.
pub fn repository_path(address: &Address<'_>) -> String {
    let (owner, name) = address.owner_name();
    let mut segments = vec![address.repo];
    segments.extend(owner);
    segments.extend([name, address.tag, MANIFEST_FILE]);
    segments.join("/")
}

/// Registry reference for the image; proxy mode drops the repository
/// segment because the registry host already implies it.
pub fn registry_reference(source: &Source, address: &Address<'_>) -> RegistryReference {
    let name = if source.proxy {
        address.image.to_string()
    } else {
        format!("{}/{}", address.repo, address.image)
    };

    RegistryReference {
        host: source.host.clone(),
        name,
    }
}

pub fn image_tag(address: &Address<'_>) -> String {
    format!("{}:{}", address.image, address.tag)
}
