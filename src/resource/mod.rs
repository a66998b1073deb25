//! Requests and responses exchanged with the pipeline orchestrator, and the
//! `check`, `in` and `out` operations built on them.

use serde::{Deserialize, Serialize};

use crate::config::null_as_default;
use crate::error::{ResourceError, Result};
use crate::metadata::Metadata;
use crate::properties::DEFAULT_ENV_EXCLUDE;
use crate::registry::Format;
use crate::source::Source;
use crate::version::Version;

mod check;
mod get;
mod put;

pub use check::check;
pub use get::get;
pub use put::{PutContext, put};

#[derive(Clone, Debug, Deserialize)]
pub struct CheckRequest {
    pub source: Source,
    #[serde(default, deserialize_with = "null_as_default")]
    pub version: Version,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GetParams {
    pub skip_download: bool,
    pub format: Format,
}

#[derive(Clone, Debug, Deserialize)]
pub struct GetRequest {
    pub source: Source,
    #[serde(default, deserialize_with = "null_as_default")]
    pub version: Version,
    #[serde(default, deserialize_with = "null_as_default")]
    pub params: GetParams,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PutParams {
    /// Glob, relative to the working directory, matching the image archive.
    pub pattern: String,
    pub image: String,
    /// Repository the image is pushed to.
    pub target: String,
    pub tags: Vec<String>,
    /// `key=value` file of extra artifact properties.
    pub properties: String,
    /// JSON file whose fields override these params.
    pub params: String,
    /// `key=value` file with the build environment.
    pub build_env: String,
    pub env_include: String,
    pub env_exclude: String,
    /// Path of the checked-out source repository.
    pub repo_path: String,
    /// Explicit repository URL recorded instead of the first remote.
    pub repo: String,
}

impl Default for PutParams {
    fn default() -> Self {
        Self {
            pattern: String::new(),
            image: String::new(),
            target: String::new(),
            tags: Vec::new(),
            properties: String::new(),
            params: String::new(),
            build_env: String::new(),
            env_include: String::new(),
            env_exclude: DEFAULT_ENV_EXCLUDE.to_string(),
            repo_path: String::new(),
            repo: String::new(),
        }
    }
}

impl PutParams {
    pub fn validate(&self) -> Result<()> {
        if self.image.is_empty() {
            return Err(ResourceError::validation("params.image is required"));
        }
        if self.tags.is_empty() || self.tags.iter().any(|tag| tag.is_empty()) {
            return Err(ResourceError::validation(
                "params.tags requires at least one tag and no empty tags",
            ));
        }
        if self.pattern.is_empty() {
            return Err(ResourceError::validation("params.pattern is required"));
        }
        if self.target.is_empty() {
            return Err(ResourceError::validation("params.target is required"));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct PutRequest {
    pub source: Source,
    #[serde(default, deserialize_with = "null_as_default")]
    pub params: PutParams,
}

/// Response of `in` and `out`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Response {
    pub version: Version,
    pub metadata: Metadata,
}

#[cfg(test)]
pub(crate) mod fakes {
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::address::RegistryReference;
    use crate::artifactory::MetadataStore;
    use crate::digest::Digest;
    use crate::error::{ResourceError, Result};
    use crate::normalize::{Property, RawItem};
    use crate::properties::Properties;
    use crate::query::AqlQuery;
    use crate::registry::{Format, ImageRegistry};
    use crate::vcs::{Vcs, VcsInspector};

    pub const DIGEST: &str =
        "sha256:fea8895f450959fa676bcc1df0611ea93823a735a01205fd8622846041d0c7cf";

    pub fn item(tag: &str, modified: &str, digest: Option<&str>) -> RawItem {
        let mut properties = vec![
            Property {
                key: "docker.repoName".into(),
                value: "acme/app".into(),
            },
            Property {
                key: "docker.manifest".into(),
                value: tag.into(),
            },
        ];
        if let Some(digest) = digest {
            properties.push(Property {
                key: "docker.manifest.digest".into(),
                value: digest.into(),
            });
        }

        RawItem {
            repo: "docker-local".into(),
            path: format!("acme/app/{tag}"),
            name: "manifest.json".into(),
            item_type: "file".into(),
            size: 1234,
            created: "2024-01-01T00:00:00.000Z".into(),
            modified: modified.into(),
            properties,
        }
    }

    #[derive(Default)]
    pub struct FakeStore {
        pub items: Vec<RawItem>,
        pub queries: Mutex<Vec<String>>,
        pub lookups: Mutex<Vec<String>>,
        pub properties: Mutex<Vec<(String, Properties)>>,
    }

    #[async_trait]
    impl MetadataStore for FakeStore {
        async fn search_items(&self, query: &AqlQuery) -> Result<Vec<RawItem>> {
            self.queries.lock().unwrap().push(query.to_aql());
            Ok(self.items.clone())
        }

        async fn search_item(&self, path: &str) -> Result<RawItem> {
            self.lookups.lock().unwrap().push(path.to_string());
            self.items
                .iter()
                .find(|item| item.full_path() == path)
                .cloned()
                .ok_or_else(|| ResourceError::NotFound(path.to_string()))
        }

        async fn set_properties(&self, path: &str, properties: &Properties) -> Result<()> {
            self.properties
                .lock()
                .unwrap()
                .push((path.to_string(), properties.clone()));
            Ok(())
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Transfer {
        Pull {
            reference: String,
            tag: String,
            format: Format,
        },
        Push {
            archive: PathBuf,
            reference: String,
            tags: Vec<String>,
        },
    }

    #[derive(Default)]
    pub struct FakeRegistry {
        pub transfers: Mutex<Vec<Transfer>>,
    }

    #[async_trait]
    impl ImageRegistry for FakeRegistry {
        async fn pull(
            &self,
            reference: &RegistryReference,
            tag: &str,
            _dest: &Path,
            format: Format,
        ) -> Result<Digest> {
            self.transfers.lock().unwrap().push(Transfer::Pull {
                reference: reference.to_string(),
                tag: tag.to_string(),
                format,
            });
            Ok(DIGEST.parse().unwrap())
        }

        async fn push(
            &self,
            archive: &Path,
            reference: &RegistryReference,
            tags: &[String],
        ) -> Result<Digest> {
            self.transfers.lock().unwrap().push(Transfer::Push {
                archive: archive.to_path_buf(),
                reference: reference.to_string(),
                tags: tags.to_vec(),
            });
            Ok(DIGEST.parse().unwrap())
        }
    }

    pub struct FakeVcs(pub Vcs);

    impl VcsInspector for FakeVcs {
        fn inspect(&self, _path: &Path, url: &str) -> Vcs {
            let mut vcs = self.0.clone();
            if !url.is_empty() {
                vcs.url = url.to_string();
            }
            vcs
        }
    }
}
