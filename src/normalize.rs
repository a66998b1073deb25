use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::version::{Version, timestamp};

pub const PROPERTY_IMAGE: &str = "docker.repoName";
pub const PROPERTY_TAG: &str = "docker.manifest";
pub const PROPERTY_DIGEST: &str = "docker.manifest.digest";

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Property {
    pub key: String,
    #[serde(default)]
    pub value: String,
}

/// One item of an AQL search result.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawItem {
    pub repo: String,
    pub path: String,
    pub name: String,
    #[serde(rename = "type")]
    pub item_type: String,
    pub size: i64,
    pub created: String,
    pub modified: String,
    pub properties: Vec<Property>,
}

impl RawItem {
    /// Location of the item inside the store, `<repo>/<path>/<name>`.
    pub fn full_path(&self) -> String {
        match self.path.as_str() {
            "" | "." => format!("{}/{}", self.repo, self.name),
            path => format!("{}/{}/{}", self.repo, path, self.name),
        }
    }
}

/// Maps a search result onto a [`Version`]. Only the image name, tag and
/// digest properties are read; when a key repeats, its last value wins.
pub fn normalize(item: &RawItem) -> Result<Version> {
    let modified = timestamp::parse(&item.modified)?;

    let mut version = Version {
        repo: item.repo.clone(),
        modified,
        ..Default::default()
    };

    for property in &item.properties {
        match property.key.as_str() {
            PROPERTY_IMAGE => version.image = property.value.clone(),
            PROPERTY_TAG => version.tag = property.value.clone(),
            PROPERTY_DIGEST => {
                version.digest = Some(property.value.clone()).filter(|value| !value.is_empty())
            }
            _ => {}
        }
    }

    Ok(version)
}

/// Normalizes every item in order. The first unparseable item fails the
/// whole batch.
pub fn normalize_all(items: &[RawItem]) -> Result<Vec<Version>> {
    items.iter().map(normalize).collect()
}
