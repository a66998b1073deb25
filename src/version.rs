//! The version record tracked by the orchestrator between runs.
//!
//! Every field travels as a string. An empty string is the "unset" sentinel,
//! so `digest` and `modified` deserialize from `""` to `None`, and the zero
//! timestamp older resource generations emitted (`0001-01-01T00:00:00Z`) is
//! read back as `None` too.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Datelike, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{ResourceError, Result};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "WireVersion")]
pub struct Version {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub repo: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub image: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub tag: String,
    /// Opaque manifest digest as the store reports it, e.g. `sha256:<hex>`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "timestamp::serialize"
    )]
    pub modified: Option<DateTime<Utc>>,
}

/// Accepts both the current `image` field and the older `owner` + `name` pair.
#[derive(Deserialize)]
struct WireVersion {
    #[serde(default)]
    repo: String,
    #[serde(default)]
    image: String,
    #[serde(default)]
    owner: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    tag: String,
    #[serde(default, deserialize_with = "optional_digest")]
    digest: Option<String>,
    #[serde(default, deserialize_with = "timestamp::deserialize")]
    modified: Option<DateTime<Utc>>,
}

impl From<WireVersion> for Version {
    fn from(wire: WireVersion) -> Self {
        let image = match (wire.image.is_empty(), wire.owner.is_empty(), wire.name.is_empty()) {
            (false, _, _) => wire.image,
            (true, false, false) => format!("{}/{}", wire.owner, wire.name),
            (true, true, false) => wire.name,
            _ => String::new(),
        };

        Version {
            repo: wire.repo,
            image,
            tag: wire.tag,
            digest: wire.digest,
            modified: wire.modified,
        }
    }
}

fn optional_digest<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    Ok(value.filter(|value| !value.is_empty()))
}

pub(crate) mod timestamp {
    use super::*;

    pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(value) => serializer.serialize_str(&format(value)),
            None => serializer.serialize_str(""),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value: Option<String> = Option::deserialize(deserializer)?;
        match value.as_deref() {
            None | Some("") => Ok(None),
            Some(value) => parse(value)
                .map(|parsed| parsed.filter(|t| t.year() > 1))
                .map_err(serde::de::Error::custom),
        }
    }

    pub fn format(value: &DateTime<Utc>) -> String {
        value.to_rfc3339_opts(SecondsFormat::AutoSi, true)
    }

    pub fn parse(value: &str) -> Result<Option<DateTime<Utc>>, ResourceError> {
        DateTime::parse_from_rfc3339(value)
            .map(|parsed| Some(parsed.with_timezone(&Utc)))
            .map_err(|source| ResourceError::Parse {
                value: value.to_string(),
                source,
            })
    }
}

impl Version {
    /// A version missing any identity field stands for "no version".
    pub fn is_empty(&self) -> bool {
        self.repo.is_empty() || self.image.is_empty() || self.tag.is_empty()
    }

    /// Identity comparison: digest and modified time are metadata.
    pub fn same_artifact(&self, other: &Version) -> bool {
        self.repo == other.repo && self.image == other.image && self.tag == other.tag
    }

    /// Borrows the identity fields for addressing. Callers check emptiness
    /// first; an empty version here is an error, never a partial address.
    pub fn address(&self) -> Result<Address<'_>> {
        if self.is_empty() {
            return Err(ResourceError::Addressing);
        }

        Ok(Address {
            repo: &self.repo,
            image: &self.image,
            tag: &self.tag,
        })
    }

    pub(crate) fn cmp_modified(&self, other: &Version) -> Ordering {
        self.modified.cmp(&other.modified)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.repo, self.image, self.tag)?;
        if let Some(digest) = &self.digest {
            write!(f, "@{digest}")?;
        }
        Ok(())
    }
}

/// The identity coordinates of a non-empty [`Version`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Address<'a> {
    pub repo: &'a str,
    pub image: &'a str,
    pub tag: &'a str,
}

impl Address<'_> {
    /// Splits the image into owner and name for the owner/name layout.
    /// Images without a `/` have no owner.
    pub fn owner_name(&self) -> (Option<&str>, &str) {
        match self.image.split_once('/') {
            Some((owner, name)) => (Some(owner), name),
            None => (None, self.image),
        }
    }
}
