//! Repository metadata queries.
//!
//! A query is held as a structured AQL criteria object and serialized once,
//! when it is submitted. Raw queries supplied by the pipeline are parsed into
//! the same structure so extra clauses can be added without string surgery.

use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::error::{ResourceError, Result};
use crate::version::{Version, timestamp};

pub const MANIFEST_FILE: &str = "manifest.json";
pub const DEFAULT_IMAGE_PATTERN: &str = "*";
pub const DEFAULT_TAG_PATTERN: &str = "latest";

/// How far back the first check of a pipeline looks.
const LOOKBACK_MONTHS: u32 = 24;

const INCLUDE_FIELDS: [&str; 8] = [
    "repo", "path", "name", "type", "size", "created", "modified", "property",
];

/// The `aql` block of the source configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuerySpec {
    /// Raw AQL criteria object; wins over every structured field.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub raw: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub repo: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub image: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub tag: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub owner: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
}

/// The image half of a structured query in either addressing layout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ImagePattern {
    Image(String),
    OwnerName { owner: String, name: String },
}

fn or_default(value: &str, default: &str) -> String {
    match value {
        "" => default.to_string(),
        value => value.to_string(),
    }
}

fn is_wildcard(value: &str) -> bool {
    value.is_empty() || value == DEFAULT_IMAGE_PATTERN
}

impl ImagePattern {
    fn path_prefix(&self) -> String {
        match self {
            ImagePattern::Image(image) => image.clone(),
            ImagePattern::OwnerName { owner, name } => format!("{owner}/{name}"),
        }
    }

    fn is_wildcard(&self) -> bool {
        match self {
            ImagePattern::Image(image) => is_wildcard(image),
            ImagePattern::OwnerName { owner, name } => is_wildcard(owner) || is_wildcard(name),
        }
    }
}

impl QuerySpec {
    pub fn image_pattern(&self) -> ImagePattern {
        if self.image.is_empty() && !(self.owner.is_empty() && self.name.is_empty()) {
            return ImagePattern::OwnerName {
                owner: or_default(&self.owner, DEFAULT_IMAGE_PATTERN),
                name: or_default(&self.name, DEFAULT_IMAGE_PATTERN),
            };
        }

        ImagePattern::Image(or_default(&self.image, DEFAULT_IMAGE_PATTERN))
    }

    pub fn tag_pattern(&self) -> String {
        or_default(&self.tag, DEFAULT_TAG_PATTERN)
    }

    /// Rejects queries that cannot narrow the search: no raw query, no
    /// repository and a wildcard image (or a wildcard owner or name).
    pub fn validate(&self) -> Result<()> {
        if self.raw.is_empty() && self.repo.is_empty() && self.image_pattern().is_wildcard() {
            return Err(ResourceError::validation(
                "aql requires raw, repo, or a non-wildcard image (owner and name)",
            ));
        }

        if !self.raw.is_empty() {
            AqlQuery::parse(&self.raw)?;
        }

        Ok(())
    }
}

/// A structured AQL criteria object.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AqlQuery {
    criteria: Map<String, Value>,
}

impl AqlQuery {
    pub fn parse(raw: &str) -> Result<Self> {
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(criteria)) => Ok(Self { criteria }),
            Ok(_) => Err(ResourceError::validation(
                "aql.raw must be a JSON criteria object",
            )),
            Err(err) => Err(ResourceError::validation(format!(
                "aql.raw is not valid JSON: {err}"
            ))),
        }
    }

    /// Criteria locating a single item by its full repository path,
    /// `<repo>/<path...>/<name>`.
    pub fn for_path(path: &str) -> Result<Self> {
        let (repo, rest) = path
            .split_once('/')
            .ok_or_else(|| ResourceError::validation(format!("not an item path: {path}")))?;
        let (dir, name) = rest.rsplit_once('/').unwrap_or((".", rest));

        let mut criteria = Map::new();
        criteria.insert("repo".into(), json!(repo));
        criteria.insert("path".into(), json!(dir));
        criteria.insert("name".into(), json!(name));
        Ok(Self { criteria })
    }

    pub fn is_empty(&self) -> bool {
        self.criteria.is_empty()
    }

    pub fn criteria(&self) -> &Map<String, Value> {
        &self.criteria
    }

    /// Renders the full AQL statement submitted to the search API.
    pub fn to_aql(&self) -> String {
        let include = INCLUDE_FIELDS
            .iter()
            .map(|field| format!("\"{field}\""))
            .collect::<Vec<_>>()
            .join(",");

        format!(
            "items.find({}).include({include})",
            Value::Object(self.criteria.clone())
        )
    }
}

/// Derives the criteria for a query specification. A raw query passes
/// through untouched. A structured query on manifests matching
/// `<image>/<tag>` (or `<owner>/<name>/<tag>`) inside the repository.
pub fn build_query(spec: &QuerySpec) -> Result<AqlQuery> {
    if !spec.raw.is_empty() {
        return AqlQuery::parse(&spec.raw);
    }

    let image = spec.image_pattern();
    if spec.repo.is_empty() && image.is_wildcard() {
        return Ok(AqlQuery::default());
    }

    let mut criteria = Map::new();
    if !spec.repo.is_empty() {
        criteria.insert("repo".into(), json!(spec.repo));
    }
    criteria.insert(
        "path".into(),
        json!({ "$match": format!("{}/{}", image.path_prefix(), spec.tag_pattern()) }),
    );
    criteria.insert("name".into(), json!(MANIFEST_FILE));

    Ok(AqlQuery { criteria })
}

/// Lower bound for the `modified` clause: the known version's modification
/// time, or a fixed lookback window before `now` when there is none.
pub fn modified_bound(known: &Version, now: DateTime<Utc>) -> DateTime<Utc> {
    match known.modified {
        Some(modified) => modified,
        None => now
            .checked_sub_months(Months::new(LOOKBACK_MONTHS))
            .unwrap_or(DateTime::<Utc>::MIN_UTC),
    }
}

/// Restricts a non-empty query to items modified after the bound derived
/// from `known`. An existing `modified` clause is replaced.
pub fn add_modified_bound(mut query: AqlQuery, known: &Version, now: DateTime<Utc>) -> AqlQuery {
    if query.is_empty() {
        return query;
    }

    let bound = modified_bound(known, now);
    query.criteria.insert(
        "modified".into(),
        json!({ "$gt": timestamp::format(&bound) }),
    );
    query
}
