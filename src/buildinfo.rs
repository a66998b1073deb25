//! Build information attached to pushed images as artifact properties.

use chrono::{DateTime, Utc};

use crate::properties::Properties;
use crate::vcs::Vcs;

pub const ENV_PREFIX: &str = "buildInfo.env.";

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BuildInfo {
    pub name: String,
    pub number: String,
    pub started: String,
    pub url: String,
    pub env: Properties,
    pub vcs: Option<Vcs>,
}

impl BuildInfo {
    /// Reads the orchestrator's build metadata through `lookup`, normally
    /// `std::env::var`.
    pub fn from_env<F>(lookup: F, started: DateTime<Utc>) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).unwrap_or_default();

        let name = [
            var("BUILD_TEAM_NAME"),
            var("BUILD_PIPELINE_NAME"),
            var("BUILD_JOB_NAME"),
        ]
        .join("-");
        let number = var("BUILD_ID");

        BuildInfo {
            name,
            url: format!("{}/builds/{}", var("ATC_EXTERNAL_URL"), number),
            number,
            started: started.format("%Y-%m-%dT%H:%M:%S%.3f%z").to_string(),
            env: Properties::default(),
            vcs: None,
        }
    }

    pub fn properties(&self) -> Properties {
        let mut properties = Properties::default();
        properties.push("build.name", self.name.as_str());
        properties.push("build.number", self.number.as_str());
        properties.push("build.started", self.started.as_str());
        properties.push("build.url", self.url.as_str());

        if let Some(vcs) = &self.vcs {
            if !vcs.revision.is_empty() {
                properties.push("vcs.revision", vcs.revision.as_str());
            }
            if !vcs.url.is_empty() {
                properties.push("vcs.url", vcs.url.as_str());
            }
        }

        properties.extend(self.env.clone().prefixed(ENV_PREFIX));
        properties
    }
}
