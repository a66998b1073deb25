use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use serde::{Deserialize, Deserializer, Serialize, de::DeserializeOwned};

use crate::error::Result;

/// Environment prefix for process-wide settings.
pub const SETTINGS_PREFIX: &str = "ARTIFACTORY_RESOURCE_";
/// Environment prefix for `source` defaults, e.g. `ARTIFACTORY_SOURCE_ENDPOINT`
/// or `ARTIFACTORY_SOURCE_AQL__REPO`.
pub const SOURCE_PREFIX: &str = "ARTIFACTORY_SOURCE_";

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct PlatformConfig {
    pub os: String,
    pub architecture: String,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            os: "linux".to_string(),
            architecture: "amd64".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    pub log_level: String,
    /// Whole-request timeout for HTTP calls, in seconds.
    pub timeout: u64,
    pub connect_timeout: u64,
    pub user_agent: String,
    /// Platform picked out of manifest lists when pulling.
    pub platform: PlatformConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            timeout: 300,
            connect_timeout: 10,
            user_agent: concat!("artifactory-docker-resource/", env!("CARGO_PKG_VERSION"))
                .to_string(),
            platform: PlatformConfig::default(),
        }
    }
}

impl Settings {
    pub fn figment() -> Figment {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Env::prefixed(SETTINGS_PREFIX).split("__"))
    }

    pub fn load(figment: Figment) -> Result<Settings> {
        Ok(figment.extract()?)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }
}

/// Layers a JSON request from stdin over `source` defaults taken from the
/// environment. Values in the request win.
pub fn request_figment(input: &str) -> Figment {
    Figment::new()
        .merge(
            Env::prefixed(SOURCE_PREFIX)
                .split("__")
                .map(|key| format!("source.{key}").into()),
        )
        .merge(Json::string(input))
}

pub fn load_request<T: DeserializeOwned>(input: &str) -> Result<T> {
    Ok(request_figment(input).extract()?)
}

/// Treats an explicit `null` like a missing value.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::Source;

    #[derive(Debug, Deserialize)]
    struct Request {
        source: Source,
        #[serde(default, deserialize_with = "null_as_default")]
        version: crate::version::Version,
    }

    #[test]
    fn defaults() {
        figment::Jail::expect_with(|_jail| {
            let settings = Settings::load(Settings::figment()).unwrap();
            assert_eq!(settings, Settings::default());
            assert_eq!(settings.timeout(), Duration::from_secs(300));
            assert!(settings.user_agent.starts_with("artifactory-docker-resource/"));
            Ok(())
        });
    }

    #[test]
    fn settings_from_environment() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("ARTIFACTORY_RESOURCE_LOG_LEVEL", "debug");
            jail.set_env("ARTIFACTORY_RESOURCE_TIMEOUT", "30");
            jail.set_env("ARTIFACTORY_RESOURCE_PLATFORM__ARCHITECTURE", "arm64");

            let settings = Settings::load(Settings::figment()).unwrap();
            assert_eq!(settings.log_level, "debug");
            assert_eq!(settings.timeout, 30);
            assert_eq!(settings.platform.os, "linux");
            assert_eq!(settings.platform.architecture, "arm64");
            Ok(())
        });
    }

    #[test]
    fn request_overrides_environment() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("ARTIFACTORY_SOURCE_ENDPOINT", "https://env.example.com");
            jail.set_env("ARTIFACTORY_SOURCE_HOST", "env.example.com");
            jail.set_env("ARTIFACTORY_SOURCE_AQL__REPO", "env-repo");

            let request: Request = load_request(
                r#"{"source": {"host": "request.example.com", "aql": {"image": "acme/app"}}, "version": null}"#,
            )
            .unwrap();

            assert_eq!(request.source.endpoint, "https://env.example.com");
            assert_eq!(request.source.host, "request.example.com");
            assert_eq!(request.source.aql.repo, "env-repo");
            assert_eq!(request.source.aql.image, "acme/app");
            assert!(request.version.is_empty());
            Ok(())
        });
    }

    #[test]
    fn request_without_environment() {
        figment::Jail::expect_with(|_jail| {
            let request: Request = load_request(
                r#"{
                    "source": {"endpoint": "https://x.test", "proxy": true},
                    "version": {"repo": "r", "image": "i", "tag": "t", "modified": "2024-01-01T00:00:00Z"}
                }"#,
            )
            .unwrap();

            assert!(request.source.proxy);
            assert_eq!(request.version.tag, "t");
            assert!(request.version.modified.is_some());
            Ok(())
        });
    }

    #[test]
    fn malformed_request() {
        figment::Jail::expect_with(|_jail| {
            assert!(load_request::<Request>("{not json").is_err());
            Ok(())
        });
    }
}
