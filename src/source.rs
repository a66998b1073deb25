use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ResourceError, Result};
use crate::query::QuerySpec;

/// Resource configuration shared by every step of a pipeline resource.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Source {
    /// Base URL of the Artifactory API, e.g. `https://example.jfrog.io/artifactory`.
    pub endpoint: String,
    pub user: String,
    pub password: String,
    pub access_token: String,
    pub api_key: String,
    /// Registry host used to pull and push through the Docker v2 API.
    pub host: String,
    pub aql: QuerySpec,
    /// The registry host is scoped to a single repository (reverse proxy
    /// "repository path" method), so references omit the repository.
    pub proxy: bool,
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn redacted(value: &str) -> &str {
            if value.is_empty() { "" } else { "<redacted>" }
        }

        f.debug_struct("Source")
            .field("endpoint", &self.endpoint)
            .field("user", &self.user)
            .field("password", &redacted(&self.password))
            .field("access_token", &redacted(&self.access_token))
            .field("api_key", &redacted(&self.api_key))
            .field("host", &self.host)
            .field("aql", &self.aql)
            .field("proxy", &self.proxy)
            .finish()
    }
}

/// How requests to Artifactory and the registry authenticate.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    Anonymous,
    Basic { user: String, secret: String },
    ApiKey(String),
    Bearer(String),
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Anonymous => f.write_str("Anonymous"),
            Credentials::Basic { user, .. } => f.debug_struct("Basic").field("user", user).finish(),
            Credentials::ApiKey(_) => f.write_str("ApiKey"),
            Credentials::Bearer(_) => f.write_str("Bearer"),
        }
    }
}

impl Source {
    /// Checks required fields and mutually exclusive credentials before any
    /// network call is made.
    pub fn validate(&self) -> Result<()> {
        if self.endpoint.is_empty() {
            return Err(ResourceError::validation("endpoint is required"));
        }

        let secrets = [&self.password, &self.api_key, &self.access_token]
            .iter()
            .filter(|secret| !secret.is_empty())
            .count();

        if !self.user.is_empty() && secrets == 0 {
            return Err(ResourceError::validation(
                "user cannot be defined without a password, access_token or api_key",
            ));
        }

        if secrets > 1 {
            return Err(ResourceError::validation(
                "only one of password, access_token or api_key may be defined",
            ));
        }

        self.aql.validate()
    }

    /// Steps that move images need a registry host on top of [`validate`](Self::validate).
    pub fn validate_registry(&self) -> Result<()> {
        self.validate()?;

        if self.host.is_empty() {
            return Err(ResourceError::validation("host is required to pull or push images"));
        }

        Ok(())
    }

    pub fn credentials(&self) -> Credentials {
        let secret = [&self.password, &self.api_key, &self.access_token]
            .into_iter()
            .find(|secret| !secret.is_empty());

        match (self.user.as_str(), secret) {
            ("", _) if !self.access_token.is_empty() => {
                Credentials::Bearer(self.access_token.clone())
            }
            ("", _) if !self.api_key.is_empty() => Credentials::ApiKey(self.api_key.clone()),
            ("", _) => Credentials::Anonymous,
            (user, Some(secret)) => Credentials::Basic {
                user: user.to_string(),
                secret: secret.clone(),
            },
            (_, None) => Credentials::Anonymous,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn source() -> Source {
        serde_json::from_value(json!({
            "endpoint": "https://example.jfrog.io/artifactory",
            "user": "ci",
            "password": "hunter2",
            "host": "example.jfrog.io",
            "aql": {"repo": "docker-local"},
        }))
        .unwrap()
    }

    #[test]
    fn valid_source() {
        assert!(source().validate().is_ok());
        assert!(source().validate_registry().is_ok());
    }

    #[test]
    fn endpoint_is_required() {
        let s = Source {
            endpoint: String::new(),
            ..source()
        };
        assert!(matches!(
            s.validate(),
            Err(ResourceError::Validation(m)) if m.contains("endpoint")
        ));
    }

    #[test]
    fn user_needs_a_secret() {
        let s = Source {
            password: String::new(),
            ..source()
        };
        assert!(s.validate().is_err());

        for (api_key, access_token) in [("key", ""), ("", "token")] {
            let s = Source {
                password: String::new(),
                api_key: api_key.into(),
                access_token: access_token.into(),
                ..source()
            };
            assert!(s.validate().is_ok());
        }
    }

    #[test]
    fn secrets_are_mutually_exclusive() {
        let s = Source {
            api_key: "key".into(),
            ..source()
        };
        assert!(s.validate().is_err());
    }

    #[test]
    fn token_without_user() {
        let s = Source {
            user: String::new(),
            password: String::new(),
            access_token: "token".into(),
            ..source()
        };
        assert!(s.validate().is_ok());
        assert_eq!(s.credentials(), Credentials::Bearer("token".into()));
    }

    #[test]
    fn host_required_for_registry_steps() {
        let s = Source {
            host: String::new(),
            ..source()
        };
        assert!(s.validate().is_ok());
        assert!(s.validate_registry().is_err());
    }

    #[test]
    fn query_is_validated() {
        let s = Source {
            aql: QuerySpec::default(),
            ..source()
        };
        assert!(s.validate().is_err());
    }

    #[test]
    fn credentials() {
        assert_eq!(
            source().credentials(),
            Credentials::Basic {
                user: "ci".into(),
                secret: "hunter2".into()
            }
        );

        let s = Source {
            user: String::new(),
            password: String::new(),
            api_key: "key".into(),
            ..source()
        };
        assert_eq!(s.credentials(), Credentials::ApiKey("key".into()));

        assert_eq!(Source::default().credentials(), Credentials::Anonymous);
    }

    #[test]
    fn debug_redacts_secrets() {
        let rendered = format!("{:?}", source());
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
        assert!(!format!("{:?}", source().credentials()).contains("hunter2"));
    }
}
