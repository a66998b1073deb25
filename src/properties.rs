use std::path::Path;

use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use regex::{Regex, RegexBuilder};
use serde::Serialize;
use tracing::debug;

use crate::error::{ResourceError, Result};

/// Patterns excluded from the build environment unless overridden.
pub const DEFAULT_ENV_EXCLUDE: &str = "*password*;*psw*;*secret*;*key*;*token*";

const QUERY: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'&')
    .add(b'+')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// An ordered list of artifact properties.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Properties(Vec<(String, String)>);

impl Properties {
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.push((key.into(), value.into()));
    }

    pub fn extend(&mut self, other: Properties) {
        self.0.extend(other.0);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.iter()
            .filter(|(k, _)| *k == key)
            .map(|(_, v)| v)
            .last()
    }

    /// Parses `key=value` lines. Blank lines and `#` comments are skipped,
    /// as are lines without a `=`. Values keep everything after the first `=`.
    pub fn parse(input: &str) -> Self {
        let mut properties = Properties::default();

        for line in input.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            match line.split_once('=') {
                Some((key, value)) if !key.trim().is_empty() => {
                    properties.push(key.trim(), value.trim());
                }
                _ => debug!("Skipping malformed property line: {line:?}"),
            }
        }

        properties
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let input = std::fs::read_to_string(path).map_err(|err| {
            ResourceError::Io(std::io::Error::new(
                err.kind(),
                format!("unable to read {}: {err}", path.display()),
            ))
        })?;
        Ok(Self::parse(&input))
    }

    /// Keeps entries whose key matches one of `include` (everything when
    /// empty) and none of `exclude`.
    pub fn filter(self, include: &EnvFilter, exclude: &EnvFilter) -> Self {
        Self(
            self.0
                .into_iter()
                .filter(|(key, _)| include.is_empty() || include.matches(key))
                .filter(|(key, _)| !exclude.matches(key))
                .collect(),
        )
    }

    /// Prefixes every key, e.g. `buildInfo.env.`.
    pub fn prefixed(self, prefix: &str) -> Self {
        Self(
            self.0
                .into_iter()
                .map(|(key, value)| (format!("{prefix}{key}"), value))
                .collect(),
        )
    }

    /// Encodes the properties for the storage API `properties` parameter:
    /// `k1=v1|k2=v2`, with `,`, `\`, `|` and `=` escaped by a backslash.
    pub fn to_query_value(&self) -> String {
        self.iter()
            .map(|(key, value)| format!("{}={}", escape(key), escape(value)))
            .collect::<Vec<_>>()
            .join("|")
    }

    pub fn to_query_param(&self) -> String {
        utf8_percent_encode(&self.to_query_value(), QUERY).to_string()
    }
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, ',' | '\\' | '|' | '=') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Case-insensitive `;`-separated glob patterns over property keys.
#[derive(Clone, Debug, Default)]
pub struct EnvFilter {
    patterns: Vec<Regex>,
}

fn glob_to_regex(glob: &str) -> String {
    let mut out = String::from("^");
    for c in glob.chars() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            c => out.push_str(&regex::escape(&c.to_string())),
        }
    }
    out.push('$');
    out
}

impl EnvFilter {
    pub fn parse(patterns: &str) -> Result<Self> {
        let patterns = patterns
            .split(';')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(|p| {
                RegexBuilder::new(&glob_to_regex(p))
                    .case_insensitive(true)
                    .build()
                    .map_err(|err| {
                        ResourceError::validation(format!("invalid pattern {p:?}: {err}"))
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { patterns })
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn matches(&self, key: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(key))
    }
}
