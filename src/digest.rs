use std::convert::TryFrom;
use std::fmt;
use std::str::FromStr;

use data_encoding::HEXLOWER;
use ring::digest;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Hash, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(try_from = "String", into = "String")]
pub struct Digest {
    pub algo: String,
    pub hash: String,
}

impl Digest {
    pub fn from_sha256(digest: &digest::Digest) -> Digest {
        Digest {
            algo: "sha256".to_string(),
            hash: HEXLOWER.encode(digest.as_ref()),
        }
    }

    /// Digest of an in-memory buffer.
    pub fn of(data: &[u8]) -> Digest {
        Self::from_sha256(&digest::digest(&digest::SHA256, data))
    }

    /// File name used for this digest inside a `docker save` archive.
    pub fn archive_name(&self, extension: &str) -> String {
        format!("{}{}", self.hash, extension)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct InvalidDigest(String);

impl fmt::Display for InvalidDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "not a sha256 digest: {:?}", self.0)
    }
}

impl std::error::Error for InvalidDigest {}

impl FromStr for Digest {
    type Err = InvalidDigest;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((algo, hash))
                if algo == "sha256"
                    && !hash.is_empty()
                    && hash.chars().all(|c| c.is_ascii_hexdigit()) =>
            {
                Ok(Digest {
                    algo: algo.to_string(),
                    hash: hash.to_ascii_lowercase(),
                })
            }
            _ => Err(InvalidDigest(s.to_string())),
        }
    }
}

// We implement this so that serde_json can parse a Digest from a straight string
impl TryFrom<String> for Digest {
    type Error = InvalidDigest;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

// We implement this so that serde_json can serialize a Digest struct into a string
impl From<Digest> for String {
    fn from(digest: Digest) -> Self {
        format!("{}", digest)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algo, self.hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_str() {
        let digest: Digest = "sha256:abcdef0123456789".parse().unwrap();

        assert_eq!(digest.algo, "sha256");
        assert_eq!(digest.hash, "abcdef0123456789");
    }

    #[test]
    fn rejects_other_algorithms() {
        assert!("md5:abcdef".parse::<Digest>().is_err());
        assert!("sha256:".parse::<Digest>().is_err());
        assert!("sha256:xyz".parse::<Digest>().is_err());
        assert!("latest".parse::<Digest>().is_err());
    }

    #[test]
    fn from_json() {
        let data = r#"
        "sha256:abcdef0123456789"
        "#;
        let parsed: Digest = serde_json::from_str(data).unwrap();
        let digest: Digest = "sha256:abcdef0123456789".parse().unwrap();

        assert_eq!(parsed, digest);
    }

    #[test]
    fn to_json() {
        let data = r#""sha256:abcdef0123456789""#;
        let digest: Digest = "sha256:abcdef0123456789".parse().unwrap();
        let serialized = serde_json::to_string(&digest).unwrap();

        assert_eq!(data, serialized);
    }

    #[test]
    fn of_buffer() {
        let digest = Digest::of(b"hello, world");

        assert_eq!(digest.algo, "sha256");
        assert_eq!(
            digest.hash,
            "09ca7e4eaa6e8ae9c7d261167129184883644d07dfba7cbfbc4c8a2e08360d5b"
        );

        let digest = Digest::of(b"");
        assert_eq!(
            digest.to_string(),
            "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn archive_name() {
        let digest: Digest = "sha256:abcdef0123456789".parse().unwrap();
        assert_eq!(digest.archive_name(".json"), "abcdef0123456789.json");
    }
}
