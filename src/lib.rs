//! A pipeline resource that tracks Docker images stored in Artifactory.

pub mod address;
pub mod artifactory;
pub mod buildinfo;
pub mod clock;
pub mod config;
pub mod digest;
pub mod error;
mod http;
pub mod metadata;
pub mod normalize;
pub mod properties;
pub mod query;
pub mod registry;
pub mod resource;
pub mod selector;
pub mod source;
pub mod vcs;
pub mod version;

pub use error::{ResourceError, Result};
