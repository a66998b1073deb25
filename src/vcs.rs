use std::path::Path;

use git2::Repository;
use tracing::{debug, warn};

use crate::error::Result;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Vcs {
    pub revision: String,
    pub url: String,
}

pub trait VcsInspector {
    /// Reads the checked-out revision and remote URL of the repository at
    /// `path`. An explicit `url` replaces the remote lookup. Lookups that
    /// fail leave their field empty.
    fn inspect(&self, path: &Path, url: &str) -> Vcs;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct GitInspector;

fn head_revision(repository: &Repository) -> Result<String> {
    let commit = repository.head()?.peel_to_commit()?;
    Ok(commit.id().to_string())
}

fn first_remote_url(repository: &Repository) -> Result<Option<String>> {
    let remotes = repository.remotes()?;
    let Some(name) = remotes.iter().flatten().next() else {
        return Ok(None);
    };

    let remote = repository.find_remote(name)?;
    Ok(remote.url().map(str::to_string))
}

impl VcsInspector for GitInspector {
    fn inspect(&self, path: &Path, url: &str) -> Vcs {
        let mut vcs = Vcs::default();

        debug!(path = %path.display(), "Inspecting repository");

        let repository = match Repository::open(path) {
            Ok(repository) => repository,
            Err(err) => {
                warn!(path = %path.display(), "Failed to open repository: {err}");
                return vcs;
            }
        };

        match head_revision(&repository) {
            Ok(revision) => vcs.revision = revision,
            Err(err) => {
                warn!("Failed to read vcs revision: {err}");
                return vcs;
            }
        }

        if !url.is_empty() {
            vcs.url = url.to_string();
            return vcs;
        }

        match first_remote_url(&repository) {
            Ok(Some(remote)) => vcs.url = remote,
            Ok(None) => debug!("Repository has no remotes"),
            Err(err) => warn!("Failed to read vcs remotes: {err}"),
        }

        vcs
    }
}
