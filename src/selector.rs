use tracing::debug;

use crate::version::Version;

/// Reconciles the search results with the version the orchestrator already
/// knows about.
///
/// Results are first stably sorted by modification time, oldest first, so
/// "newest" never depends on the order the search service happened to use.
/// Then, in order:
///
/// 1. nothing found but a version is known: echo the known version back;
/// 2. results found but no version is known: report only the newest one;
/// 3. otherwise the sorted results are reported as they are.
pub fn select(known: &Version, mut versions: Vec<Version>) -> Vec<Version> {
    versions.sort_by(Version::cmp_modified);

    if versions.is_empty() && !known.is_empty() {
        debug!("No new versions, echoing input version");
        return vec![known.clone()];
    }

    if !versions.is_empty() && known.is_empty() {
        debug!("New versions without an input version, using latest");
        return versions.split_off(versions.len() - 1);
    }

    versions
}
