use std::path::Path;

use tracing::{debug, info};

use crate::address::{registry_reference, repository_path};
use crate::artifactory::MetadataStore;
use crate::error::Result;
use crate::metadata::item_metadata;
use crate::normalize::normalize;
use crate::registry::ImageRegistry;
use crate::resource::{GetRequest, Response};

/// Fetches the requested version into `dir`.
pub async fn get(
    request: &GetRequest,
    dir: &Path,
    store: &dyn MetadataStore,
    registry: &dyn ImageRegistry,
) -> Result<Response> {
    request.source.validate_registry()?;

    if request.version.is_empty() {
        info!("No version requested, nothing to fetch");
        return Ok(Response::default());
    }

    let address = request.version.address()?;
    let path = repository_path(&address);
    let item = store.search_item(&path).await?;
    let stored = normalize(&item)?;

    let mut version = request.version.clone();
    version.digest = stored.digest.or(version.digest);
    version.modified = stored.modified.or(version.modified);

    let reference = registry_reference(&request.source, &address);
    debug!(%reference, tag = address.tag, "Resolved image");

    if request.params.skip_download {
        info!("Skipping download of {reference}:{}", address.tag);
    } else {
        let digest = registry
            .pull(&reference, address.tag, dir, request.params.format)
            .await?;
        version.digest = Some(digest.to_string());
    }

    tokio::fs::write(dir.join("repository"), reference.to_string()).await?;
    tokio::fs::write(dir.join("tag"), address.tag).await?;
    if let Some(digest) = &version.digest {
        tokio::fs::write(dir.join("digest"), digest).await?;
    }

    Ok(Response {
        metadata: item_metadata(&path, &item),
        version,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ResourceError;
    use crate::registry::Format;
    use crate::resource::fakes::{DIGEST, FakeRegistry, FakeStore, Transfer, item};
    use serde_json::json;
    use test_log::test;

    fn request(version: serde_json::Value, params: serde_json::Value) -> GetRequest {
        serde_json::from_value(json!({
            "source": {
                "endpoint": "https://example.jfrog.io/artifactory",
                "host": "docker.example.com",
                "aql": {"repo": "docker-local"},
            },
            "version": version,
            "params": params,
        }))
        .unwrap()
    }

    fn version() -> serde_json::Value {
        json!({"repo": "docker-local", "image": "acme/app", "tag": "1.0.0"})
    }

    fn store() -> FakeStore {
        FakeStore {
            items: vec![item("1.0.0", "2024-01-01T00:00:00.000Z", None)],
            ..Default::default()
        }
    }

    #[test(tokio::test)]
    async fn empty_version_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = store();
        let registry = FakeRegistry::default();

        let response = get(&request(json!(null), json!({})), dir.path(), &store, &registry)
            .await
            .unwrap();

        assert_eq!(response, Response::default());
        assert!(store.lookups.lock().unwrap().is_empty());
        assert!(registry.transfers.lock().unwrap().is_empty());
        assert!(!dir.path().join("repository").exists());
    }

    #[test(tokio::test)]
    async fn pulls_and_writes_reference_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = store();
        let registry = FakeRegistry::default();

        let response = get(
            &request(version(), json!({"format": "oci"})),
            dir.path(),
            &store,
            &registry,
        )
        .await
        .unwrap();

        assert_eq!(
            *store.lookups.lock().unwrap(),
            vec!["docker-local/acme/app/1.0.0/manifest.json"]
        );
        assert_eq!(
            *registry.transfers.lock().unwrap(),
            vec![Transfer::Pull {
                reference: "docker.example.com/docker-local/acme/app".into(),
                tag: "1.0.0".into(),
                format: Format::Oci,
            }]
        );

        let read = |name: &str| std::fs::read_to_string(dir.path().join(name)).unwrap();
        assert_eq!(read("repository"), "docker.example.com/docker-local/acme/app");
        assert_eq!(read("tag"), "1.0.0");
        assert_eq!(read("digest"), DIGEST);

        assert_eq!(response.version.tag, "1.0.0");
        assert_eq!(response.version.digest.unwrap().to_string(), DIGEST);
        assert!(response.version.modified.is_some());
        assert_eq!(
            response.metadata.get("artifactory-path"),
            Some("docker-local/acme/app/1.0.0/manifest.json")
        );
    }

    #[test(tokio::test)]
    async fn skip_download_keeps_stored_digest() {
        let dir = tempfile::tempdir().unwrap();
        let stored = "sha512:ABCDEF0123";
        let store = FakeStore {
            items: vec![item("1.0.0", "2024-01-01T00:00:00.000Z", Some(stored))],
            ..Default::default()
        };
        let registry = FakeRegistry::default();

        let mut request = request(version(), json!({"skip_download": true}));
        request.source.proxy = true;

        let response = get(&request, dir.path(), &store, &registry).await.unwrap();

        assert!(registry.transfers.lock().unwrap().is_empty());
        assert_eq!(
            std::fs::read_to_string(dir.path().join("repository")).unwrap(),
            "docker.example.com/acme/app"
        );
        assert_eq!(std::fs::read_to_string(dir.path().join("digest")).unwrap(), stored);
        assert_eq!(response.version.digest.unwrap().to_string(), stored);
    }

    #[test(tokio::test)]
    async fn skip_download_without_digest() {
        let dir = tempfile::tempdir().unwrap();

        get(
            &request(version(), json!({"skip_download": true})),
            dir.path(),
            &store(),
            &FakeRegistry::default(),
        )
        .await
        .unwrap();

        assert!(dir.path().join("tag").exists());
        assert!(!dir.path().join("digest").exists());
    }

    #[test(tokio::test)]
    async fn missing_item_fails() {
        let dir = tempfile::tempdir().unwrap();
        let request = request(
            json!({"repo": "docker-local", "image": "acme/app", "tag": "9.9.9"}),
            json!({}),
        );

        let err = get(&request, dir.path(), &store(), &FakeRegistry::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ResourceError::NotFound(_)));
    }

    #[test(tokio::test)]
    async fn host_is_required() {
        let dir = tempfile::tempdir().unwrap();
        let mut request = request(version(), json!({}));
        request.source.host.clear();

        let err = get(&request, dir.path(), &store(), &FakeRegistry::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ResourceError::Validation(_)));
    }
}
