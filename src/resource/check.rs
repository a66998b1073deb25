use tracing::info;

use crate::artifactory::MetadataStore;
use crate::clock::Clock;
use crate::error::Result;
use crate::normalize::normalize_all;
use crate::query::{add_modified_bound, build_query};
use crate::resource::CheckRequest;
use crate::selector::select;
use crate::version::Version;

/// Discovers the versions newer than the one in the request.
pub async fn check(
    request: &CheckRequest,
    store: &dyn MetadataStore,
    clock: &Clock,
) -> Result<Vec<Version>> {
    request.source.validate()?;

    let query = build_query(&request.source.aql)?;
    let query = add_modified_bound(query, &request.version, clock.now());

    let items = if query.is_empty() {
        Vec::new()
    } else {
        store.search_items(&query).await?
    };
    let versions = normalize_all(&items)?;

    let versions = select(&request.version, versions);
    info!("Reporting {} versions", versions.len());
    Ok(versions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ResourceError;
    use crate::resource::fakes::{FakeStore, item};
    use crate::source::Source;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use test_log::test;

    fn request(version: serde_json::Value) -> CheckRequest {
        serde_json::from_value(json!({
            "source": {
                "endpoint": "https://example.jfrog.io/artifactory",
                "aql": {"repo": "docker-local", "image": "acme/app", "tag": "*"},
            },
            "version": version,
        }))
        .unwrap()
    }

    fn clock() -> Clock {
        Clock::fixed(Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap())
    }

    #[test(tokio::test)]
    async fn echoes_known_version_when_nothing_is_new() {
        let store = FakeStore::default();
        let request = request(json!({
            "repo": "docker-local",
            "image": "acme/app",
            "tag": "1.0.0",
            "modified": "2024-05-01T00:00:00Z",
        }));

        let versions = check(&request, &store, &clock()).await.unwrap();
        assert_eq!(versions, vec![request.version.clone()]);

        let queries = store.queries.lock().unwrap();
        assert_eq!(queries.len(), 1);
        assert!(queries[0].contains(r#""modified":{"$gt":"2024-05-01T00:00:00Z"}"#));
    }

    #[test(tokio::test)]
    async fn first_check_reports_newest_only() {
        let store = FakeStore {
            items: vec![
                item("1.1.0", "2024-02-01T00:00:00.000Z", None),
                item("1.0.0", "2024-01-01T00:00:00.000Z", None),
            ],
            ..Default::default()
        };

        let versions = check(&request(json!(null)), &store, &clock()).await.unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].tag, "1.1.0");

        let queries = store.queries.lock().unwrap();
        assert!(queries[0].contains(r#""modified":{"$gt":"2022-06-15T12:00:00Z"}"#));
        assert!(queries[0].contains(r#""path":{"$match":"acme/app/*"}"#));
    }

    #[test(tokio::test)]
    async fn reports_all_newer_versions_in_order() {
        let store = FakeStore {
            items: vec![
                item("1.2.0", "2024-03-01T00:00:00.000Z", None),
                item("1.1.0", "2024-02-01T00:00:00.000Z", None),
            ],
            ..Default::default()
        };
        let request = request(json!({
            "repo": "docker-local",
            "image": "acme/app",
            "tag": "1.0.0",
            "modified": "2024-01-01T00:00:00Z",
        }));

        let versions = check(&request, &store, &clock()).await.unwrap();
        let tags = versions.iter().map(|v| v.tag.as_str()).collect::<Vec<_>>();
        assert_eq!(tags, vec!["1.1.0", "1.2.0"]);
    }

    #[test(tokio::test)]
    async fn unparseable_timestamp_fails_the_batch() {
        let store = FakeStore {
            items: vec![
                item("1.0.0", "2024-01-01T00:00:00.000Z", None),
                item("1.1.0", "yesterday", None),
            ],
            ..Default::default()
        };

        let err = check(&request(json!(null)), &store, &clock()).await.unwrap_err();
        assert!(matches!(err, ResourceError::Parse { .. }));
    }

    #[test(tokio::test)]
    async fn invalid_source_never_searches() {
        let store = FakeStore::default();
        let request = CheckRequest {
            source: Source {
                endpoint: "https://example.jfrog.io/artifactory".into(),
                ..Default::default()
            },
            version: Version::default(),
        };

        let err = check(&request, &store, &clock()).await.unwrap_err();
        assert!(matches!(err, ResourceError::Validation(_)));
        assert!(store.queries.lock().unwrap().is_empty());
    }

    #[test(tokio::test)]
    async fn raw_query_passes_through() {
        let store = FakeStore {
            items: vec![item("1.0.0", "2024-01-01T00:00:00.000Z", None)],
            ..Default::default()
        };
        let mut request = request(json!(null));
        request.source.aql = serde_json::from_value(json!({
            "raw": r#"{"repo": "docker-prod", "name": "manifest.json"}"#,
        }))
        .unwrap();

        let versions = check(&request, &store, &clock()).await.unwrap();
        assert_eq!(versions.len(), 1);

        let queries = store.queries.lock().unwrap();
        let expected = r#"items.find({"repo":"docker-prod","name":"manifest.json","modified""#;
        assert!(queries[0].starts_with(expected));
    }
}
