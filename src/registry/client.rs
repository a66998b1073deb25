use std::path::Path;
use std::sync::{LazyLock, Mutex};

use async_trait::async_trait;
use regex::Regex;
use reqwest::header::{ACCEPT, CONTENT_TYPE, LOCATION, WWW_AUTHENTICATE};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::address::RegistryReference;
use crate::config::{PlatformConfig, Settings};
use crate::digest::Digest;
use crate::error::{ResourceError, Result};
use crate::http::{authorize, client, ensure_success};
use crate::registry::archive::{
    Blob, DownloadedImage, read_docker_archive, unpack_rootfs, write_docker_archive, write_metadata,
};
use crate::registry::manifest::{
    ACCEPTED, Descriptor, ImageManifest, Parsed, parse_manifest, select_platform,
};
use crate::registry::{Format, ImageRegistry};
use crate::source::{Credentials, Source};

static CHALLENGE_PARAM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(\w+)="([^"]*)""#).expect("valid challenge pattern"));

#[derive(Debug, PartialEq, Eq)]
struct Challenge {
    realm: String,
    service: Option<String>,
}

impl Challenge {
    /// Parses a `Bearer realm="...",service="..."` authentication challenge.
    fn parse(header: &str) -> Option<Challenge> {
        let (scheme, params) = header.trim().split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("bearer") {
            return None;
        }

        let mut realm = None;
        let mut service = None;
        for captures in CHALLENGE_PARAM.captures_iter(params) {
            match &captures[1] {
                "realm" => realm = Some(captures[2].to_string()),
                "service" => service = Some(captures[2].to_string()),
                _ => {}
            }
        }

        Some(Challenge {
            realm: realm?,
            service,
        })
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

fn base_url(host: &str) -> String {
    let host = host.trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{host}")
    }
}

fn bare_host(host: &str) -> &str {
    host.trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_end_matches('/')
}

fn verify(expected: &Digest, actual: &Digest) -> Result<()> {
    if expected != actual {
        return Err(ResourceError::image(format!(
            "download of {expected} complete but wrong digest: {actual}"
        )));
    }
    Ok(())
}

/// Docker registry v2 client. Requests start with the source credentials;
/// when the registry answers with a bearer challenge a token is minted from
/// the challenge realm and reused for the rest of the run.
pub struct RegistryClient {
    client: Client,
    credentials: Credentials,
    platform: PlatformConfig,
    token: Mutex<Option<String>>,
}

impl RegistryClient {
    pub fn new(source: &Source, settings: &Settings) -> Result<Self> {
        Ok(Self {
            client: client(settings)?,
            credentials: source.credentials(),
            platform: settings.platform.clone(),
            token: Mutex::new(None),
        })
    }

    fn url(reference: &RegistryReference, suffix: &str) -> String {
        format!("{}/v2/{}/{suffix}", base_url(&reference.host), reference.name)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        let token = self.token.lock().ok().and_then(|token| token.clone());
        match token {
            Some(token) => request.bearer_auth(token),
            None => authorize(request, &self.credentials),
        }
    }

    async fn mint(&self, challenge: &Challenge, scope: &str) -> Result<()> {
        let mut query = vec![("scope", scope)];
        if let Some(service) = &challenge.service {
            query.push(("service", service.as_str()));
        }

        debug!(realm = %challenge.realm, scope, "Minting registry token");

        let request = self.client.get(&challenge.realm).query(&query);
        let response = ensure_success(authorize(request, &self.credentials).send().await?).await?;
        let payload: TokenResponse = response.json().await?;
        let token = payload
            .token
            .or(payload.access_token)
            .ok_or_else(|| ResourceError::image("token response carries no token"))?;

        if let Ok(mut cached) = self.token.lock() {
            *cached = Some(token);
        }
        Ok(())
    }

    /// Sends `request`, answering one bearer challenge if the registry
    /// issues it.
    async fn send(&self, request: RequestBuilder, scope: &str) -> Result<Response> {
        let retry = request.try_clone();
        let response = self.authorized(request).send().await?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let challenge = response
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|value| value.to_str().ok())
            .and_then(Challenge::parse);

        match (challenge, retry) {
            (Some(challenge), Some(retry)) => {
                self.mint(&challenge, scope).await?;
                Ok(self.authorized(retry).send().await?)
            }
            _ => Ok(response),
        }
    }

    async fn get_manifest(
        &self,
        reference: &RegistryReference,
        tag: &str,
        scope: &str,
    ) -> Result<(Vec<u8>, Option<String>)> {
        let request = self
            .client
            .get(Self::url(reference, &format!("manifests/{tag}")))
            .header(ACCEPT, ACCEPTED.join(", "));
        let response = ensure_success(self.send(request, scope).await?).await?;

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(';').next())
            .map(|value| value.trim().to_string());

        Ok((response.bytes().await?.to_vec(), content_type))
    }

    async fn image_manifest(
        &self,
        reference: &RegistryReference,
        tag: &str,
        scope: &str,
    ) -> Result<(Digest, ImageManifest)> {
        let (body, content_type) = self.get_manifest(reference, tag, scope).await?;
        let digest = Digest::of(&body);

        let manifests = match parse_manifest(&body, content_type.as_deref())? {
            Parsed::Image(manifest) => return Ok((digest, manifest)),
            Parsed::Index(manifests) => manifests,
        };

        let descriptor = select_platform(&manifests, &self.platform)?;
        info!(
            digest = %descriptor.digest,
            os = %self.platform.os,
            architecture = %self.platform.architecture,
            "Resolved manifest list"
        );

        let (body, content_type) = self
            .get_manifest(reference, &descriptor.digest.to_string(), scope)
            .await?;
        verify(&descriptor.digest, &Digest::of(&body))?;

        match parse_manifest(&body, content_type.as_deref())? {
            Parsed::Image(manifest) => Ok((digest, manifest)),
            Parsed::Index(_) => Err(ResourceError::image(
                "nested manifest lists are not supported",
            )),
        }
    }

    async fn blob_response(
        &self,
        reference: &RegistryReference,
        digest: &Digest,
        scope: &str,
    ) -> Result<Response> {
        let request = self
            .client
            .get(Self::url(reference, &format!("blobs/{digest}")));
        ensure_success(self.send(request, scope).await?).await
    }

    async fn download_blob(
        &self,
        reference: &RegistryReference,
        digest: &Digest,
        path: &Path,
        scope: &str,
    ) -> Result<()> {
        let mut response = self.blob_response(reference, digest, scope).await?;
        let mut file = tokio::fs::File::create(path).await?;
        let mut hasher = ring::digest::Context::new(&ring::digest::SHA256);

        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            hasher.update(&chunk);
        }
        file.flush().await?;

        verify(digest, &Digest::from_sha256(&hasher.finish()))
    }

    async fn upload_blob(
        &self,
        reference: &RegistryReference,
        blob: &Blob,
        scope: &str,
    ) -> Result<()> {
        let head = self
            .client
            .head(Self::url(reference, &format!("blobs/{}", blob.digest)));
        if self.send(head, scope).await?.status().is_success() {
            debug!(digest = %blob.digest, "Blob already present");
            return Ok(());
        }

        let request = self.client.post(Self::url(reference, "blobs/uploads/"));
        let response = ensure_success(self.send(request, scope).await?).await?;

        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| ResourceError::image("upload response has no Location header"))?;
        let mut upload = response
            .url()
            .join(location)
            .map_err(|err| {
                ResourceError::image(format!("invalid upload location {location:?}: {err}"))
            })?;
        upload
            .query_pairs_mut()
            .append_pair("digest", &blob.digest.to_string());

        let request = self
            .client
            .put(upload)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(blob.data.clone());
        ensure_success(self.send(request, scope).await?).await?;

        debug!(digest = %blob.digest, size = blob.data.len(), "Uploaded blob");
        Ok(())
    }
}

#[async_trait]
impl ImageRegistry for RegistryClient {
    #[tracing::instrument(
        level = "debug",
        skip(self, reference, dest),
        fields(reference = %reference)
    )]
    async fn pull(
        &self,
        reference: &RegistryReference,
        tag: &str,
        dest: &Path,
        format: Format,
    ) -> Result<Digest> {
        let scope = format!("repository:{}:pull", reference.name);
        let (digest, manifest) = self.image_manifest(reference, tag, &scope).await?;

        let config = self
            .blob_response(reference, &manifest.config.digest, &scope)
            .await?
            .bytes()
            .await?
            .to_vec();
        verify(&manifest.config.digest, &Digest::of(&config))?;

        let downloads = tempfile::tempdir_in(dest)?;
        let mut layers = Vec::with_capacity(manifest.layers.len());
        for layer in &manifest.layers {
            let path = downloads.path().join(layer.digest.archive_name(".layer"));
            self.download_blob(reference, &layer.digest, &path, &scope)
                .await?;
            layers.push((layer.digest.clone(), path));
        }

        info!(%digest, layers = layers.len(), "Downloaded image");

        let dest = dest.to_path_buf();
        let repo_tag = format!("{}/{}:{tag}", bare_host(&reference.host), reference.name);
        let image = DownloadedImage {
            config,
            config_digest: manifest.config.digest.clone(),
            layers,
        };

        tokio::task::spawn_blocking(move || match format {
            Format::Rootfs => {
                let paths = image.layers.iter().map(|(_, path)| path.clone()).collect::<Vec<_>>();
                unpack_rootfs(&dest.join("rootfs"), &paths)?;
                write_metadata(&dest, &image.config)
            }
            Format::Oci => write_docker_archive(&dest.join("image.tar"), &repo_tag, &image),
        })
        .await??;

        Ok(digest)
    }

    #[tracing::instrument(level = "debug", skip(self, reference), fields(reference = %reference))]
    async fn push(
        &self,
        archive: &Path,
        reference: &RegistryReference,
        tags: &[String],
    ) -> Result<Digest> {
        let path = archive.to_path_buf();
        let image = tokio::task::spawn_blocking(move || read_docker_archive(&path)).await??;

        let scope = format!("repository:{}:pull,push", reference.name);
        for blob in std::iter::once(&image.config).chain(&image.layers) {
            self.upload_blob(reference, blob, &scope).await?;
        }

        let manifest = ImageManifest::docker(
            Descriptor::new(
                image.config.media_type,
                image.config.digest.clone(),
                image.config.data.len(),
            ),
            image
                .layers
                .iter()
                .map(|layer| {
                    Descriptor::new(layer.media_type, layer.digest.clone(), layer.data.len())
                })
                .collect(),
        );
        let body = serde_json::to_vec(&manifest)?;
        let digest = Digest::of(&body);

        for tag in tags {
            let request = self
                .client
                .put(Self::url(reference, &format!("manifests/{tag}")))
                .header(CONTENT_TYPE, manifest.media_type.as_str())
                .body(body.clone());
            ensure_success(self.send(request, &scope).await?).await?;

            info!(%digest, tag, "Pushed manifest");
        }

        Ok(digest)
    }
}
