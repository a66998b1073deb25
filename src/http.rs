use reqwest::{Client, RequestBuilder, Response};

use crate::config::Settings;
use crate::error::{ResourceError, Result};
use crate::source::Credentials;

pub(crate) const API_KEY_HEADER: &str = "X-JFrog-Art-Api";

pub(crate) fn client(settings: &Settings) -> Result<Client> {
    Ok(Client::builder()
        .user_agent(settings.user_agent.as_str())
        .timeout(settings.timeout())
        .connect_timeout(settings.connect_timeout())
        .build()?)
}

pub(crate) fn authorize(builder: RequestBuilder, credentials: &Credentials) -> RequestBuilder {
    match credentials {
        Credentials::Anonymous => builder,
        Credentials::Basic { user, secret } => builder.basic_auth(user, Some(secret)),
        Credentials::ApiKey(key) => builder.header(API_KEY_HEADER, key),
        Credentials::Bearer(token) => builder.bearer_auth(token),
    }
}

/// Turns a non-2xx response into [`ResourceError::Status`], keeping the body
/// for the error message.
pub(crate) async fn ensure_success(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let url = response.url().to_string();
    let body = response.text().await.unwrap_or_default();
    Err(ResourceError::Status { url, status, body })
}
