use crate::config::BackendConfig;
use anyhow::{Context, Result, ensure};
use reqwest::{
    Client, Response,
    header::{HeaderMap, HeaderName, HeaderValue},
};
use std::time::Duration;

const APPLICATION_ID_HEADER: &str = "x-parse-application-id";
const CLIENT_KEY_HEADER: &str = "x-parse-client-key";
const SESSION_TOKEN_HEADER: &str = "x-parse-session-token";

/// Create an HTTP client for the remote session store
///
/// Every request carries the application credentials and the session token of the
/// signed-in user.
///
/// # Arguments
/// * `backend` - Backend location and application credentials
/// * `user_session_token` - Session token of the signed-in user
pub fn backend_client(backend: &BackendConfig, user_session_token: &str) -> Result<Client> {
    let mut headers = HeaderMap::new();

    for (name, value) in [
        (APPLICATION_ID_HEADER, backend.application_id.as_str()),
        (CLIENT_KEY_HEADER, backend.client_key.as_str()),
        (SESSION_TOKEN_HEADER, user_session_token),
    ] {
        let mut value = HeaderValue::from_str(value)
            .context(format!("failed to build header {name}: invalid value"))?;
        value.set_sensitive(name != APPLICATION_ID_HEADER);
        headers.insert(HeaderName::from_static(name), value);
    }

    Client::builder()
        .default_headers(headers)
        .build()
        .context("failed to create backend HTTP client")
}

/// Create a blocking client for requests to a device access point
///
/// # Arguments
/// * `timeout` - Upper bound for the whole request including connect
pub fn device_client(timeout: Duration) -> Result<reqwest::blocking::Client> {
    reqwest::blocking::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout)
        .no_proxy()
        .build()
        .context("failed to create device HTTP client")
}

/// Handle HTTP response by checking status and extracting body
///
/// # Arguments
/// * `res` - The HTTP response to handle
/// * `context_msg` - Context message describing the request (e.g., "POST /sessions")
///
/// # Returns
/// * `Ok(String)` - The response body if the status is successful
/// * `Err` - If the status is not successful or reading the body fails
pub async fn handle_http_response(res: Response, context_msg: &str) -> Result<String> {
    let status = res.status();
    let body = res.text().await.context("failed to read response body")?;

    ensure!(
        status.is_success(),
        "{context_msg} failed with status {status} and body: {body}"
    );

    Ok(body)
}
