//! Outbound HTTP to partner endpoints: URL policy, timeouts, error mapping.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use serde::de::DeserializeOwned;
use url::Url;
use xavyo_policy::TechnicalProfile;

use crate::context::{AdapterContext, DEFAULT_TIMEOUT_SECS};
use crate::error::{AdapterError, AdapterResult};

/// Longest partner error body kept for logs.
const MAX_LOGGED_BODY: usize = 500;

/// Parses a partner URL and rejects plain HTTP and internal hosts unless
/// insecure endpoints are allowed.
pub(crate) fn checked_url(raw: &str, allow_insecure: bool) -> AdapterResult<Url> {
    let url = Url::parse(raw)
        .map_err(|e| AdapterError::config(format!("invalid partner URL '{raw}': {e}")))?;
    if allow_insecure {
        return Ok(url);
    }
    if url.scheme() != "https" {
        return Err(AdapterError::config(format!(
            "only HTTPS partner endpoints are allowed, got {}",
            url.scheme()
        )));
    }
    let host = url
        .host_str()
        .ok_or_else(|| AdapterError::config(format!("partner URL '{raw}' has no host")))?;
    if is_internal_host(host) {
        return Err(AdapterError::config(format!(
            "partner URL targets an internal address: {host}"
        )));
    }
    Ok(url)
}

fn is_internal_host(host: &str) -> bool {
    let bare = host.trim_start_matches('[').trim_end_matches(']');
    match bare.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                || v4.is_documentation()
                || v4 == Ipv4Addr::new(169, 254, 169, 254)
        }
        Ok(IpAddr::V6(v6)) => {
            let first = v6.segments()[0];
            v6.is_loopback() || v6.is_unspecified() || (first & 0xfe00) == 0xfc00 || (first & 0xffc0) == 0xfe80
        }
        Err(_) => {
            let lower = host.to_lowercase();
            ["localhost", "metadata.google.internal", "metadata.goog"]
                .iter()
                .any(|b| lower == *b || lower.ends_with(&format!(".{b}")))
        }
    }
}

/// `TimeoutSeconds` metadata of the profile, or the default.
pub(crate) fn timeout_for(profile: &TechnicalProfile) -> Duration {
    let secs = profile
        .metadata("TimeoutSeconds")
        .and_then(|s| s.trim().parse::<u64>().ok())
        .filter(|s| *s > 0)
        .unwrap_or(DEFAULT_TIMEOUT_SECS);
    Duration::from_secs(secs)
}

/// Sends `request` and decodes a JSON body.
///
/// Transport failures, timeouts, 429 and 5xx map to `UnreachableEndpoint`;
/// other non-success statuses and undecodable bodies to
/// `MalformedResponse`.
pub(crate) async fn send_json<T: DeserializeOwned>(
    request: reqwest::RequestBuilder,
    endpoint: &Url,
) -> AdapterResult<T> {
    let response = request
        .send()
        .await
        .map_err(|e| AdapterError::unreachable(endpoint.as_str(), e))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        tracing::warn!(
            endpoint = %endpoint,
            status = %status,
            body = %truncate(&body),
            "Partner endpoint returned an error status"
        );
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(AdapterError::unreachable(
                endpoint.as_str(),
                format!("HTTP {status}"),
            ));
        }
        return Err(AdapterError::malformed(format!(
            "{endpoint} returned HTTP {status}"
        )));
    }

    response
        .json::<T>()
        .await
        .map_err(|e| AdapterError::malformed(format!("{endpoint} returned an invalid body: {e}")))
}

pub(crate) async fn get_json<T: DeserializeOwned>(
    ctx: &AdapterContext,
    url: &Url,
    timeout: Duration,
) -> AdapterResult<T> {
    send_json(ctx.http.get(url.clone()).timeout(timeout), url).await
}

fn truncate(body: &str) -> &str {
    if body.len() <= MAX_LOGGED_BODY {
        return body;
    }
    let end = body
        .char_indices()
        .take_while(|(i, _)| *i < MAX_LOGGED_BODY)
        .last()
        .map_or(0, |(i, c)| i + c.len_utf8());
    &body[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_plain_http_and_internal_hosts() {
        assert!(checked_url("https://login.contoso.com/x", false).is_ok());
        for bad in [
            "http://login.contoso.com",
            "https://127.0.0.1/x",
            "https://10.1.2.3",
            "https://169.254.169.254/latest",
            "https://localhost:8443",
            "https://[::1]/",
            "https://metadata.google.internal",
        ] {
            let err = checked_url(bad, false).unwrap_err();
            assert!(matches!(err, AdapterError::Configuration(_)), "{bad}");
        }
    }

    #[test]
    fn insecure_mode_allows_local_http() {
        assert!(checked_url("http://127.0.0.1:8080/", true).is_ok());
        assert!(checked_url("not a url", true).is_err());
    }

    #[test]
    fn timeout_comes_from_metadata() {
        let mut profile: TechnicalProfile = bare_profile();
        assert_eq!(timeout_for(&profile), Duration::from_secs(DEFAULT_TIMEOUT_SECS));
        profile
            .metadata
            .insert("TimeoutSeconds".to_string(), "3".to_string());
        assert_eq!(timeout_for(&profile), Duration::from_secs(3));
        profile
            .metadata
            .insert("TimeoutSeconds".to_string(), "soon".to_string());
        assert_eq!(timeout_for(&profile), Duration::from_secs(DEFAULT_TIMEOUT_SECS));
    }

    fn bare_profile() -> TechnicalProfile {
        serde_json::from_value(serde_json::json!({
            "id": "Contoso-OpenIdConnect",
            "protocol": "OpenIdConnect"
        }))
        .unwrap()
    }

    #[test]
    fn truncates_on_char_boundary() {
        let body = "é".repeat(400);
        let cut = truncate(&body);
        assert!(cut.len() <= MAX_LOGGED_BODY + 1);
        assert!(body.starts_with(cut));
    }
}
