//! SSO cookie carrying the sealed session-management record between
//! journeys. `HttpOnly`, SameSite=Lax so it accompanies top-level
//! navigations from relying parties.

use axum::http::{header::COOKIE, header::SET_COOKIE, HeaderMap, HeaderValue};

/// Cookie name for the sealed SSO record.
pub const SSO_COOKIE_NAME: &str = "xavyo_journey_sso";

#[must_use]
pub fn create_sso_cookie(value: &str, max_age_secs: i64, secure: bool) -> String {
    let secure_flag = if secure { "; Secure" } else { "" };
    format!(
        "{SSO_COOKIE_NAME}={value}; HttpOnly{secure_flag}; SameSite=Lax; Path=/; Max-Age={max_age_secs}"
    )
}

pub fn set_sso_cookie(headers: &mut HeaderMap, value: &str, max_age_secs: i64, secure: bool) {
    let cookie_value = create_sso_cookie(value, max_age_secs, secure);
    if let Ok(value) = HeaderValue::from_str(&cookie_value) {
        headers.append(SET_COOKIE, value);
    }
}

/// Sealed SSO value from the request's `Cookie` header, if any.
pub fn extract_sso_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|h| h.to_str().ok())
        .flat_map(|h| h.split(';'))
        .find_map(|part| {
            part.trim()
                .strip_prefix(SSO_COOKIE_NAME)
                .and_then(|rest| rest.strip_prefix('='))
                .map(|v| v.trim().to_string())
        })
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_flags() {
        let cookie = create_sso_cookie("abc", 3600, true);
        assert!(cookie.starts_with("xavyo_journey_sso=abc;"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("; Secure"));
        assert!(cookie.contains("Max-Age=3600"));
        assert!(!create_sso_cookie("abc", 60, false).contains("Secure"));
    }

    #[test]
    fn extracts_among_other_cookies() {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_static("theme=dark; xavyo_journey_sso=sealed-value; lang=en"),
        );
        assert_eq!(extract_sso_cookie(&headers).as_deref(), Some("sealed-value"));
    }

    #[test]
    fn similar_names_do_not_match() {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("xavyo_journey_sso_old=x"));
        assert_eq!(extract_sso_cookie(&headers), None);
        assert_eq!(extract_sso_cookie(&HeaderMap::new()), None);
    }
}
