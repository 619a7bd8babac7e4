//! Response bodies and HTML forms

use serde::Serialize;
use xavyo_core::JourneyId;

/// A journey suspended on a provider selection.
#[derive(Debug, Serialize)]
pub struct SelectionResponse {
    pub journey_id: JourneyId,
    pub step: u32,
    pub options: Vec<SelectionOption>,
}

#[derive(Debug, Serialize)]
pub struct SelectionOption {
    pub claims_exchange: String,
    pub display_name: String,
    /// Follow to pick this provider.
    pub select_url: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub policies: usize,
}

/// SAML Response auto-submit form HTML
#[must_use]
pub fn generate_auto_submit_form(
    acs_url: &str,
    saml_response: &str,
    relay_state: Option<&str>,
) -> String {
    let relay_input = relay_state
        .map(|rs| {
            format!(
                r#"<input type="hidden" name="RelayState" value="{}"/>"#,
                html_escape(rs)
            )
        })
        .unwrap_or_default();

    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <title>Signing in</title>
</head>
<body onload="document.forms[0].submit()">
    <form method="POST" action="{}">
        <input type="hidden" name="SAMLResponse" value="{}"/>
        {}
        <noscript>
            <input type="submit" value="Continue"/>
        </noscript>
    </form>
</body>
</html>"#,
        html_escape(acs_url),
        html_escape(saml_response),
        relay_input
    )
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}
