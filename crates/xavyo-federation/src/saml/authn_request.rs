//! SAML `AuthnRequest`: building outbound requests for the HTTP-Redirect
//! binding, and parsing inbound ones from relying parties.

use std::io::{Read, Write};

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, SecondsFormat, Utc};
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use quick_xml::events::Event;
use quick_xml::Reader;
use url::Url;

use super::xml_escape;
use super::xmldsig::{sign_redirect_query, RSA_SHA256};
use crate::error::{AdapterError, AdapterResult};

/// Maximum encoded size of an inbound `SAMLRequest` (128 KB).
const MAX_ENCODED_SIZE: usize = 128 * 1024;

/// Maximum inflated size (64 KB).
const MAX_DECOMPRESSED_SIZE: u64 = 64 * 1024;

const MAX_REQUEST_ID_LENGTH: usize = 256;

/// Maximum age of an inbound request.
const MAX_REQUEST_AGE_SECS: i64 = 300;

pub(crate) struct AuthnRequestParams<'a> {
    pub id: &'a str,
    pub issue_instant: DateTime<Utc>,
    pub destination: &'a str,
    pub acs_url: &'a str,
    pub issuer: &'a str,
    pub name_id_format: &'a str,
}

pub(crate) fn build_xml(p: &AuthnRequestParams<'_>) -> String {
    format!(
        concat!(
            r#"<samlp:AuthnRequest xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" "#,
            r#"xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" "#,
            r#"ID="{id}" Version="2.0" IssueInstant="{instant}" Destination="{dest}" "#,
            r#"AssertionConsumerServiceURL="{acs}" "#,
            r#"ProtocolBinding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST">"#,
            r#"<saml:Issuer>{issuer}</saml:Issuer>"#,
            r#"<samlp:NameIDPolicy Format="{format}" AllowCreate="true"/>"#,
            r#"</samlp:AuthnRequest>"#
        ),
        id = xml_escape(p.id),
        instant = p.issue_instant.to_rfc3339_opts(SecondsFormat::Secs, true),
        dest = xml_escape(p.destination),
        acs = xml_escape(p.acs_url),
        issuer = xml_escape(p.issuer),
        format = xml_escape(p.name_id_format),
    )
}

/// DEFLATE then base64, as the HTTP-Redirect binding requires.
pub(crate) fn deflate_encode(xml: &str) -> AdapterResult<String> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(xml.as_bytes())
        .and_then(|()| encoder.finish())
        .map(|bytes| STANDARD.encode(bytes))
        .map_err(|e| AdapterError::config(format!("deflate failed: {e}")))
}

/// Redirect URL carrying the request, the relay state and, with a key, the
/// binding signature.
pub(crate) fn redirect_location(
    endpoint: &Url,
    saml_request: &str,
    relay_state: &str,
    signing_key_pem: Option<&str>,
) -> AdapterResult<String> {
    let mut query = format!(
        "SAMLRequest={}&RelayState={}",
        urlencoding::encode(saml_request),
        urlencoding::encode(relay_state)
    );
    if let Some(pem) = signing_key_pem {
        query.push_str("&SigAlg=");
        query.push_str(&urlencoding::encode(RSA_SHA256));
        let signature = sign_redirect_query(pem, &query)?;
        query.push_str("&Signature=");
        query.push_str(&urlencoding::encode(&signature));
    }

    let mut location = endpoint.to_string();
    location.push(if endpoint.query().is_some() { '&' } else { '?' });
    location.push_str(&query);
    Ok(location)
}

/// An `AuthnRequest` received from a relying party.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedAuthnRequest {
    pub id: String,
    pub issuer: String,
    pub acs_url: Option<String>,
    pub issue_instant: DateTime<Utc>,
}

/// Parses an HTTP-Redirect `SAMLRequest` (base64 of DEFLATE).
pub fn parse_redirect(encoded: &str) -> AdapterResult<ParsedAuthnRequest> {
    if encoded.len() > MAX_ENCODED_SIZE {
        return Err(AdapterError::malformed(format!(
            "SAMLRequest exceeds {MAX_ENCODED_SIZE} bytes"
        )));
    }
    let compressed = STANDARD
        .decode(encoded.trim())
        .map_err(|e| AdapterError::malformed(format!("SAMLRequest is not base64: {e}")))?;

    let mut xml = String::new();
    DeflateDecoder::new(&compressed[..])
        .take(MAX_DECOMPRESSED_SIZE)
        .read_to_string(&mut xml)
        .map_err(|e| AdapterError::malformed(format!("SAMLRequest inflate failed: {e}")))?;
    if xml.len() as u64 >= MAX_DECOMPRESSED_SIZE {
        return Err(AdapterError::malformed("SAMLRequest exceeds 64 KB inflated"));
    }
    parse_xml(&xml)
}

pub(crate) fn parse_xml(xml: &str) -> AdapterResult<ParsedAuthnRequest> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut id = None;
    let mut issuer = None;
    let mut acs_url = None;
    let mut issue_instant = None;
    let mut in_issuer = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e) | Event::Empty(e)) => match e.local_name().as_ref() {
                b"AuthnRequest" => {
                    for attr in e.attributes().flatten() {
                        let value = attr.unescape_value().unwrap_or_default().to_string();
                        match attr.key.as_ref() {
                            b"ID" => id = Some(value),
                            b"IssueInstant" => issue_instant = Some(value),
                            b"AssertionConsumerServiceURL" => acs_url = Some(value),
                            _ => {}
                        }
                    }
                }
                b"Issuer" => in_issuer = true,
                _ => {}
            },
            Ok(Event::Text(t)) if in_issuer => {
                issuer = Some(t.unescape().unwrap_or_default().trim().to_string());
            }
            Ok(Event::End(e)) if e.local_name().as_ref() == b"Issuer" => in_issuer = false,
            Ok(Event::Eof) => break,
            Err(e) => return Err(AdapterError::malformed(format!("XML parse error: {e}"))),
            _ => {}
        }
    }

    let id = id.ok_or_else(|| AdapterError::malformed("AuthnRequest has no ID"))?;
    if id.len() > MAX_REQUEST_ID_LENGTH {
        return Err(AdapterError::malformed("AuthnRequest ID is too long"));
    }
    let issuer = issuer.ok_or_else(|| AdapterError::malformed("AuthnRequest has no Issuer"))?;
    let issue_instant = issue_instant
        .ok_or_else(|| AdapterError::malformed("AuthnRequest has no IssueInstant"))
        .and_then(|raw| {
            DateTime::parse_from_rfc3339(&raw)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| AdapterError::malformed(format!("invalid IssueInstant: {e}")))
        })?;

    let age = (Utc::now() - issue_instant).num_seconds();
    if age > MAX_REQUEST_AGE_SECS || age < -MAX_REQUEST_AGE_SECS {
        return Err(AdapterError::Expired(format!(
            "AuthnRequest IssueInstant is {age}s from now"
        )));
    }

    Ok(ParsedAuthnRequest {
        id,
        issuer,
        acs_url,
        issue_instant,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(id: &str, instant: DateTime<Utc>) -> String {
        build_xml(&AuthnRequestParams {
            id,
            issue_instant: instant,
            destination: "https://idp.fabrikam.com/sso",
            acs_url: "https://login.example.com/journey/acs",
            issuer: "https://login.example.com",
            name_id_format: "urn:oasis:names:tc:SAML:1.1:nameid-format:unspecified",
        })
    }

    #[test]
    fn built_request_survives_redirect_encoding() {
        let encoded = deflate_encode(&params("_req1", Utc::now())).unwrap();
        let parsed = parse_redirect(&encoded).unwrap();
        assert_eq!(parsed.id, "_req1");
        assert_eq!(parsed.issuer, "https://login.example.com");
        assert_eq!(
            parsed.acs_url.as_deref(),
            Some("https://login.example.com/journey/acs")
        );
    }

    #[test]
    fn stale_request_is_expired() {
        let xml = params("_old", Utc::now() - chrono::Duration::seconds(900));
        assert!(matches!(parse_xml(&xml), Err(AdapterError::Expired(_))));
    }

    #[test]
    fn garbage_is_malformed() {
        assert!(matches!(
            parse_redirect("not base64!"),
            Err(AdapterError::MalformedResponse(_))
        ));
    }

    #[test]
    fn unsigned_location_keeps_existing_query() {
        let endpoint = Url::parse("https://idp.fabrikam.com/sso?tenant=1").unwrap();
        let location = redirect_location(&endpoint, "abc+/=", "tok", None).unwrap();
        assert_eq!(
            location,
            "https://idp.fabrikam.com/sso?tenant=1&SAMLRequest=abc%2B%2F%3D&RelayState=tok"
        );
    }
}
