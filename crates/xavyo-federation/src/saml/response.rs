//! Reading a SAML `Response` into the fields the adapter checks.

use chrono::{DateTime, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::c14n;
use crate::error::{AdapterError, AdapterResult};

pub const STATUS_SUCCESS: &str = "urn:oasis:names:tc:SAML:2.0:status:Success";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedResponse {
    pub id: String,
    pub in_response_to: Option<String>,
    pub issuer: Option<String>,
    /// Top-level status code.
    pub status: Option<String>,
    pub assertions: Vec<ParsedAssertion>,
    /// `EncryptedAssertion` elements are counted but not decrypted.
    pub encrypted_assertions: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedAssertion {
    pub id: String,
    pub issuer: Option<String>,
    pub name_id: Option<String>,
    pub subject_in_response_to: Option<String>,
    pub subject_not_on_or_after: Option<DateTime<Utc>>,
    pub recipient: Option<String>,
    pub not_before: Option<DateTime<Utc>>,
    pub not_on_or_after: Option<DateTime<Utc>>,
    pub audiences: Vec<String>,
    /// Attribute name and its values, in document order.
    pub attributes: Vec<(String, Vec<String>)>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Capture {
    ResponseIssuer,
    AssertionIssuer,
    NameId,
    Audience,
    AttributeValue,
}

fn attr(e: &BytesStart<'_>, name: &str) -> AdapterResult<Option<String>> {
    c14n::attribute(e, name).map_err(|err| AdapterError::malformed(err.to_string()))
}

fn instant(e: &BytesStart<'_>, name: &str) -> AdapterResult<Option<DateTime<Utc>>> {
    attr(e, name)?
        .map(|raw| {
            DateTime::parse_from_rfc3339(&raw)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|err| AdapterError::malformed(format!("invalid {name} '{raw}': {err}")))
        })
        .transpose()
}

pub fn parse(xml: &str) -> AdapterResult<ParsedResponse> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut response: Option<ParsedResponse> = None;
    let mut assertion: Option<ParsedAssertion> = None;
    let mut depth = 0usize;
    let mut status_depth: Option<usize> = None;
    let mut capture: Option<Capture> = None;
    let mut text = String::new();

    loop {
        let event = reader
            .read_event()
            .map_err(|e| AdapterError::malformed(format!("XML parse error: {e}")))?;
        match event {
            Event::Start(ref e) | Event::Empty(ref e) => {
                let is_empty = matches!(event, Event::Empty(_));
                depth += 1;
                let local = e.local_name();
                match local.as_ref() {
                    b"Response" if response.is_none() => {
                        response = Some(ParsedResponse {
                            id: attr(e, "ID")?
                                .ok_or_else(|| AdapterError::malformed("Response has no ID"))?,
                            in_response_to: attr(e, "InResponseTo")?,
                            ..ParsedResponse::default()
                        });
                    }
                    b"Status" if assertion.is_none() => status_depth = Some(depth),
                    b"StatusCode" if status_depth == Some(depth - 1) => {
                        if let Some(r) = response.as_mut() {
                            r.status = attr(e, "Value")?;
                        }
                    }
                    b"EncryptedAssertion" => {
                        if let Some(r) = response.as_mut() {
                            r.encrypted_assertions += 1;
                        }
                    }
                    b"Assertion" => {
                        if assertion.is_some() {
                            return Err(AdapterError::malformed("nested Assertion"));
                        }
                        assertion = Some(ParsedAssertion {
                            id: attr(e, "ID")?
                                .ok_or_else(|| AdapterError::malformed("Assertion has no ID"))?,
                            ..ParsedAssertion::default()
                        });
                    }
                    b"Issuer" => {
                        capture = Some(if assertion.is_some() {
                            Capture::AssertionIssuer
                        } else {
                            Capture::ResponseIssuer
                        });
                    }
                    b"NameID" if assertion.is_some() => capture = Some(Capture::NameId),
                    b"SubjectConfirmationData" => {
                        if let Some(a) = assertion.as_mut() {
                            a.subject_in_response_to = attr(e, "InResponseTo")?;
                            a.subject_not_on_or_after = instant(e, "NotOnOrAfter")?;
                            a.recipient = attr(e, "Recipient")?;
                        }
                    }
                    b"Conditions" => {
                        if let Some(a) = assertion.as_mut() {
                            a.not_before = instant(e, "NotBefore")?;
                            a.not_on_or_after = instant(e, "NotOnOrAfter")?;
                        }
                    }
                    b"Audience" => capture = Some(Capture::Audience),
                    b"Attribute" => {
                        if let Some(a) = assertion.as_mut() {
                            let name = attr(e, "Name")?
                                .ok_or_else(|| AdapterError::malformed("Attribute has no Name"))?;
                            a.attributes.push((name, Vec::new()));
                        }
                    }
                    b"AttributeValue" => capture = Some(Capture::AttributeValue),
                    _ => {}
                }
                text.clear();
                if is_empty {
                    if capture == Some(Capture::AttributeValue) {
                        if let Some((_, values)) =
                            assertion.as_mut().and_then(|a| a.attributes.last_mut())
                        {
                            values.push(String::new());
                        }
                    }
                    capture = None;
                    depth -= 1;
                }
            }
            Event::Text(ref t) => {
                if capture.is_some() {
                    let unescaped = t
                        .unescape()
                        .map_err(|e| AdapterError::malformed(format!("invalid text: {e}")))?;
                    text.push_str(&unescaped);
                }
            }
            Event::CData(ref c) => {
                if capture.is_some() {
                    text.push_str(&String::from_utf8_lossy(c.as_ref()));
                }
            }
            Event::End(ref e) => {
                if let Some(kind) = capture.take() {
                    let value = text.trim().to_string();
                    match (kind, response.as_mut(), assertion.as_mut()) {
                        (Capture::ResponseIssuer, Some(r), _) => r.issuer = Some(value),
                        (Capture::AssertionIssuer, _, Some(a)) => a.issuer = Some(value),
                        (Capture::NameId, _, Some(a)) => a.name_id = Some(value),
                        (Capture::Audience, _, Some(a)) => a.audiences.push(value),
                        (Capture::AttributeValue, _, Some(a)) => {
                            if let Some((_, values)) = a.attributes.last_mut() {
                                values.push(value);
                            }
                        }
                        _ => {}
                    }
                }
                match e.local_name().as_ref() {
                    b"Assertion" => {
                        if let (Some(r), Some(a)) = (response.as_mut(), assertion.take()) {
                            r.assertions.push(a);
                        }
                    }
                    b"Status" if status_depth == Some(depth) => status_depth = None,
                    _ => {}
                }
                depth = depth.saturating_sub(1);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    response.ok_or_else(|| AdapterError::malformed("document is not a SAML Response"))
}

impl ParsedAssertion {
    /// Partner claims: `nameid`, then every attribute under its full name and
    /// under the last segment of a URI-style name. Multi-valued attributes
    /// become arrays.
    pub fn partner_claims(&self) -> std::collections::BTreeMap<String, serde_json::Value> {
        use serde_json::Value;

        let mut claims = std::collections::BTreeMap::new();
        if let Some(name_id) = &self.name_id {
            claims.insert("nameid".to_string(), Value::String(name_id.clone()));
        }
        for (name, values) in &self.attributes {
            let value = match values.as_slice() {
                [single] => Value::String(single.clone()),
                many => Value::Array(many.iter().cloned().map(Value::String).collect()),
            };
            if let Some(short) = short_name(name) {
                claims.entry(short.to_string()).or_insert_with(|| value.clone());
            }
            claims.insert(name.clone(), value);
        }
        claims
    }
}

/// `http://schemas.xmlsoap.org/ws/2005/05/identity/claims/emailaddress` →
/// `emailaddress`; `urn:oid:0.9.2342.19200300.100.1.3` → `0.9.2342.19200300.100.1.3`.
fn short_name(name: &str) -> Option<&str> {
    if !name.contains("://") && !name.starts_with("urn:") {
        return None;
    }
    name.trim_end_matches('/')
        .rsplit(['/', ':', '#'])
        .next()
        .filter(|s| !s.is_empty() && *s != name)
}
