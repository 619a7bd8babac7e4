//! Building signed SAML responses for relying parties.

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use uuid::Uuid;

use super::response::STATUS_SUCCESS;
use super::{xml_escape, NAMEID_UNSPECIFIED};
use super::xmldsig::{sign_enveloped, SigningCredentials};
use crate::error::AdapterResult;

/// Everything that goes into one response.
#[derive(Debug, Clone)]
pub struct AssertionParams<'a> {
    pub issuer: &'a str,
    pub audience: &'a str,
    /// Assertion consumer service of the relying party.
    pub destination: &'a str,
    pub in_response_to: Option<&'a str>,
    pub name_id: &'a str,
    pub name_id_format: Option<&'a str>,
    pub attributes: &'a [(String, Vec<String>)],
    pub lifetime_secs: i64,
}

pub struct ResponseBuilder<'a> {
    credentials: &'a SigningCredentials,
}

impl<'a> ResponseBuilder<'a> {
    pub fn new(credentials: &'a SigningCredentials) -> Self {
        Self { credentials }
    }

    /// The response XML with its assertion signed.
    pub fn build(&self, params: &AssertionParams<'_>) -> AdapterResult<String> {
        self.build_at(params, Utc::now())
    }

    /// Base64 of [`ResponseBuilder::build`], as posted in `SAMLResponse`.
    pub fn build_encoded(&self, params: &AssertionParams<'_>) -> AdapterResult<String> {
        self.build(params).map(|xml| STANDARD.encode(xml.as_bytes()))
    }

    /// As [`ResponseBuilder::build`], issued at `now`.
    pub fn build_at(
        &self,
        params: &AssertionParams<'_>,
        now: DateTime<Utc>,
    ) -> AdapterResult<String> {
        let assertion_id = format!("_assert_{}", Uuid::new_v4().simple());
        let xml = unsigned_response(params, &assertion_id, now);
        sign_enveloped(&xml, &assertion_id, self.credentials)
    }
}

fn ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub(crate) fn unsigned_response(
    p: &AssertionParams<'_>,
    assertion_id: &str,
    now: DateTime<Utc>,
) -> String {
    let response_id = format!("_resp_{}", Uuid::new_v4().simple());
    let issued = ts(now);
    let not_before = ts(now - Duration::minutes(2));
    let not_on_or_after = ts(now + Duration::seconds(p.lifetime_secs));
    let in_response_to = p
        .in_response_to
        .map(|id| format!(r#" InResponseTo="{}""#, xml_escape(id)))
        .unwrap_or_default();
    let issuer = xml_escape(p.issuer);
    let destination = xml_escape(p.destination);

    let mut xml = String::new();
    xml.push_str(r#"<samlp:Response xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion""#);
    xml.push_str(&format!(
        r#" ID="{response_id}" Version="2.0" IssueInstant="{issued}" Destination="{destination}"{in_response_to}>"#
    ));
    xml.push_str(&format!("<saml:Issuer>{issuer}</saml:Issuer>"));
    xml.push_str(&format!(
        r#"<samlp:Status><samlp:StatusCode Value="{STATUS_SUCCESS}"/></samlp:Status>"#
    ));
    xml.push_str(&format!(
        r#"<saml:Assertion ID="{}" Version="2.0" IssueInstant="{issued}">"#,
        xml_escape(assertion_id)
    ));
    xml.push_str(&format!("<saml:Issuer>{issuer}</saml:Issuer>"));
    xml.push_str(&format!(
        r#"<saml:Subject><saml:NameID Format="{}">{}</saml:NameID>"#,
        xml_escape(p.name_id_format.unwrap_or(NAMEID_UNSPECIFIED)),
        xml_escape(p.name_id)
    ));
    xml.push_str(&format!(
        r#"<saml:SubjectConfirmation Method="urn:oasis:names:tc:SAML:2.0:cm:bearer"><saml:SubjectConfirmationData NotOnOrAfter="{not_on_or_after}" Recipient="{destination}"{in_response_to}/></saml:SubjectConfirmation></saml:Subject>"#
    ));
    xml.push_str(&format!(
        r#"<saml:Conditions NotBefore="{not_before}" NotOnOrAfter="{not_on_or_after}"><saml:AudienceRestriction><saml:Audience>{}</saml:Audience></saml:AudienceRestriction></saml:Conditions>"#,
        xml_escape(p.audience)
    ));
    xml.push_str(&format!(
        r#"<saml:AuthnStatement AuthnInstant="{issued}" SessionIndex="_session_{}"><saml:AuthnContext><saml:AuthnContextClassRef>urn:oasis:names:tc:SAML:2.0:ac:classes:unspecified</saml:AuthnContextClassRef></saml:AuthnContext></saml:AuthnStatement>"#,
        Uuid::new_v4().simple()
    ));
    if !p.attributes.is_empty() {
        xml.push_str("<saml:AttributeStatement>");
        for (name, values) in p.attributes {
            xml.push_str(&format!(r#"<saml:Attribute Name="{}">"#, xml_escape(name)));
            for value in values {
                xml.push_str(&format!(
                    "<saml:AttributeValue>{}</saml:AttributeValue>",
                    xml_escape(value)
                ));
            }
            xml.push_str("</saml:Attribute>");
        }
        xml.push_str("</saml:AttributeStatement>");
    }
    xml.push_str("</saml:Assertion></samlp:Response>");
    xml
}
