//! Tokens issued to relying parties: RS256 ID tokens and signed SAML
//! responses, plus the key publications that let callers verify them.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use openssl::pkey::PKey;
use serde_json::{Map, Value};
use thiserror::Error;
use xavyo_federation::{AdapterError, AssertionParams, ResponseBuilder, SigningCredentials};
use xavyo_journey::IssuedClaims;
use xavyo_secrets::{KeyResolver, SecretError};

use crate::models::{Jwk, JwkSet};

const SAML_PROTOCOL: &str = "urn:oasis:names:tc:SAML:2.0:protocol";
const BINDING_REDIRECT: &str = "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect";
const NAMEID_UNSPECIFIED: &str = "urn:oasis:names:tc:SAML:1.1:nameid-format:unspecified";

#[derive(Debug, Error)]
pub enum IssuerError {
    #[error("invalid signing key: {0}")]
    Key(String),

    #[error(transparent)]
    Secret(#[from] SecretError),

    #[error("failed to sign token: {0}")]
    Signing(String),

    #[error(transparent)]
    Saml(#[from] AdapterError),
}

/// What an ID token is issued for.
#[derive(Debug, Clone, Copy)]
pub struct IdTokenParams<'a> {
    pub issuer: &'a str,
    pub audience: &'a str,
    pub nonce: Option<&'a str>,
    pub lifetime_secs: i64,
}

/// Signs everything the gateway hands to relying parties with one RSA key.
pub struct TokenIssuer {
    kid: String,
    encoding_key: EncodingKey,
    jwk: Jwk,
    credentials: SigningCredentials,
}

impl std::fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("kid", &self.kid)
            .finish_non_exhaustive()
    }
}

impl TokenIssuer {
    /// Builds an issuer from a PEM private key and the certificate published
    /// for it.
    pub fn from_pem(
        kid: impl Into<String>,
        private_key_pem: &str,
        certificate_pem: &str,
    ) -> Result<Self, IssuerError> {
        let kid = kid.into();
        let encoding_key = EncodingKey::from_rsa_pem(private_key_pem.as_bytes())
            .map_err(|e| IssuerError::Key(e.to_string()))?;
        let jwk = jwk_from_pem(private_key_pem, &kid)?;
        let credentials = SigningCredentials::from_pem(private_key_pem, certificate_pem)?;
        Ok(Self {
            kid,
            encoding_key,
            jwk,
            credentials,
        })
    }

    /// Resolves the signing key and its certificate by key id.
    ///
    /// The key id doubles as the JWK `kid`.
    pub async fn from_resolver(
        keys: &dyn KeyResolver,
        signing_key_id: &str,
        certificate_id: &str,
    ) -> Result<Self, IssuerError> {
        let key = keys.resolve_key(signing_key_id).await?;
        let certificate = keys.resolve_key(certificate_id).await?;
        Self::from_pem(
            signing_key_id,
            key.private_key_pem()?,
            certificate.certificate_pem()?,
        )
    }

    #[must_use]
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// OIDC issuer of a policy: `{base}/{policy}/v2.0/`.
    #[must_use]
    pub fn oidc_issuer(base_url: &str, policy_id: &str) -> String {
        format!("{}/{policy_id}/v2.0/", base_url.trim_end_matches('/'))
    }

    /// SAML entity id of a policy acting as identity provider.
    #[must_use]
    pub fn saml_entity_id(base_url: &str, policy_id: &str) -> String {
        format!("{}/{policy_id}", base_url.trim_end_matches('/'))
    }

    pub fn id_token(
        &self,
        params: &IdTokenParams<'_>,
        issued: &IssuedClaims,
    ) -> Result<String, IssuerError> {
        let now = Utc::now().timestamp();
        let mut claims: Map<String, Value> = issued.to_json();
        claims.insert("iss".into(), Value::from(params.issuer));
        claims.insert("aud".into(), Value::from(params.audience));
        claims.insert("sub".into(), Value::from(issued.subject.as_str()));
        claims.insert("iat".into(), Value::from(now));
        claims.insert("nbf".into(), Value::from(now));
        claims.insert("exp".into(), Value::from(now + params.lifetime_secs));
        if let Some(nonce) = params.nonce {
            claims.insert("nonce".into(), Value::from(nonce));
        }

        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(self.kid.clone());
        encode(&header, &Value::Object(claims), &self.encoding_key)
            .map_err(|e| IssuerError::Signing(e.to_string()))
    }

    /// Base64 `SAMLResponse` with a signed assertion carrying every issued
    /// claim as an attribute.
    pub fn saml_response(
        &self,
        issuer: &str,
        audience: &str,
        destination: &str,
        in_response_to: Option<&str>,
        issued: &IssuedClaims,
        lifetime_secs: i64,
    ) -> Result<String, IssuerError> {
        let attributes: Vec<(String, Vec<String>)> = issued
            .claims
            .iter()
            .map(|(name, value)| (name.clone(), vec![value.to_claim_string()]))
            .collect();
        let params = AssertionParams {
            issuer,
            audience,
            destination,
            in_response_to,
            name_id: &issued.subject,
            name_id_format: None,
            attributes: &attributes,
            lifetime_secs,
        };
        Ok(ResponseBuilder::new(&self.credentials).build_encoded(&params)?)
    }

    #[must_use]
    pub fn jwks(&self) -> JwkSet {
        JwkSet::new().add_key(self.jwk.clone())
    }

    /// Identity provider metadata for `entity_id` with its SSO endpoint.
    pub fn saml_metadata(&self, entity_id: &str, sso_url: &str) -> Result<String, IssuerError> {
        let certificate = self.credentials.certificate_base64_der()?;
        Ok(format!(
            concat!(
                r#"<?xml version="1.0" encoding="UTF-8"?>"#,
                r#"<md:EntityDescriptor xmlns:md="urn:oasis:names:tc:SAML:2.0:metadata" "#,
                r#"xmlns:ds="http://www.w3.org/2000/09/xmldsig#" entityID="{entity_id}">"#,
                r#"<md:IDPSSODescriptor WantAuthnRequestsSigned="false" protocolSupportEnumeration="{protocol}">"#,
                r#"<md:KeyDescriptor use="signing"><ds:KeyInfo><ds:X509Data>"#,
                r#"<ds:X509Certificate>{certificate}</ds:X509Certificate>"#,
                r#"</ds:X509Data></ds:KeyInfo></md:KeyDescriptor>"#,
                r#"<md:NameIDFormat>{name_id_format}</md:NameIDFormat>"#,
                r#"<md:SingleSignOnService Binding="{binding}" Location="{sso_url}"/>"#,
                r#"</md:IDPSSODescriptor>"#,
                r#"</md:EntityDescriptor>"#
            ),
            entity_id = xml_attr(entity_id),
            protocol = SAML_PROTOCOL,
            certificate = certificate,
            name_id_format = NAMEID_UNSPECIFIED,
            binding = BINDING_REDIRECT,
            sso_url = xml_attr(sso_url),
        ))
    }
}

fn jwk_from_pem(private_key_pem: &str, kid: &str) -> Result<Jwk, IssuerError> {
    let rsa = PKey::private_key_from_pem(private_key_pem.as_bytes())
        .and_then(|key| key.rsa())
        .map_err(|e| IssuerError::Key(format!("not an RSA private key: {e}")))?;
    Ok(Jwk {
        kty: "RSA".to_string(),
        kid: kid.to_string(),
        key_use: "sig".to_string(),
        alg: "RS256".to_string(),
        n: URL_SAFE_NO_PAD.encode(rsa.n().to_vec()),
        e: URL_SAFE_NO_PAD.encode(rsa.e().to_vec()),
    })
}

fn xml_attr(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
