//! Fixtures for the gateway router tests.
#![allow(dead_code)]

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, Response};
use axum::Router;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{SecondsFormat, Utc};
use flate2::write::DeflateEncoder;
use flate2::Compression;
use openssl::asn1::Asn1Time;
use openssl::hash::MessageDigest;
use openssl::pkey::PKey;
use openssl::rsa::Rsa;
use openssl::x509::{X509NameBuilder, X509};
use std::io::Write;
use tower::ServiceExt;
use xavyo_api_journey::{journey_router, GatewaySettings, JourneyApiState, TokenIssuer};
use xavyo_federation::{AdapterContext, AdapterSettings};
use xavyo_journey::{ContinuityService, JourneyEngine, DEFAULT_TTL_SECS};
use xavyo_policy::{PolicyDocument, PolicyStore};
use xavyo_secrets::{SecretKeyResolver, StaticSecretProvider};

pub const BASE_URL: &str = "https://login.example.com";
pub const OIDC_POLICY: &str = "B2C_1A_SignIn";
pub const SAML_POLICY: &str = "B2C_1A_SamlSignIn";
pub const CLIENT_ID: &str = "webapp";
pub const REDIRECT_URI: &str = "https://app.example.com/cb";
pub const SP_ENTITY_ID: &str = "https://sp.example.com";
pub const SP_ACS: &str = "https://sp.example.com/acs";
pub const MASTER_KEY: &[u8] = b"gateway-tests-master-key-32-bytes!!";

/// Local accounts or an unreachable Contoso, picked at a selection step.
const OIDC_POLICY_YAML: &str = r"
policy_id: B2C_1A_SignIn
claims_schema:
  - { id: objectId, data_type: string }
  - { id: loginHint, data_type: string }
claims_transformations:
  - id: CreateObjectId
    kind: CreateRandomString
    input_parameters: { randomGeneratorType: GUID }
    output_claims: [{ claim_type: objectId, parameter_name: outputClaim }]
claims_providers:
  - name: Local
    display_name: Local accounts
    technical_profiles:
      - id: Local-Profile
        protocol: Proprietary
        input_claims_transformations: [CreateObjectId]
        output_claims: [{ claim_type: objectId }]
        session_management: SM-Local
      - id: SM-Local
        protocol: Proprietary
        output_claims: [{ claim_type: objectId }]
  - name: Contoso
    display_name: Contoso
    technical_profiles:
      - id: Contoso-OpenIdConnect
        protocol: OpenIdConnect
        metadata:
          issuer: 'http://127.0.0.1:9'
          client_id: contoso-client
        keys:
          - { purpose: client_secret, id: B2C_1A_ContosoSecret }
        output_claims: [{ claim_type: objectId, partner_claim: sub }]
        retry: { max_attempts: 1 }
user_journeys:
  - id: SignIn
    steps:
      - order: 1
        type: ClaimsProviderSelection
        selections: [LocalExchange, ContosoExchange]
      - order: 2
        type: ClaimsExchange
        claims_exchanges:
          - { id: LocalExchange, technical_profile: Local-Profile }
          - { id: ContosoExchange, technical_profile: Contoso-OpenIdConnect }
      - { order: 3, type: SendClaims }
relying_party:
  default_user_journey: SignIn
  protocol: OpenIdConnect
  input_claims:
    - { claim_type: loginHint, partner_claim: login_hint }
  output_claims:
    - { claim_type: objectId, partner_claim: sub }
    - { claim_type: loginHint, partner_claim: login_hint }
  token_lifetime_secs: 600
  clients:
    - { client_id: webapp, redirect_uris: ['https://app.example.com/cb'] }
";

const SAML_POLICY_YAML: &str = r"
policy_id: B2C_1A_SamlSignIn
claims_schema:
  - { id: objectId, data_type: string }
claims_transformations:
  - id: CreateObjectId
    kind: CreateRandomString
    input_parameters: { randomGeneratorType: GUID }
    output_claims: [{ claim_type: objectId, parameter_name: outputClaim }]
claims_providers:
  - name: Local
    technical_profiles:
      - id: Local-Profile
        protocol: Proprietary
        input_claims_transformations: [CreateObjectId]
        output_claims: [{ claim_type: objectId }]
user_journeys:
  - id: SignIn
    steps:
      - order: 1
        type: ClaimsExchange
        claims_exchanges: [{ id: LocalExchange, technical_profile: Local-Profile }]
      - { order: 2, type: SendClaims }
relying_party:
  default_user_journey: SignIn
  protocol: SAML2
  output_claims:
    - { claim_type: objectId }
  clients:
    - { client_id: 'https://sp.example.com', redirect_uris: ['https://sp.example.com/acs'] }
";

/// Freshly generated key and self-signed certificate, both PEM.
pub fn self_signed(cn: &str) -> (String, String) {
    let key = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();
    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_text("CN", cn).unwrap();
    let name = name.build();
    let mut builder = X509::builder().unwrap();
    builder.set_version(2).unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder.set_pubkey(&key).unwrap();
    builder
        .set_not_before(&Asn1Time::days_from_now(0).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::days_from_now(30).unwrap())
        .unwrap();
    builder.sign(&key, MessageDigest::sha256()).unwrap();
    (
        String::from_utf8(key.private_key_to_pem_pkcs8().unwrap()).unwrap(),
        String::from_utf8(builder.build().to_pem().unwrap()).unwrap(),
    )
}

pub struct Gateway {
    pub router: Router,
    pub state: JourneyApiState,
    /// Certificate of the issuing key.
    pub certificate: String,
}

pub fn gateway() -> Gateway {
    gateway_with_ttl(DEFAULT_TTL_SECS)
}

/// Gateway whose journeys expire `ttl_secs` after they start.
pub fn gateway_with_ttl(ttl_secs: i64) -> Gateway {
    let graph = PolicyStore::load(vec![
        PolicyDocument::from_yaml(OIDC_POLICY_YAML).unwrap(),
        PolicyDocument::from_yaml(SAML_POLICY_YAML).unwrap(),
    ])
    .unwrap();
    let secrets = StaticSecretProvider::new().with("B2C_1A_ContosoSecret", "s3cret");
    let adapters = AdapterContext::new(
        AdapterSettings::new(BASE_URL).allow_insecure(true),
        Arc::new(SecretKeyResolver::new(Arc::new(secrets))),
    )
    .unwrap();
    let (key, certificate) = self_signed("journey-gateway");
    let state = JourneyApiState::new(
        JourneyEngine::new(Arc::new(graph), adapters),
        Arc::new(ContinuityService::new(MASTER_KEY, ttl_secs).unwrap()),
        Arc::new(TokenIssuer::from_pem("gateway-sig-1", &key, &certificate).unwrap()),
        GatewaySettings {
            secure_cookies: false,
            ..GatewaySettings::default()
        },
    );
    Gateway {
        router: journey_router(state.clone()),
        state,
        certificate,
    }
}

pub async fn get(router: &Router, uri: &str, cookie: Option<&str>) -> Response<Body> {
    let mut request = Request::builder().uri(uri);
    if let Some(cookie) = cookie {
        request = request.header(header::COOKIE, cookie);
    }
    router
        .clone()
        .oneshot(request.body(Body::empty()).unwrap())
        .await
        .unwrap()
}

pub async fn post_form(router: &Router, uri: &str, form: &str) -> Response<Body> {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(form.to_string()))
        .unwrap();
    router.clone().oneshot(request).await.unwrap()
}

pub async fn body_string(response: Response<Body>) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_str(&body_string(response).await).unwrap()
}

pub fn location(response: &Response<Body>) -> String {
    response
        .headers()
        .get(header::LOCATION)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string()
}

/// Path and query of an absolute URL under `BASE_URL`.
pub fn local_path(url: &str) -> String {
    url.strip_prefix(BASE_URL).unwrap().to_string()
}

pub fn authorize_uri(query: &str) -> String {
    format!("/{OIDC_POLICY}/oauth2/v2.0/authorize?{query}")
}

pub fn default_authorize_uri() -> String {
    authorize_uri(
        "client_id=webapp&redirect_uri=https%3A%2F%2Fapp.example.com%2Fcb\
         &response_type=id_token&state=rp-state&nonce=rp-nonce&login_hint=ada%40example.com",
    )
}

/// HTTP-Redirect encoded `AuthnRequest` from the test service provider.
pub fn authn_request(id: &str, acs_url: &str) -> String {
    let xml = format!(
        concat!(
            r#"<samlp:AuthnRequest xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" "#,
            r#"xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" "#,
            r#"ID="{id}" Version="2.0" IssueInstant="{instant}" "#,
            r#"AssertionConsumerServiceURL="{acs}">"#,
            r#"<saml:Issuer>{issuer}</saml:Issuer>"#,
            r#"</samlp:AuthnRequest>"#
        ),
        id = id,
        instant = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        acs = acs_url,
        issuer = SP_ENTITY_ID,
    );
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(xml.as_bytes()).unwrap();
    STANDARD.encode(encoder.finish().unwrap())
}
