//! OpenID Connect adapter against a mock provider.

mod common;

use std::collections::BTreeMap;

use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::json;
use url::Url;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};
use xavyo_claims::{ClaimValue, ClaimsBag};
use xavyo_federation::{
    AdapterError, Exchange, PendingState, ProtocolAdapter, RawResponse, RELAY_SEPARATOR,
};
use xavyo_policy::{ClaimsSchema, TechnicalProfile};
use xavyo_secrets::StaticSecretProvider;

use common::{context, profile, test_public_key_jwk, TEST_PRIVATE_KEY};

const KID: &str = "contoso-key-1";

fn contoso(issuer: &str) -> (ClaimsSchema, TechnicalProfile) {
    let yaml = format!(
        r#"
policy_id: B2C_1A_OidcTest
claims_schema:
  - {{ id: issuerUserId, data_type: string }}
  - {{ id: email, data_type: string }}
  - {{ id: loginHint, data_type: string }}
  - {{ id: identityProvider, data_type: string }}
claims_providers:
  - name: Contoso
    technical_profiles:
      - id: Contoso-OpenIdConnect
        protocol: OpenIdConnect
        metadata:
          issuer: "{issuer}"
          client_id: contoso-client
          scope: openid email
        keys:
          - {{ purpose: client_secret, id: B2C_1A_ContosoSecret }}
        input_claims:
          - {{ claim_type: loginHint, partner_claim: login_hint }}
        output_claims:
          - {{ claim_type: issuerUserId, partner_claim: sub }}
          - {{ claim_type: email }}
          - {{ claim_type: identityProvider, default: contoso.com }}
        retry: {{ max_attempts: 3, initial_backoff_ms: 10, max_backoff_ms: 40 }}
user_journeys:
  - id: SignIn
    steps:
      - order: 1
        type: ClaimsExchange
        claims_exchanges: [{{ id: ContosoExchange, technical_profile: Contoso-OpenIdConnect }}]
      - {{ order: 2, type: SendClaims }}
relying_party:
  default_user_journey: SignIn
  protocol: OpenIdConnect
  output_claims: [{{ claim_type: issuerUserId, partner_claim: sub }}]
"#
    );
    profile(&yaml, "B2C_1A_OidcTest", "Contoso-OpenIdConnect")
}

async fn mount_discovery(server: &MockServer) {
    let base = server.uri();
    Mock::given(method("GET"))
        .and(path("/.well-known/openid-configuration"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "issuer": base,
            "authorization_endpoint": format!("{base}/authorize"),
            "token_endpoint": format!("{base}/token"),
            "jwks_uri": format!("{base}/keys"),
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/keys"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "keys": [test_public_key_jwk(KID)]
        })))
        .mount(server)
        .await;
}

fn id_token(issuer: &str, nonce: &str, exp_offset: i64) -> String {
    let now = Utc::now().timestamp();
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(KID.to_string());
    encode(
        &header,
        &json!({
            "iss": issuer,
            "aud": "contoso-client",
            "sub": "contoso-user-7",
            "email": "ada@contoso.com",
            "nonce": nonce,
            "iat": now,
            "exp": now + exp_offset,
        }),
        &EncodingKey::from_rsa_pem(TEST_PRIVATE_KEY).unwrap(),
    )
    .unwrap()
}

fn secrets() -> StaticSecretProvider {
    StaticSecretProvider::new().with("B2C_1A_ContosoSecret", "s3cret")
}

fn callback(state: &str, code: &str) -> RawResponse {
    let params: BTreeMap<String, String> = [
        ("state".to_string(), state.to_string()),
        ("code".to_string(), code.to_string()),
    ]
    .into_iter()
    .collect();
    RawResponse::Params(params)
}

#[tokio::test]
async fn authorization_code_flow_maps_id_token_claims() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    let (schema, tp) = contoso(&server.uri());
    let ctx = context(secrets(), true);

    let mut bag = ClaimsBag::new();
    bag.set("loginHint", ClaimValue::String("ada@contoso.com".into()));
    let exchange = Exchange {
        profile: &tp,
        schema: &schema,
        bag: &bag,
    };

    let adapter = ProtocolAdapter::Oidc;
    let outbound = adapter.build_request(&exchange, &ctx).await.unwrap();
    assert!(outbound.suspends());

    let location = Url::parse(&outbound.redirect.as_ref().unwrap().location("ct-123").unwrap()).unwrap();
    assert_eq!(location.path(), "/authorize");
    let query: BTreeMap<String, String> = location.query_pairs().into_owned().collect();
    assert_eq!(query["client_id"], "contoso-client");
    assert_eq!(query["scope"], "openid email");
    assert_eq!(query["login_hint"], "ada@contoso.com");
    assert_eq!(query["code_challenge_method"], "S256");
    assert_eq!(query["redirect_uri"], "https://login.example.com/journey/callback");

    let Some(PendingState::Oidc(pending)) = outbound.pending.clone() else {
        panic!("expected OIDC pending state");
    };
    let state = &query["state"];
    assert_eq!(
        state,
        &format!("ct-123{RELAY_SEPARATOR}{}", pending.csrf)
    );
    assert_eq!(query["nonce"], pending.nonce);

    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("code=auth-code-1"))
        .and(body_string_contains("client_secret=s3cret"))
        .and(body_string_contains(format!("code_verifier={}", pending.code_verifier)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "at",
            "token_type": "Bearer",
            "id_token": id_token(&server.uri(), &pending.nonce, 300),
        })))
        .expect(1)
        .mount(&server)
        .await;

    let delta = adapter
        .parse_response(&exchange, &callback(state, "auth-code-1"), outbound.pending.as_ref(), &ctx)
        .await
        .unwrap();
    assert_eq!(delta.get("issuerUserId"), Some(&ClaimValue::String("contoso-user-7".into())));
    assert_eq!(delta.get("email"), Some(&ClaimValue::String("ada@contoso.com".into())));
    assert_eq!(delta.get("identityProvider"), Some(&ClaimValue::String("contoso.com".into())));
    assert_eq!(delta.len(), 3);
}

#[tokio::test]
async fn expired_id_token_is_reported_as_expired() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    let (schema, tp) = contoso(&server.uri());
    let ctx = context(secrets(), true);
    let bag = ClaimsBag::new();
    let exchange = Exchange {
        profile: &tp,
        schema: &schema,
        bag: &bag,
    };

    let outbound = ProtocolAdapter::Oidc.build_request(&exchange, &ctx).await.unwrap();
    let Some(PendingState::Oidc(pending)) = outbound.pending.clone() else {
        panic!("expected OIDC pending state");
    };
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id_token": id_token(&server.uri(), &pending.nonce, -3600),
        })))
        .mount(&server)
        .await;

    let state = format!("ct{RELAY_SEPARATOR}{}", pending.csrf);
    let err = ProtocolAdapter::Oidc
        .parse_response(&exchange, &callback(&state, "c"), outbound.pending.as_ref(), &ctx)
        .await
        .unwrap_err();
    assert!(matches!(err, AdapterError::Expired(_)), "got {err:?}");
}

#[tokio::test]
async fn nonce_from_another_request_is_rejected() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    let (schema, tp) = contoso(&server.uri());
    let ctx = context(secrets(), true);
    let bag = ClaimsBag::new();
    let exchange = Exchange {
        profile: &tp,
        schema: &schema,
        bag: &bag,
    };

    let outbound = ProtocolAdapter::Oidc.build_request(&exchange, &ctx).await.unwrap();
    let Some(PendingState::Oidc(pending)) = outbound.pending.clone() else {
        panic!("expected OIDC pending state");
    };
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id_token": id_token(&server.uri(), "someone-elses-nonce", 300),
        })))
        .mount(&server)
        .await;

    let state = format!("ct{RELAY_SEPARATOR}{}", pending.csrf);
    let err = ProtocolAdapter::Oidc
        .parse_response(&exchange, &callback(&state, "c"), outbound.pending.as_ref(), &ctx)
        .await
        .unwrap_err();
    assert!(matches!(err, AdapterError::MalformedResponse(_)), "got {err:?}");
}

#[tokio::test]
async fn forged_state_is_rejected_before_token_exchange() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;
    let (schema, tp) = contoso(&server.uri());
    let ctx = context(secrets(), true);
    let bag = ClaimsBag::new();
    let exchange = Exchange {
        profile: &tp,
        schema: &schema,
        bag: &bag,
    };

    let outbound = ProtocolAdapter::Oidc.build_request(&exchange, &ctx).await.unwrap();
    let state = format!("ct{RELAY_SEPARATOR}forged");
    let err = ProtocolAdapter::Oidc
        .parse_response(&exchange, &callback(&state, "c"), outbound.pending.as_ref(), &ctx)
        .await
        .unwrap_err();
    assert!(matches!(err, AdapterError::MalformedResponse(_)));
}

#[tokio::test]
async fn unreachable_discovery_is_retryable() {
    // Nothing listens on port 9 of the loopback interface.
    let (schema, tp) = contoso("http://127.0.0.1:9");
    let ctx = context(secrets(), true);
    let bag = ClaimsBag::new();
    let exchange = Exchange {
        profile: &tp,
        schema: &schema,
        bag: &bag,
    };

    let err = ProtocolAdapter::Oidc
        .build_request(&exchange, &ctx)
        .await
        .unwrap_err();
    assert!(matches!(err, AdapterError::UnreachableEndpoint { .. }), "got {err:?}");
    assert!(err.is_retryable());
}

#[tokio::test]
async fn provider_error_status_is_retryable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/.well-known/openid-configuration"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    let (schema, tp) = contoso(&server.uri());
    let ctx = context(secrets(), true);
    let bag = ClaimsBag::new();
    let exchange = Exchange {
        profile: &tp,
        schema: &schema,
        bag: &bag,
    };

    let err = ProtocolAdapter::Oidc
        .build_request(&exchange, &ctx)
        .await
        .unwrap_err();
    assert!(err.is_retryable());
}

#[tokio::test]
async fn plain_http_provider_needs_insecure_settings() {
    let (schema, tp) = contoso("http://idp.contoso.com");
    let ctx = context(secrets(), false);
    let bag = ClaimsBag::new();
    let exchange = Exchange {
        profile: &tp,
        schema: &schema,
        bag: &bag,
    };

    let err = ProtocolAdapter::Oidc
        .build_request(&exchange, &ctx)
        .await
        .unwrap_err();
    assert!(matches!(err, AdapterError::Configuration(_)));
}
