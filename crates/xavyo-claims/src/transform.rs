//! Built-in claims transformations.
//!
//! Each transformation is a pure function of the claims named by its input
//! claims, its input parameters and the journey seed. It never sees the rest
//! of the bag and performs no I/O, so running it twice on an unchanged bag
//! yields the same delta.

use crate::bag::{ClaimsBag, ClaimsDelta};
use crate::error::TransformationError;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::{debug, error, instrument};
use xavyo_policy::{
    ClaimDataType, ClaimValue, ClaimsSchema, ClaimsTransformation, ResolvedPolicy,
    TransformationKind,
};

type HmacSha256 = Hmac<Sha256>;

/// Inputs a transformation may consult besides its claims.
#[derive(Debug, Clone, Copy)]
pub struct TransformContext<'a> {
    /// Per-journey secret keying `CreateRandomString`, so its output is
    /// stable within a journey and unpredictable outside it.
    pub seed: &'a [u8],
    pub schema: &'a ClaimsSchema,
}

/// Runs one transformation over `inputs`, which must already be restricted
/// to its declared input claims.
pub fn apply(
    t: &ClaimsTransformation,
    inputs: &ClaimsBag,
    ctx: TransformContext<'_>,
) -> Result<ClaimsDelta, TransformationError> {
    let Some(output) = t.output() else {
        return Err(invalid(t, "exactly one output claim is required"));
    };

    let raw = match &t.kind {
        TransformationKind::CreateRandomString => Some(random_string(t, ctx.seed)?),
        TransformationKind::CreateStringClaim => Some(param(t, "value")?.to_string()),
        TransformationKind::FormatStringClaim | TransformationKind::FormatStringMultipleClaims => {
            required_inputs(t, inputs)
                .map(|values| param(t, "stringFormat").map(|f| format_string(f, &values)))
                .transpose()?
        }
        TransformationKind::StringConcat => {
            let present: Vec<String> = t
                .input_claims
                .iter()
                .filter_map(|c| inputs.get(&c.claim_type))
                .map(ClaimValue::to_claim_string)
                .collect();
            if present.is_empty() {
                None
            } else {
                Some(present.join(t.parameter("separator").unwrap_or_default()))
            }
        }
        TransformationKind::CreateAlternativeSecurityId => {
            match (named_input(t, inputs, "key"), named_input(t, inputs, "identityProvider")) {
                (Some(key), Some(idp)) => Some(alternative_security_id(&key, &idp)),
                _ => None,
            }
        }
        TransformationKind::CompareClaimToValue => {
            return compare_claim_to_value(t, inputs, output);
        }
        TransformationKind::ChangeCase => match named_input(t, inputs, "inputClaim") {
            Some(value) => Some(match param(t, "toCase")? {
                "UPPER" => value.to_uppercase(),
                _ => value.to_lowercase(),
            }),
            None => None,
        },
        TransformationKind::Unknown(kind) => {
            return Err(invalid(t, format!("unsupported kind '{kind}'")));
        }
    };

    let Some(raw) = raw else {
        debug!(
            transformation = %t.id,
            "Input claims missing, transformation produced no claims"
        );
        return Ok(ClaimsDelta::new());
    };

    let data_type = ctx
        .schema
        .get(output)
        .map_or(ClaimDataType::String, |c| c.data_type);
    let value = ClaimValue::coerce(&raw, data_type).map_err(|e| invalid(t, e.to_string()))?;
    Ok(ClaimsDelta::new().with(output, value))
}

/// Runs the transformations named by `ids` in order, merging each delta
/// into `bag` before the next one runs.
#[instrument(skip(bag, policy, seed), fields(policy_id = %policy.policy_id()))]
pub fn run_pipeline(
    ids: &[String],
    bag: &mut ClaimsBag,
    policy: &ResolvedPolicy,
    seed: &[u8],
) -> Result<(), TransformationError> {
    let ctx = TransformContext {
        seed,
        schema: policy.claims_schema(),
    };

    for id in ids {
        let t = policy
            .transformation(id)
            .ok_or_else(|| TransformationError::MissingTransformation { id: id.clone() })?;
        let inputs = bag.subset(t.input_claims.iter().map(|c| c.claim_type.as_str()));

        let delta = apply(t, &inputs, ctx).and_then(|delta| {
            let written = delta.len();
            bag.apply(delta, ctx.schema).map(|()| written)
        });
        match delta {
            Ok(written) => debug!(transformation = %id, written, "Claims transformation applied"),
            Err(e) => {
                error!(transformation = %id, error = %e, "Claims transformation invariant violated");
                return Err(e);
            }
        }
    }
    Ok(())
}

fn invalid(t: &ClaimsTransformation, reason: impl Into<String>) -> TransformationError {
    TransformationError::InvalidParameter {
        id: t.id.clone(),
        reason: reason.into(),
    }
}

fn param<'t>(t: &'t ClaimsTransformation, name: &str) -> Result<&'t str, TransformationError> {
    t.parameter(name)
        .ok_or_else(|| invalid(t, format!("missing input parameter '{name}'")))
}

fn named_input(t: &ClaimsTransformation, inputs: &ClaimsBag, name: &str) -> Option<String> {
    t.input(name)
        .and_then(|claim| inputs.get(claim))
        .map(ClaimValue::to_claim_string)
}

/// String forms of every declared input, in declaration order, or `None`
/// if any is missing.
fn required_inputs(t: &ClaimsTransformation, inputs: &ClaimsBag) -> Option<Vec<String>> {
    t.input_claims
        .iter()
        .map(|c| inputs.get(&c.claim_type).map(ClaimValue::to_claim_string))
        .collect()
}

/// Replaces `{0}`, `{1}`, ... with the corresponding value.
fn format_string(format: &str, values: &[String]) -> String {
    let mut out = format.to_string();
    for (i, value) in values.iter().enumerate() {
        out = out.replace(&format!("{{{i}}}"), value);
    }
    out
}

fn seeded_bytes(seed: &[u8], label: &str) -> Result<[u8; 32], TransformationError> {
    let mut mac = HmacSha256::new_from_slice(seed).map_err(|e| {
        TransformationError::InvalidParameter {
            id: label.to_string(),
            reason: e.to_string(),
        }
    })?;
    mac.update(label.as_bytes());
    let mut out = [0u8; 32];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

/// Largest draw count `uniform_below` makes before giving up.
const MAX_DRAW_ROUNDS: u32 = 16;

/// Whether `x` lies below the largest multiple of `max` that fits in 2^64,
/// so `x % max` is uniform.
fn accepts(x: u64, max: u64) -> bool {
    let rem = (u64::MAX % max + 1) % max;
    rem == 0 || x < 0u64.wrapping_sub(rem)
}

/// Uniform integer in `0..max` by rejection sampling over seeded bytes.
fn uniform_below(
    t: &ClaimsTransformation,
    seed: &[u8],
    max: u64,
) -> Result<u64, TransformationError> {
    for round in 0..MAX_DRAW_ROUNDS {
        let label = if round == 0 {
            t.id.clone()
        } else {
            format!("{}#{round}", t.id)
        };
        let bytes = seeded_bytes(seed, &label)?;
        for chunk in bytes.chunks_exact(8) {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(chunk);
            let x = u64::from_be_bytes(raw);
            if accepts(x, max) {
                return Ok(x % max);
            }
        }
    }
    Err(invalid(t, "no unbiased draw below maximumNumber"))
}

fn random_string(t: &ClaimsTransformation, seed: &[u8]) -> Result<String, TransformationError> {
    let value = match param(t, "randomGeneratorType")? {
        "GUID" => {
            let bytes = seeded_bytes(seed, &t.id)?;
            let mut raw = [0u8; 16];
            raw.copy_from_slice(&bytes[..16]);
            uuid::Builder::from_random_bytes(raw).into_uuid().to_string()
        }
        // maximumNumber is exclusive.
        "INTEGER" => {
            let max = t
                .parameter("maximumNumber")
                .and_then(|m| m.parse::<u64>().ok())
                .filter(|m| *m > 0)
                .unwrap_or(i64::MAX as u64);
            uniform_below(t, seed, max)?.to_string()
        }
        other => return Err(invalid(t, format!("unsupported randomGeneratorType '{other}'"))),
    };

    match t.parameter("stringFormat") {
        Some(format) => Ok(format_string(format, &[value])),
        None => Ok(value),
    }
}

/// Stable subject identifier for an external account: base64 of
/// `{"issuer": <idp>, "issuerUserId": <base64 key>}`.
fn alternative_security_id(key: &str, identity_provider: &str) -> String {
    let body = serde_json::json!({
        "issuer": identity_provider,
        "issuerUserId": BASE64.encode(key.as_bytes()),
    });
    BASE64.encode(body.to_string().as_bytes())
}

fn compare_claim_to_value(
    t: &ClaimsTransformation,
    inputs: &ClaimsBag,
    output: &str,
) -> Result<ClaimsDelta, TransformationError> {
    let Some(value) = named_input(t, inputs, "inputClaim") else {
        debug!(transformation = %t.id, "Input claim missing, comparison skipped");
        return Ok(ClaimsDelta::new());
    };
    let compare_to = param(t, "compareTo")?;
    let ignore_case = t
        .parameter("ignoreCase")
        .is_some_and(|v| v.eq_ignore_ascii_case("true"));

    let equal = if ignore_case {
        value.to_lowercase() == compare_to.to_lowercase()
    } else {
        value == compare_to
    };
    let result = match param(t, "operator")? {
        "equal" => equal,
        "not equal" => !equal,
        other => return Err(invalid(t, format!("unsupported operator '{other}'"))),
    };
    Ok(ClaimsDelta::new().with(output, ClaimValue::Boolean(result)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use xavyo_policy::{PolicyDocument, PolicyStore};

    const POLICY: &str = r#"
policy_id: p
claims_schema:
  - { id: objectId, data_type: string }
  - { id: otp, data_type: int }
  - { id: givenName, data_type: string }
  - { id: surname, data_type: string }
  - { id: displayName, data_type: string }
  - { id: email, data_type: string }
  - { id: issuerUserId, data_type: string }
  - { id: identityProvider, data_type: string }
  - { id: alternativeSecurityId, data_type: string }
  - { id: isContoso, data_type: boolean }
  - { id: greeting, data_type: string }
claims_transformations:
  - id: NewObjectId
    kind: CreateRandomString
    input_parameters: { randomGeneratorType: GUID }
    output_claims: [{ claim_type: objectId, parameter_name: outputClaim }]
  - id: NewOtp
    kind: CreateRandomString
    input_parameters: { randomGeneratorType: INTEGER, maximumNumber: "1000000" }
    output_claims: [{ claim_type: otp, parameter_name: outputClaim }]
  - id: DisplayName
    kind: FormatStringMultipleClaims
    input_claims:
      - { claim_type: givenName, parameter_name: inputClaim1 }
      - { claim_type: surname, parameter_name: inputClaim2 }
    input_parameters: { stringFormat: "{0} {1}" }
    output_claims: [{ claim_type: displayName, parameter_name: outputClaim }]
  - id: Greeting
    kind: FormatStringClaim
    input_claims: [{ claim_type: givenName, parameter_name: inputClaim }]
    input_parameters: { stringFormat: "Hello {0}!" }
    output_claims: [{ claim_type: greeting, parameter_name: outputClaim }]
  - id: JoinNames
    kind: StringConcat
    input_claims:
      - { claim_type: givenName, parameter_name: inputClaim1 }
      - { claim_type: surname, parameter_name: inputClaim2 }
    input_parameters: { separator: "." }
    output_claims: [{ claim_type: displayName, parameter_name: outputClaim }]
  - id: AltSecId
    kind: CreateAlternativeSecurityId
    input_claims:
      - { claim_type: issuerUserId, parameter_name: key }
      - { claim_type: identityProvider, parameter_name: identityProvider }
    output_claims: [{ claim_type: alternativeSecurityId, parameter_name: alternativeSecurityId }]
  - id: IsContoso
    kind: CompareClaimToValue
    input_claims: [{ claim_type: identityProvider, parameter_name: inputClaim }]
    input_parameters: { compareTo: CONTOSO.COM, operator: equal, ignoreCase: "true" }
    output_claims: [{ claim_type: isContoso, parameter_name: outputClaim }]
  - id: LowerEmail
    kind: ChangeCase
    input_claims: [{ claim_type: email, parameter_name: inputClaim }]
    input_parameters: { toCase: LOWER }
    output_claims: [{ claim_type: email, parameter_name: outputClaim }]
  - id: Fixed
    kind: CreateStringClaim
    input_parameters: { value: fixed }
    output_claims: [{ claim_type: greeting, parameter_name: outputClaim }]
user_journeys:
  - id: J
    steps: [{ order: 1, type: SendClaims }]
relying_party: { default_user_journey: J, protocol: OpenIdConnect }
"#;

    fn policy() -> ResolvedPolicy {
        let doc = PolicyDocument::from_yaml(POLICY).unwrap();
        PolicyStore::load(vec![doc]).unwrap().policy("p").unwrap().clone()
    }

    fn s(v: &str) -> ClaimValue {
        ClaimValue::String(v.to_string())
    }

    fn run(policy: &ResolvedPolicy, id: &str, bag: &ClaimsBag, seed: &[u8]) -> ClaimsDelta {
        let t = policy.transformation(id).unwrap();
        let inputs = bag.subset(t.input_claims.iter().map(|c| c.claim_type.as_str()));
        apply(
            t,
            &inputs,
            TransformContext {
                seed,
                schema: policy.claims_schema(),
            },
        )
        .unwrap()
    }

    #[test]
    fn random_guid_is_seeded() {
        let policy = policy();
        let bag = ClaimsBag::new();
        let a = run(&policy, "NewObjectId", &bag, b"journey-1");
        let b = run(&policy, "NewObjectId", &bag, b"journey-1");
        let c = run(&policy, "NewObjectId", &bag, b"journey-2");

        assert_eq!(a, b);
        assert_ne!(a, c);
        let guid = a.get("objectId").and_then(ClaimValue::as_str).unwrap();
        assert!(uuid::Uuid::parse_str(guid).is_ok());
    }

    #[test]
    fn random_integer_respects_maximum_and_type() {
        let policy = policy();
        let delta = run(&policy, "NewOtp", &ClaimsBag::new(), b"seed");
        match delta.get("otp") {
            Some(ClaimValue::Int(n)) => assert!((0..1_000_000).contains(n)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn integer_draws_reject_the_biased_tail() {
        // 2^64 mod (2^63 + 1) leaves a tail starting at 2^63 + 1.
        let max = (1u64 << 63) + 1;
        assert!(accepts(1u64 << 63, max));
        assert!(!accepts(max, max));
        assert!(!accepts(u64::MAX, max));
        assert!(accepts(u64::MAX, 1 << 10));

        let policy = policy();
        let t = policy.transformation("NewOtp").unwrap();
        for i in 0..64u32 {
            let n = uniform_below(t, &i.to_be_bytes(), max).unwrap();
            assert!(n < max);
        }
    }

    #[test]
    fn integer_maximum_is_exclusive() {
        let policy = policy();
        let t = policy.transformation("NewOtp").unwrap();
        let mut seen = [false; 3];
        for i in 0..256u32 {
            let n = uniform_below(t, &i.to_be_bytes(), 3).unwrap();
            seen[usize::try_from(n).unwrap()] = true;
        }
        assert_eq!(seen, [true; 3]);
    }

    #[test]
    fn format_strings() {
        let policy = policy();
        let mut bag = ClaimsBag::new();
        bag.set("givenName", s("Ada"));
        bag.set("surname", s("Lovelace"));

        let delta = run(&policy, "DisplayName", &bag, b"");
        assert_eq!(delta.get("displayName"), Some(&s("Ada Lovelace")));
        let delta = run(&policy, "Greeting", &bag, b"");
        assert_eq!(delta.get("greeting"), Some(&s("Hello Ada!")));
        let delta = run(&policy, "JoinNames", &bag, b"");
        assert_eq!(delta.get("displayName"), Some(&s("Ada.Lovelace")));
    }

    #[test]
    fn missing_inputs_produce_empty_delta() {
        let policy = policy();
        let mut bag = ClaimsBag::new();
        bag.set("givenName", s("Ada"));

        assert!(run(&policy, "DisplayName", &bag, b"").is_empty());
        assert!(run(&policy, "AltSecId", &bag, b"").is_empty());
        assert!(run(&policy, "IsContoso", &bag, b"").is_empty());
        assert!(run(&policy, "LowerEmail", &bag, b"").is_empty());
        // StringConcat joins whatever is present.
        assert_eq!(run(&policy, "JoinNames", &bag, b"").get("displayName"), Some(&s("Ada")));
    }

    #[test]
    fn alternative_security_id_is_stable_and_provider_scoped() {
        let policy = policy();
        let mut bag = ClaimsBag::new();
        bag.set("issuerUserId", s("12345"));
        bag.set("identityProvider", s("contoso.com"));
        let a = run(&policy, "AltSecId", &bag, b"x");
        let b = run(&policy, "AltSecId", &bag, b"y");
        assert_eq!(a, b);

        bag.set("identityProvider", s("fabrikam.com"));
        let c = run(&policy, "AltSecId", &bag, b"x");
        assert_ne!(a, c);

        let encoded = a.get("alternativeSecurityId").and_then(ClaimValue::as_str).unwrap();
        let decoded: serde_json::Value =
            serde_json::from_slice(&BASE64.decode(encoded).unwrap()).unwrap();
        assert_eq!(decoded["issuer"], "contoso.com");
    }

    #[test]
    fn compare_and_change_case() {
        let policy = policy();
        let mut bag = ClaimsBag::new();
        bag.set("identityProvider", s("contoso.com"));
        bag.set("email", s("Ada@Example.COM"));

        assert_eq!(
            run(&policy, "IsContoso", &bag, b"").get("isContoso"),
            Some(&ClaimValue::Boolean(true))
        );
        assert_eq!(
            run(&policy, "LowerEmail", &bag, b"").get("email"),
            Some(&s("ada@example.com"))
        );
        assert_eq!(run(&policy, "Fixed", &bag, b"").get("greeting"), Some(&s("fixed")));
    }

    #[test]
    fn pipeline_is_idempotent_on_unchanged_bag() {
        let policy = policy();
        let ids: Vec<String> = ["NewObjectId", "DisplayName", "AltSecId", "LowerEmail", "IsContoso"]
            .iter()
            .map(ToString::to_string)
            .collect();

        let mut bag = ClaimsBag::new();
        bag.set("givenName", s("Ada"));
        bag.set("surname", s("Lovelace"));
        bag.set("issuerUserId", s("sub-1"));
        bag.set("identityProvider", s("contoso.com"));
        bag.set("email", s("ADA@EXAMPLE.COM"));

        run_pipeline(&ids, &mut bag, &policy, b"seed").unwrap();
        let once = bag.clone();
        run_pipeline(&ids, &mut bag, &policy, b"seed").unwrap();
        assert_eq!(bag, once);
        assert_eq!(bag.get_str("displayName"), Some("Ada Lovelace"));
        assert_eq!(bag.get_str("email"), Some("ada@example.com"));
    }

    #[test]
    fn pipeline_reports_missing_transformation() {
        let policy = policy();
        let err = run_pipeline(&["Nope".to_string()], &mut ClaimsBag::new(), &policy, b"")
            .unwrap_err();
        assert_eq!(err, TransformationError::MissingTransformation { id: "Nope".into() });
    }
}
