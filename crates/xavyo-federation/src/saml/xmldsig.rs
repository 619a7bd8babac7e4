//! Enveloped XML signatures (RSA-SHA256, SHA-256 digest, exclusive C14N)
//! and the HTTP-Redirect binding signature.

use base64::{engine::general_purpose::STANDARD, Engine};
use openssl::hash::{hash, MessageDigest};
use openssl::pkey::{PKey, Private, Public};
use openssl::sign::{Signer, Verifier};
use openssl::x509::X509;
use quick_xml::events::Event;
use quick_xml::Reader;

use super::c14n::{self, canonicalize, Apex, DSIG_NS};
use crate::error::{AdapterError, AdapterResult};

pub const RSA_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";
const SHA256: &str = "http://www.w3.org/2001/04/xmlenc#sha256";
const EXC_C14N: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";
const ENVELOPED: &str = "http://www.w3.org/2000/09/xmldsig#enveloped-signature";

fn invalid(detail: impl Into<String>) -> AdapterError {
    AdapterError::SignatureInvalid(detail.into())
}

fn c14n_invalid(e: c14n::C14nError) -> AdapterError {
    invalid(format!("canonicalization failed: {e}"))
}

/// Parses an X.509 certificate, with or without PEM armor.
pub fn parse_certificate(pem: &str) -> AdapterResult<X509> {
    let pem = if pem.contains("-----BEGIN CERTIFICATE-----") {
        pem.to_string()
    } else {
        format!(
            "-----BEGIN CERTIFICATE-----\n{}\n-----END CERTIFICATE-----",
            pem.trim()
        )
    };
    X509::from_pem(pem.as_bytes())
        .map_err(|e| AdapterError::config(format!("invalid certificate: {e}")))
}

/// A private key with the certificate published for it.
pub struct SigningCredentials {
    key: PKey<Private>,
    certificate: X509,
}

impl std::fmt::Debug for SigningCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningCredentials").finish_non_exhaustive()
    }
}

impl SigningCredentials {
    pub fn from_pem(private_key_pem: &str, certificate_pem: &str) -> AdapterResult<Self> {
        let key = PKey::private_key_from_pem(private_key_pem.as_bytes())
            .map_err(|e| AdapterError::config(format!("invalid private key: {e}")))?;
        Ok(Self {
            key,
            certificate: parse_certificate(certificate_pem)?,
        })
    }

    /// Base64 DER of the certificate, as carried in `ds:X509Certificate`
    /// and SAML metadata.
    pub fn certificate_base64_der(&self) -> AdapterResult<String> {
        self.certificate
            .to_der()
            .map(|der| STANDARD.encode(der))
            .map_err(|e| AdapterError::config(format!("certificate encoding failed: {e}")))
    }

    fn sign(&self, data: &[u8]) -> AdapterResult<Vec<u8>> {
        rsa_sha256_sign(&self.key, data)
    }
}

fn rsa_sha256_sign(key: &PKey<Private>, data: &[u8]) -> AdapterResult<Vec<u8>> {
    let sign = || -> Result<Vec<u8>, openssl::error::ErrorStack> {
        let mut signer = Signer::new(MessageDigest::sha256(), key)?;
        signer.update(data)?;
        signer.sign_to_vec()
    };
    sign().map_err(|e| AdapterError::config(format!("signing failed: {e}")))
}

fn rsa_sha256_verify(key: &PKey<Public>, data: &[u8], signature: &[u8]) -> AdapterResult<bool> {
    let verify = || -> Result<bool, openssl::error::ErrorStack> {
        let mut verifier = Verifier::new(MessageDigest::sha256(), key)?;
        verifier.update(data)?;
        verifier.verify(signature)
    };
    verify().map_err(|e| invalid(format!("verification failed: {e}")))
}

/// Signature of the HTTP-Redirect binding over
/// `SAMLRequest=..&RelayState=..&SigAlg=..` (already URL-encoded).
pub(crate) fn sign_redirect_query(private_key_pem: &str, query: &str) -> AdapterResult<String> {
    let key = PKey::private_key_from_pem(private_key_pem.as_bytes())
        .map_err(|e| AdapterError::config(format!("invalid signing key: {e}")))?;
    rsa_sha256_sign(&key, query.as_bytes()).map(|sig| STANDARD.encode(sig))
}

fn sha256_base64(data: &str) -> AdapterResult<String> {
    hash(MessageDigest::sha256(), data.as_bytes())
        .map(|d| STANDARD.encode(d))
        .map_err(|e| AdapterError::config(format!("digest failed: {e}")))
}

/// Signs the element with `ID="element_id"` and inserts the signature right
/// after its `Issuer` child.
pub fn sign_enveloped(
    xml: &str,
    element_id: &str,
    credentials: &SigningCredentials,
) -> AdapterResult<String> {
    let digest = sha256_base64(
        &canonicalize(xml, Apex::Id(element_id), true)
            .map_err(|e| AdapterError::config(e.to_string()))?,
    )?;

    let signed_info = format!(
        concat!(
            r#"<ds:SignedInfo xmlns:ds="{ds}">"#,
            r#"<ds:CanonicalizationMethod Algorithm="{c14n}"/>"#,
            r#"<ds:SignatureMethod Algorithm="{alg}"/>"#,
            r##"<ds:Reference URI="#{id}">"##,
            r#"<ds:Transforms><ds:Transform Algorithm="{env}"/><ds:Transform Algorithm="{c14n}"/></ds:Transforms>"#,
            r#"<ds:DigestMethod Algorithm="{sha}"/><ds:DigestValue>{digest}</ds:DigestValue>"#,
            r#"</ds:Reference></ds:SignedInfo>"#
        ),
        ds = DSIG_NS,
        c14n = EXC_C14N,
        alg = RSA_SHA256,
        id = element_id,
        env = ENVELOPED,
        sha = SHA256,
        digest = digest,
    );
    let canonical_signed_info = canonicalize(&signed_info, Apex::Nth("SignedInfo", 0), false)
        .map_err(|e| AdapterError::config(e.to_string()))?;
    let signature_value = STANDARD.encode(credentials.sign(canonical_signed_info.as_bytes())?);

    let signature = format!(
        concat!(
            r#"<ds:Signature xmlns:ds="{ds}">{signed_info}"#,
            r#"<ds:SignatureValue>{value}</ds:SignatureValue>"#,
            r#"<ds:KeyInfo><ds:X509Data><ds:X509Certificate>{cert}</ds:X509Certificate></ds:X509Data></ds:KeyInfo>"#,
            r#"</ds:Signature>"#
        ),
        ds = DSIG_NS,
        signed_info = signed_info,
        value = signature_value,
        cert = credentials.certificate_base64_der()?,
    );

    let at = insertion_point(xml, element_id)
        .ok_or_else(|| AdapterError::config(format!("cannot place signature in '{element_id}'")))?;
    let mut signed = String::with_capacity(xml.len() + signature.len());
    signed.push_str(&xml[..at]);
    signed.push_str(&signature);
    signed.push_str(&xml[at..]);
    Ok(signed)
}

/// Byte offset after the element's `Issuer` child, or after its start tag
/// if it has none.
fn insertion_point(xml: &str, element_id: &str) -> Option<usize> {
    let id_at = xml.find(&format!("ID=\"{element_id}\""))?;
    let start_tag_end = id_at + xml[id_at..].find('>')? + 1;
    let rest = &xml[start_tag_end..];
    let trimmed = rest.trim_start();
    let offset = rest.len() - trimmed.len();
    let is_issuer = trimmed
        .strip_prefix('<')
        .and_then(|t| t.split(|c: char| c.is_whitespace() || c == '>').next())
        .is_some_and(|name| name == "Issuer" || name.ends_with(":Issuer"));
    if !is_issuer {
        return Some(start_tag_end);
    }
    let issuer_start_end = trimmed.find('>')? + 1;
    let close = issuer_start_end + trimmed[issuer_start_end..].find("Issuer>")? + "Issuer>".len();
    Some(start_tag_end + offset + close)
}

#[derive(Debug, Default)]
struct SignatureParts {
    parent_id: Option<String>,
    signed_info_index: usize,
    reference_uri: Option<String>,
    signature_method: Option<String>,
    digest_method: Option<String>,
    digest_value: String,
    signature_value: String,
}

/// Verifies every enveloped signature in `xml` against `certificate_pem`
/// and returns the IDs of the signed elements.
///
/// Unsigned documents and any failing signature are rejected.
pub fn verify_enveloped(xml: &str, certificate_pem: &str) -> AdapterResult<Vec<String>> {
    let certificate = parse_certificate(certificate_pem)?;
    let public_key = certificate
        .public_key()
        .map_err(|e| AdapterError::config(format!("invalid certificate key: {e}")))?;

    let signatures = collect_signatures(xml)?;
    if signatures.is_empty() {
        return Err(invalid("document is not signed"));
    }

    let mut signed_ids = Vec::with_capacity(signatures.len());
    for sig in signatures {
        if sig.signature_method.as_deref() != Some(RSA_SHA256) {
            return Err(invalid(format!(
                "unsupported signature method {:?}",
                sig.signature_method
            )));
        }
        if sig.digest_method.as_deref() != Some(SHA256) {
            return Err(invalid(format!(
                "unsupported digest method {:?}",
                sig.digest_method
            )));
        }
        let parent_id = sig
            .parent_id
            .ok_or_else(|| invalid("signature is not enveloped by an element with an ID"))?;
        let reference = sig.reference_uri.unwrap_or_default();
        if reference.trim_start_matches('#') != parent_id {
            return Err(invalid(format!(
                "signature references '{reference}' but is enveloped by '{parent_id}'"
            )));
        }

        let canonical = canonicalize(xml, Apex::Id(&parent_id), true).map_err(c14n_invalid)?;
        let expected_digest: String = sig.digest_value.split_whitespace().collect();
        if sha256_base64(&canonical)? != expected_digest {
            return Err(invalid("digest mismatch"));
        }

        let signed_info = canonicalize(xml, Apex::Nth("SignedInfo", sig.signed_info_index), false)
            .map_err(c14n_invalid)?;
        let signature_bytes = STANDARD
            .decode(sig.signature_value.split_whitespace().collect::<String>())
            .map_err(|e| invalid(format!("invalid signature encoding: {e}")))?;
        if !rsa_sha256_verify(&public_key, signed_info.as_bytes(), &signature_bytes)? {
            return Err(invalid("signature value does not verify"));
        }
        signed_ids.push(parent_id);
    }
    Ok(signed_ids)
}

fn collect_signatures(xml: &str) -> AdapterResult<Vec<SignatureParts>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(false);

    let mut declared: Vec<Vec<(String, String)>> = Vec::new();
    let mut ids: Vec<Option<String>> = Vec::new();
    let mut signed_info_seen = 0usize;
    let mut current: Option<(usize, SignatureParts)> = None;
    let mut found = Vec::new();
    let mut text_target: Option<&'static str> = None;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| AdapterError::malformed(format!("XML parse error: {e}")))?;
        match event {
            Event::Start(ref e) | Event::Empty(ref e) => {
                let is_empty = matches!(event, Event::Empty(_));
                declared.push(c14n::namespace_declarations(e).map_err(c14n_invalid)?);
                let depth = declared.len();
                let local = e.local_name();
                let local = local.as_ref();

                if local == b"SignedInfo" {
                    if let Some((_, parts)) = current.as_mut() {
                        parts.signed_info_index = signed_info_seen;
                    }
                    signed_info_seen += 1;
                }

                if current.is_none() && c14n::is_signature(e, &declared) {
                    let parent_id = ids.last().cloned().flatten();
                    current = Some((depth, SignatureParts {
                        parent_id,
                        ..SignatureParts::default()
                    }));
                } else if let Some((_, parts)) = current.as_mut() {
                    let algorithm = || c14n::attribute(e, "Algorithm").map_err(c14n_invalid);
                    match local {
                        b"SignatureMethod" => parts.signature_method = algorithm()?,
                        b"DigestMethod" => parts.digest_method = algorithm()?,
                        b"Reference" => {
                            parts.reference_uri = c14n::attribute(e, "URI").map_err(c14n_invalid)?;
                        }
                        b"DigestValue" => text_target = Some("digest"),
                        b"SignatureValue" => text_target = Some("signature"),
                        _ => {}
                    }
                }

                ids.push(c14n::attribute(e, "ID").map_err(c14n_invalid)?);
                if is_empty {
                    text_target = None;
                    declared.pop();
                    ids.pop();
                }
            }
            Event::Text(ref t) => {
                if let (Some(target), Some((_, parts))) = (text_target, current.as_mut()) {
                    let text = t
                        .unescape()
                        .map_err(|e| AdapterError::malformed(format!("invalid text: {e}")))?;
                    match target {
                        "digest" => parts.digest_value.push_str(&text),
                        _ => parts.signature_value.push_str(&text),
                    }
                }
            }
            Event::End(_) => {
                text_target = None;
                let depth = declared.len();
                if current.as_ref().is_some_and(|(d, _)| *d == depth) {
                    if let Some((_, parts)) = current.take() {
                        found.push(parts);
                    }
                }
                declared.pop();
                ids.pop();
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use openssl::asn1::Asn1Time;
    use openssl::rsa::Rsa;
    use openssl::x509::X509NameBuilder;

    fn credentials() -> (String, String) {
        let rsa = Rsa::generate(2048).unwrap();
        let key = PKey::from_rsa(rsa).unwrap();
        let mut name = X509NameBuilder::new().unwrap();
        name.append_entry_by_text("CN", "test-idp").unwrap();
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
            .set_not_after(&Asn1Time::days_from_now(1).unwrap())
            .unwrap();
        builder.sign(&key, MessageDigest::sha256()).unwrap();
        let cert = builder.build();
        (
            String::from_utf8(key.private_key_to_pem_pkcs8().unwrap()).unwrap(),
            String::from_utf8(cert.to_pem().unwrap()).unwrap(),
        )
    }

    const DOC: &str = concat!(
        r#"<samlp:Response xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" ID="_r1">"#,
        r#"<saml:Assertion xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="_a1">"#,
        "\n  <saml:Issuer>https://idp.fabrikam.com</saml:Issuer>\n",
        r#"  <saml:Subject><saml:NameID>u-1</saml:NameID></saml:Subject>"#,
        "\n</saml:Assertion></samlp:Response>"
    );

    #[test]
    fn sign_then_verify_assertion() {
        let (key, cert) = credentials();
        let creds = SigningCredentials::from_pem(&key, &cert).unwrap();
        let signed = sign_enveloped(DOC, "_a1", &creds).unwrap();

        let issuer_end = signed.find("</saml:Issuer>").unwrap();
        assert_eq!(
            signed.find("<ds:Signature").unwrap(),
            issuer_end + "</saml:Issuer>".len()
        );
        assert_eq!(verify_enveloped(&signed, &cert).unwrap(), vec!["_a1".to_string()]);
    }

    #[test]
    fn tampered_content_fails_digest() {
        let (key, cert) = credentials();
        let creds = SigningCredentials::from_pem(&key, &cert).unwrap();
        let signed = sign_enveloped(DOC, "_a1", &creds).unwrap().replace("u-1", "u-2");
        assert!(matches!(
            verify_enveloped(&signed, &cert),
            Err(AdapterError::SignatureInvalid(msg)) if msg.contains("digest")
        ));
    }

    #[test]
    fn other_certificate_fails_signature() {
        let (key, cert) = credentials();
        let (_, other_cert) = credentials();
        let creds = SigningCredentials::from_pem(&key, &cert).unwrap();
        let signed = sign_enveloped(DOC, "_a1", &creds).unwrap();
        assert!(matches!(
            verify_enveloped(&signed, &other_cert),
            Err(AdapterError::SignatureInvalid(_))
        ));
    }

    #[test]
    fn unsigned_document_is_rejected() {
        let (_, cert) = credentials();
        assert!(matches!(
            verify_enveloped(DOC, &cert),
            Err(AdapterError::SignatureInvalid(_))
        ));
    }

    #[test]
    fn insertion_point_follows_issuer() {
        let xml = r#"<a ID="x"><b/></a>"#;
        assert_eq!(insertion_point(xml, "x"), Some(r#"<a ID="x">"#.len()));

        let xml = r#"<a ID="x"> <s:Issuer Format="f">i</s:Issuer><b/></a>"#;
        let at = insertion_point(xml, "x").unwrap();
        assert_eq!(&xml[at..], "<b/></a>");
    }
}
