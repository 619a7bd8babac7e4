//! Exclusive XML canonicalization (without comments) of one element
//! subtree, as used by enveloped XML signatures.
//!
//! Only the constructs SAML messages use are supported: elements,
//! attributes, namespace declarations, text and CDATA. The XML declaration,
//! comments, processing instructions and DOCTYPE are dropped.

use std::collections::BTreeMap;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

pub(crate) const DSIG_NS: &str = "http://www.w3.org/2000/09/xmldsig#";

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct C14nError(pub String);

impl std::fmt::Display for C14nError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Selects the apex element of the subtree to canonicalize.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Apex<'a> {
    /// The element whose `ID` attribute has this value.
    Id(&'a str),
    /// The n-th (zero-based) element with this local name, in document order.
    Nth(&'a str, usize),
}

/// Canonicalizes the subtree selected by `apex`.
///
/// With `enveloped`, a `ds:Signature` that is a direct child of the apex is
/// left out (the enveloped-signature transform).
pub(crate) fn canonicalize(xml: &str, apex: Apex<'_>, enveloped: bool) -> Result<String, C14nError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(false);

    let mut declared: Vec<Vec<(String, String)>> = Vec::new();
    let mut rendered: Vec<BTreeMap<String, String>> = Vec::new();
    let mut out = String::new();
    let mut seen = 0usize;
    // Depth of the apex within the document, once entered.
    let mut apex_depth: Option<usize> = None;
    // Depth of an excluded signature, while inside it.
    let mut skip_depth: Option<usize> = None;
    let mut done = false;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| C14nError(format!("XML parse error: {e}")))?;
        match event {
            Event::Start(ref e) | Event::Empty(ref e) => {
                let is_empty = matches!(event, Event::Empty(_));
                declared.push(namespace_declarations(e)?);
                let depth = declared.len();

                if apex_depth.is_none() && !done && matches_apex(e, apex, &mut seen)? {
                    apex_depth = Some(depth);
                }

                if let Some(apex_at) = apex_depth {
                    if skip_depth.is_none()
                        && enveloped
                        && depth == apex_at + 1
                        && is_signature(e, &declared)
                    {
                        skip_depth = Some(depth);
                    }
                    if skip_depth.is_none() {
                        write_start(&mut out, e, &declared, &mut rendered)?;
                        if is_empty {
                            write_end(&mut out, e.name().as_ref())?;
                            rendered.pop();
                        }
                    }
                }

                if is_empty {
                    if skip_depth == Some(depth) {
                        skip_depth = None;
                    }
                    if apex_depth == Some(depth) {
                        apex_depth = None;
                        done = true;
                    }
                    declared.pop();
                }
            }
            Event::End(ref e) => {
                let depth = declared.len();
                if apex_depth.is_some() && skip_depth.is_none() {
                    write_end(&mut out, e.name().as_ref())?;
                    rendered.pop();
                }
                if skip_depth == Some(depth) {
                    skip_depth = None;
                }
                if apex_depth == Some(depth) {
                    apex_depth = None;
                    done = true;
                }
                declared.pop();
            }
            Event::Text(ref t) => {
                if apex_depth.is_some() && skip_depth.is_none() {
                    let text = t
                        .unescape()
                        .map_err(|e| C14nError(format!("invalid text: {e}")))?;
                    escape_text(&mut out, &text);
                }
            }
            Event::CData(ref c) => {
                if apex_depth.is_some() && skip_depth.is_none() {
                    let text = std::str::from_utf8(c.as_ref())
                        .map_err(|e| C14nError(format!("invalid CDATA: {e}")))?;
                    escape_text(&mut out, text);
                }
            }
            Event::Eof => break,
            _ => {}
        }
        if done {
            break;
        }
    }

    if !done {
        return Err(C14nError(match apex {
            Apex::Id(id) => format!("no element with ID '{id}'"),
            Apex::Nth(name, n) => format!("no {name} element #{n}"),
        }));
    }
    Ok(out)
}

fn utf8(bytes: &[u8]) -> Result<&str, C14nError> {
    std::str::from_utf8(bytes).map_err(|e| C14nError(format!("invalid UTF-8 in name: {e}")))
}

fn matches_apex(e: &BytesStart<'_>, apex: Apex<'_>, seen: &mut usize) -> Result<bool, C14nError> {
    match apex {
        Apex::Id(id) => Ok(attribute(e, "ID")?.as_deref() == Some(id)),
        Apex::Nth(name, n) => {
            if e.local_name().as_ref() == name.as_bytes() {
                *seen += 1;
                Ok(*seen == n + 1)
            } else {
                Ok(false)
            }
        }
    }
}

pub(crate) fn attribute(e: &BytesStart<'_>, name: &str) -> Result<Option<String>, C14nError> {
    for attr in e.attributes() {
        let attr = attr.map_err(|err| C14nError(format!("invalid attribute: {err}")))?;
        if attr.key.as_ref() == name.as_bytes() {
            let value = attr
                .unescape_value()
                .map_err(|err| C14nError(format!("invalid attribute value: {err}")))?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

pub(crate) fn namespace_declarations(e: &BytesStart<'_>) -> Result<Vec<(String, String)>, C14nError> {
    let mut decls = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| C14nError(format!("invalid attribute: {err}")))?;
        let key = utf8(attr.key.as_ref())?;
        let prefix = if key == "xmlns" {
            ""
        } else if let Some(p) = key.strip_prefix("xmlns:") {
            p
        } else {
            continue;
        };
        let uri = attr
            .unescape_value()
            .map_err(|err| C14nError(format!("invalid namespace: {err}")))?;
        decls.push((prefix.to_string(), uri.into_owned()));
    }
    Ok(decls)
}

fn lookup<'a>(declared: &'a [Vec<(String, String)>], prefix: &str) -> Option<&'a str> {
    declared
        .iter()
        .rev()
        .flat_map(|scope| scope.iter())
        .find(|(p, _)| p == prefix)
        .map(|(_, uri)| uri.as_str())
}

fn rendered_lookup<'a>(rendered: &'a [BTreeMap<String, String>], prefix: &str) -> Option<&'a str> {
    rendered
        .iter()
        .rev()
        .find_map(|scope| scope.get(prefix))
        .map(String::as_str)
}

fn split_qname(qname: &str) -> (&str, &str) {
    qname.split_once(':').unwrap_or(("", qname))
}

pub(crate) fn is_signature(e: &BytesStart<'_>, declared: &[Vec<(String, String)>]) -> bool {
    let name = e.name();
    let Ok(qname) = utf8(name.as_ref()) else {
        return false;
    };
    let (prefix, local) = split_qname(qname);
    local == "Signature" && lookup(declared, prefix) == Some(DSIG_NS)
}

fn write_start(
    out: &mut String,
    e: &BytesStart<'_>,
    declared: &[Vec<(String, String)>],
    rendered: &mut Vec<BTreeMap<String, String>>,
) -> Result<(), C14nError> {
    let qname = utf8(e.name().as_ref())?.to_string();
    let (element_prefix, _) = split_qname(&qname);

    let mut attributes: Vec<(String, String, String, String)> = Vec::new();
    let mut used: Vec<String> = vec![element_prefix.to_string()];
    for attr in e.attributes() {
        let attr = attr.map_err(|err| C14nError(format!("invalid attribute: {err}")))?;
        let key = utf8(attr.key.as_ref())?.to_string();
        if key == "xmlns" || key.starts_with("xmlns:") {
            continue;
        }
        let value = attr
            .unescape_value()
            .map_err(|err| C14nError(format!("invalid attribute value: {err}")))?
            .into_owned();
        let (prefix, local) = split_qname(&key);
        let (prefix, local) = (prefix.to_string(), local.to_string());
        let ns = if prefix.is_empty() {
            String::new()
        } else {
            if prefix != "xml" && !used.contains(&prefix) {
                used.push(prefix.clone());
            }
            lookup(declared, &prefix).unwrap_or_default().to_string()
        };
        attributes.push((ns, local, key, value));
    }

    let mut emitted = BTreeMap::new();
    for prefix in used {
        let uri = lookup(declared, &prefix).unwrap_or_default();
        let current = rendered_lookup(rendered, &prefix).unwrap_or_default();
        if uri != current {
            emitted.insert(prefix, uri.to_string());
        }
    }

    out.push('<');
    out.push_str(&qname);
    for (prefix, uri) in &emitted {
        if prefix.is_empty() {
            out.push_str(" xmlns=\"");
        } else {
            out.push_str(" xmlns:");
            out.push_str(prefix);
            out.push_str("=\"");
        }
        escape_attr(out, uri);
        out.push('"');
    }
    attributes.sort_by(|a, b| (&a.0, &a.1).cmp(&(&b.0, &b.1)));
    for (_, _, key, value) in &attributes {
        out.push(' ');
        out.push_str(key);
        out.push_str("=\"");
        escape_attr(out, value);
        out.push('"');
    }
    out.push('>');
    rendered.push(emitted);
    Ok(())
}

fn write_end(out: &mut String, qname: &[u8]) -> Result<(), C14nError> {
    out.push_str("</");
    out.push_str(utf8(qname)?);
    out.push('>');
    Ok(())
}

fn escape_text(out: &mut String, text: &str) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(c),
        }
    }
}

fn escape_attr(out: &mut String, value: &str) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '"' => out.push_str("&quot;"),
            '\t' => out.push_str("&#x9;"),
            '\n' => out.push_str("&#xA;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(c),
        }
    }
}
