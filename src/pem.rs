//! PEM bundle sanitization.
//!
//! Trust bundles arrive as free-form concatenations of PEM blocks and
//! arbitrary commentary, possibly not even valid UTF-8. Everything outside an
//! encapsulation boundary is discarded; everything inside must be a plain
//! `CERTIFICATE` block whose body parses as a DER X.509 certificate.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use std::collections::HashSet;
use x509_parser::der_parser::oid::Oid;
use x509_parser::prelude::*;

use crate::{Error, Result};

const BEGIN_MARKER: &[u8] = b"-----BEGIN ";
const END_MARKER: &[u8] = b"-----END ";
const BOUNDARY_TAIL: &[u8] = b"-----";
const CERTIFICATE_LABEL: &str = "CERTIFICATE";

/// A certificate extracted from a PEM bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleCertificate {
    /// Raw DER encoding, the identity used for deduplication.
    pub der: Vec<u8>,
    /// RFC 2253-style subject string.
    pub subject: String,
}

/// Parse a PEM concatenation into its deduplicated certificates, in first
/// occurrence order.
pub fn parse_bundle(input: &[u8]) -> Result<Vec<BundleCertificate>> {
    let mut certs = Vec::new();
    let mut seen: HashSet<Vec<u8>> = HashSet::new();

    for block in scan_blocks(input)? {
        if block.label.contains("PRIVATE KEY") {
            return Err(Error::InvalidPem("bundle contains a private key".into()));
        }
        if block.label != CERTIFICATE_LABEL {
            return Err(Error::InvalidPem(format!(
                "unexpected {} block in bundle",
                block.label
            )));
        }
        if block.has_headers {
            return Err(Error::InvalidPem(
                "certificate block must not contain headers".into(),
            ));
        }
        let der = BASE64.decode(&block.body).map_err(|e| {
            Error::InvalidPem(format!("certificate block is not valid base64: {e}"))
        })?;
        let (rem, cert) = X509Certificate::from_der(&der).map_err(|e| {
            Error::InvalidPem(format!("certificate block is not a valid certificate: {e}"))
        })?;
        if !rem.is_empty() {
            return Err(Error::InvalidPem(
                "trailing data after DER certificate".into(),
            ));
        }
        let subject = format_subject(cert.subject());
        if seen.insert(der.clone()) {
            certs.push(BundleCertificate { der, subject });
        }
    }

    if certs.is_empty() {
        return Err(Error::InvalidPem("bundle contains no certificates".into()));
    }
    Ok(certs)
}

/// Re-serialize certificates as the canonical bundle: 64-column base64 blocks
/// joined by a single newline, no headers, no trailing newline.
pub fn serialize_bundle(certs: &[BundleCertificate]) -> String {
    let mut blocks = Vec::with_capacity(certs.len());
    for cert in certs {
        let b64 = BASE64.encode(&cert.der);
        let mut block = String::with_capacity(b64.len() + 64);
        block.push_str("-----BEGIN CERTIFICATE-----");
        let mut at = 0;
        while at < b64.len() {
            let end = usize::min(at + 64, b64.len());
            block.push('\n');
            block.push_str(&b64[at..end]);
            at = end;
        }
        block.push('\n');
        block.push_str("-----END CERTIFICATE-----");
        blocks.push(block);
    }
    blocks.join("\n")
}

/// Validate and canonicalize a PEM concatenation in one step.
pub fn sanitize_bundle(input: &[u8]) -> Result<String> {
    Ok(serialize_bundle(&parse_bundle(input)?))
}

struct RawBlock {
    label: String,
    body: Vec<u8>,
    has_headers: bool,
}

/// Split the input into raw PEM blocks, discarding interleaved text. A block
/// left open at EOF is treated as trailing commentary, matching the leniency
/// applied to everything else outside a boundary pair.
fn scan_blocks(input: &[u8]) -> Result<Vec<RawBlock>> {
    let mut blocks = Vec::new();
    let mut current: Option<RawBlock> = None;

    for raw_line in input.split(|&b| b == b'\n') {
        let line = raw_line.trim_ascii();
        let mut finished = false;
        match current {
            None => {
                if let Some(label) = boundary_label(line, BEGIN_MARKER) {
                    current = Some(RawBlock {
                        label: label.to_string(),
                        body: Vec::new(),
                        has_headers: false,
                    });
                }
            }
            Some(ref mut block) => match boundary_label(line, END_MARKER) {
                Some(label) if label == block.label => finished = true,
                Some(label) => {
                    return Err(Error::InvalidPem(format!(
                        "BEGIN {} closed by END {}",
                        block.label, label
                    )));
                }
                None => {
                    if line.contains(&b':') {
                        block.has_headers = true;
                    } else {
                        block.body.extend_from_slice(line);
                    }
                }
            },
        }
        if finished && let Some(done) = current.take() {
            blocks.push(done);
        }
    }
    Ok(blocks)
}

fn boundary_label<'a>(line: &'a [u8], marker: &[u8]) -> Option<&'a str> {
    let rest = line.strip_prefix(marker)?;
    let label = rest.strip_suffix(BOUNDARY_TAIL)?;
    std::str::from_utf8(label).ok()
}

/// RFC 2253 presentation of a subject: RDNs in reverse order, `,`-separated,
/// multi-valued RDNs joined with `+`.
fn format_subject(name: &X509Name) -> String {
    let mut rdns: Vec<String> = name.iter_rdn().map(format_rdn).collect();
    rdns.reverse();
    rdns.join(",")
}

fn format_rdn(rdn: &RelativeDistinguishedName) -> String {
    rdn.iter()
        .map(|attr| {
            let value = attr.as_str().unwrap_or("");
            format!("{}={}", attr_abbrev(attr.attr_type()), escape_dn_value(value))
        })
        .collect::<Vec<_>>()
        .join("+")
}

fn attr_abbrev(oid: &Oid) -> String {
    match oid.to_id_string().as_str() {
        "2.5.4.3" => "CN".into(),
        "2.5.4.6" => "C".into(),
        "2.5.4.7" => "L".into(),
        "2.5.4.8" => "ST".into(),
        "2.5.4.9" => "STREET".into(),
        "2.5.4.10" => "O".into(),
        "2.5.4.11" => "OU".into(),
        "0.9.2342.19200300.100.1.1" => "UID".into(),
        "0.9.2342.19200300.100.1.25" => "DC".into(),
        other => other.to_string(),
    }
}

fn escape_dn_value(value: &str) -> String {
    let last = value.chars().count().saturating_sub(1);
    let mut out = String::with_capacity(value.len());
    for (i, c) in value.chars().enumerate() {
        let needs_escape = matches!(c, ',' | '+' | '"' | '\\' | '<' | '>' | ';')
            || (i == 0 && matches!(c, ' ' | '#'))
            || (i == last && c == ' ');
        if needs_escape {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
