//! Java KeyStore encoding.
//!
//! Emits the JKS v2 binary layout with every certificate stored as a trusted
//! certificate entry. Output is byte-deterministic for a given bundle and
//! password: entry timestamps are pinned to the epoch and aliases derive only
//! from the certificate itself, so the target-equality check can compare raw
//! bytes.

use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::pem::BundleCertificate;
use crate::{Error, Result};

pub const DEFAULT_JKS_PASSWORD: &str = "changeit";

const MAGIC: u32 = 0xFEED_FEED;
const VERSION_2: u32 = 2;
const TRUSTED_CERT_TAG: u32 = 2;
const CERT_TYPE: &str = "X.509";
// Keystore integrity digest salt mandated by the format.
const DIGEST_SALT: &[u8] = b"Mighty Aphrodite";

pub fn encode_jks(certs: &[BundleCertificate], password: &str) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    out.extend_from_slice(&MAGIC.to_be_bytes());
    out.extend_from_slice(&VERSION_2.to_be_bytes());
    out.extend_from_slice(&(certs.len() as u32).to_be_bytes());

    for cert in certs {
        out.extend_from_slice(&TRUSTED_CERT_TAG.to_be_bytes());
        put_utf(&mut out, &keystore_alias(&cert.der, &cert.subject))?;
        // Creation time in epoch millis, fixed at zero for determinism.
        out.extend_from_slice(&0u64.to_be_bytes());
        put_utf(&mut out, CERT_TYPE)?;
        out.extend_from_slice(&(cert.der.len() as u32).to_be_bytes());
        out.extend_from_slice(&cert.der);
    }

    let digest = keystore_digest(password, &out);
    out.extend_from_slice(&digest);
    Ok(out)
}

/// `<hex8>|<subject>`. The digest prefix keeps aliases distinct when several
/// roots share a subject (rolled-over self-signed CAs); both inputs depend
/// only on the certificate, so the alias is stable across reconciles.
pub fn keystore_alias(der: &[u8], subject: &str) -> String {
    let hex = format!("{:x}", Sha256::digest(der));
    format!("{}|{}", &hex[..8], subject)
}

/// Java modified UTF-8 with a u16 length prefix.
fn put_utf(out: &mut Vec<u8>, s: &str) -> Result<()> {
    let mut bytes = Vec::with_capacity(s.len());
    for c in s.chars() {
        let cp = c as u32;
        match cp {
            0 => bytes.extend_from_slice(&[0xC0, 0x80]),
            0x01..=0x7F => bytes.push(cp as u8),
            0x80..=0x7FF => {
                bytes.push(0xC0 | (cp >> 6) as u8);
                bytes.push(0x80 | (cp & 0x3F) as u8);
            }
            0x800..=0xFFFF => push_three_byte(&mut bytes, cp),
            _ => {
                // Supplementary characters are written as a CESU-8 surrogate pair.
                let v = cp - 0x1_0000;
                push_three_byte(&mut bytes, 0xD800 + (v >> 10));
                push_three_byte(&mut bytes, 0xDC00 + (v & 0x3FF));
            }
        }
    }
    let len = u16::try_from(bytes.len())
        .map_err(|_| Error::JksEncode(format!("string of {} bytes exceeds u16", bytes.len())))?;
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(&bytes);
    Ok(())
}

fn push_three_byte(bytes: &mut Vec<u8>, cp: u32) {
    bytes.push(0xE0 | (cp >> 12) as u8);
    bytes.push(0x80 | ((cp >> 6) & 0x3F) as u8);
    bytes.push(0x80 | (cp & 0x3F) as u8);
}

/// SHA-1 over UTF-16BE(password) ++ salt ++ payload, appended as the keystore
/// integrity trailer.
fn keystore_digest(password: &str, content: &[u8]) -> [u8; 20] {
    let mut hasher = Sha1::new();
    for unit in password.encode_utf16() {
        hasher.update(unit.to_be_bytes());
    }
    hasher.update(DIGEST_SALT);
    hasher.update(content);
    hasher.finalize().into()
}
