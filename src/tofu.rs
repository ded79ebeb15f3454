//! TOFU (trust-on-first-use) implementation.
//!
//! Server identity is pinned by certificate fingerprint instead of CA
//! validation: the first certificate seen for a host is stored and later
//! connections must present the same one until it expires. A mismatch before
//! expiry is a trust violation that only an explicit [`TrustStore::reset`]
//! (after a user override) can clear.
//!
//! The store is backed by a TOML document on disk, read fully at startup and
//! rewritten fully on every update. Gemini requests may happen concurrently,
//! so the read-check-write sequence for a host is serialized behind one lock.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::GEMINI_DEFAULT_PORT;

/// Length in characters of a hex-encoded SHA-256 fingerprint.
const FINGERPRINT_LEN: usize = 64;

/// A pinned server identity: the certificate fingerprint and when it stops
/// being authoritative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustRecord {
    /// SHA-256 of the raw DER certificate, hex-encoded uppercase.
    pub fingerprint: String,
    /// Point after which any certificate is acceptable again (the
    /// certificate's notAfter).
    pub expiry: DateTime<Utc>,
}

/// Persistent store of one [`TrustRecord`] per host.
///
/// Records are created on first contact, renewed after expiry, and never
/// deleted. Rejecting a mismatched certificate does not modify the store.
#[derive(Debug)]
pub struct TrustStore {
    path: PathBuf,
    records: RwLock<HashMap<String, TrustRecord>>,
}

/// Returns the store key for a host and port. The default port is elided so
/// that `example.com` and `example.com:1965` share a record.
fn host_key(host: &str, port: u16) -> String {
    if port == GEMINI_DEFAULT_PORT {
        host.to_string()
    } else {
        format!("{host}:{port}")
    }
}

/// Hex-encodes the SHA-256 digest of the raw DER certificate, uppercase.
fn fingerprint(cert_der: &[u8]) -> String {
    let digest = Sha256::digest(cert_der);
    let mut out = String::with_capacity(FINGERPRINT_LEN);
    for byte in digest {
        out.push_str(&format!("{byte:02X}"));
    }
    out
}

/// Extracts the notAfter timestamp from a DER certificate, falling back to
/// the current time when the certificate cannot be parsed (which makes the
/// record immediately renewable instead of pinning garbage forever).
fn cert_expiry(cert_der: &[u8]) -> DateTime<Utc> {
    x509_parser::parse_x509_certificate(cert_der)
        .ok()
        .and_then(|(_, cert)| {
            DateTime::from_timestamp(cert.validity().not_after.timestamp(), 0)
        })
        .unwrap_or_else(Utc::now)
}

impl TrustStore {
    /// Loads the store from `path`, starting empty if the file does not
    /// exist yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let records = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read trust store {}", path.display()))?;
            toml::from_str(&text)
                .with_context(|| format!("failed to parse trust store {}", path.display()))?
        } else {
            HashMap::new()
        };
        Ok(TrustStore {
            path,
            records: RwLock::new(records),
        })
    }

    /// Rewrites the whole backing file from the given records.
    ///
    /// A failed write is logged and otherwise ignored: the store only holds
    /// cached trust data and the in-memory state stays authoritative for the
    /// rest of the process.
    fn save(&self, records: &HashMap<String, TrustRecord>) {
        let serialized = match toml::to_string(records) {
            Ok(serialized) => serialized,
            Err(e) => {
                warn!("failed to serialize trust store: {e}");
                return;
            }
        };
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                let _ = std::fs::create_dir_all(dir);
            }
        }
        if let Err(e) = std::fs::write(&self.path, serialized) {
            warn!("failed to write trust store {}: {e}", self.path.display());
        }
    }

    /// Checks a server certificate against the stored identity for
    /// `host:port`, returning whether the connection should go ahead.
    ///
    /// Storage and renewal are taken care of as side effects:
    /// - no record, or a malformed one: the certificate is stored and
    ///   accepted (first use)
    /// - matching fingerprint: accepted without rewriting the record
    /// - differing fingerprint after the stored expiry: treated as a
    ///   renewal, overwritten and accepted
    /// - differing fingerprint before expiry: rejected, store untouched
    ///
    /// If `false` is returned, the connection should not go ahead.
    pub fn verify(&self, host: &str, port: u16, cert_der: &[u8]) -> bool {
        let key = host_key(host, port);
        let fp = fingerprint(cert_der);

        // One write lock across the whole read-check-write sequence, so
        // concurrent fetches to the same host can't race to inconsistent
        // accept decisions.
        let mut records = self.records.write().unwrap();

        match records.get(&key) {
            Some(record) if record.fingerprint.len() == FINGERPRINT_LEN => {
                if record.fingerprint == fp {
                    // Same cert as the one stored
                    return true;
                }
                if Utc::now() > record.expiry {
                    // Old cert expired, so anything is valid
                    records.insert(
                        key,
                        TrustRecord {
                            fingerprint: fp,
                            expiry: cert_expiry(cert_der),
                        },
                    );
                    self.save(&records);
                    return true;
                }
                false
            }
            _ => {
                // Cert isn't in the store or the record is malformed, so it
                // can't be checked and anything is valid
                records.insert(
                    key,
                    TrustRecord {
                        fingerprint: fp,
                        expiry: cert_expiry(cert_der),
                    },
                );
                self.save(&records);
                true
            }
        }
    }

    /// Forces the given certificate to be valid, overwriting any previous
    /// record for `host:port`. Intended to be called only after the user has
    /// explicitly chosen to override a trust violation.
    pub fn reset(&self, host: &str, port: u16, cert_der: &[u8]) {
        let mut records = self.records.write().unwrap();
        records.insert(
            host_key(host, port),
            TrustRecord {
                fingerprint: fingerprint(cert_der),
                expiry: cert_expiry(cert_der),
            },
        );
        self.save(&records);
    }

    /// Returns the stored expiry date for `host:port`, if a record exists.
    pub fn expiry(&self, host: &str, port: u16) -> Option<DateTime<Utc>> {
        let records = self.records.read().unwrap();
        records.get(&host_key(host, port)).map(|r| r.expiry)
    }

    /// Number of hosts with a stored record.
    pub fn len(&self) -> usize {
        self.records.read().unwrap().len()
    }

    /// Whether the store has no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn store_in(dir: &tempfile::TempDir) -> TrustStore {
        TrustStore::load(dir.path().join("known_hosts.toml")).unwrap()
    }

    // Raw bytes stand in for DER certificates; cert_expiry falls back to
    // "now" for unparseable input, so renewal cases set expiry directly.
    const CERT_A: &[u8] = b"certificate one";
    const CERT_B: &[u8] = b"certificate two";

    #[test]
    fn test_first_use_accepts_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        assert!(store.verify("example.com", 1965, CERT_A));
        assert_eq!(store.len(), 1);
        assert!(store.expiry("example.com", 1965).is_some());

        // Reload from disk: the record must have been written out
        let reloaded = store_in(&dir);
        assert_eq!(reloaded.len(), 1);
        assert!(reloaded.verify("example.com", 1965, CERT_A));
    }

    #[test]
    fn test_same_cert_accepts_again() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        assert!(store.verify("example.com", 1965, CERT_A));
        assert!(store.verify("example.com", 1965, CERT_A));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_mismatch_before_expiry_rejects_without_mutation() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        // Pin CERT_A with a far-future expiry
        {
            let mut records = store.records.write().unwrap();
            records.insert(
                "example.com".to_string(),
                TrustRecord {
                    fingerprint: fingerprint(CERT_A),
                    expiry: Utc::now() + Duration::days(30),
                },
            );
        }
        assert!(!store.verify("example.com", 1965, CERT_B));
        // The stored record is untouched, and the old cert still verifies
        assert!(store.verify("example.com", 1965, CERT_A));
    }

    #[test]
    fn test_mismatch_after_expiry_renews() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        {
            let mut records = store.records.write().unwrap();
            records.insert(
                "example.com".to_string(),
                TrustRecord {
                    fingerprint: fingerprint(CERT_A),
                    expiry: Utc::now() - Duration::days(1),
                },
            );
        }
        assert!(store.verify("example.com", 1965, CERT_B));
        // The record now pins the new cert; the old one would need its own
        // renewal to come back
        let records = store.records.read().unwrap();
        assert_eq!(records["example.com"].fingerprint, fingerprint(CERT_B));
    }

    #[test]
    fn test_reset_overwrites_after_rejection() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        {
            let mut records = store.records.write().unwrap();
            records.insert(
                "example.com".to_string(),
                TrustRecord {
                    fingerprint: fingerprint(CERT_A),
                    expiry: Utc::now() + Duration::days(30),
                },
            );
        }
        assert!(!store.verify("example.com", 1965, CERT_B));
        store.reset("example.com", 1965, CERT_B);
        assert!(store.verify("example.com", 1965, CERT_B));
    }

    #[test]
    fn test_non_default_port_gets_own_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        assert!(store.verify("example.com", 1965, CERT_A));
        assert!(store.verify("example.com", 1966, CERT_B));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_fingerprint_is_uppercase_hex() {
        let fp = fingerprint(CERT_A);
        assert_eq!(fp.len(), 64);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
    }
}
