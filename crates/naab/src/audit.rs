//! Tamper-evident audit log.
//!
//! Security-relevant events are appended as JSONL records chained by the
//! SHA-256 of the previous record's canonical JSON, optionally signed with
//! HMAC-SHA256. Verification replays the chain and stops at the last intact
//! record, so a partial trailing write never invalidates the prefix.

use std::{
    fs::{File, OpenOptions},
    io::{BufRead, BufReader, Write},
    path::{Path, PathBuf},
    sync::Mutex,
};

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use strum::Display;

/// Environment variable the HMAC key is read from at interpreter start.
pub const HMAC_KEY_ENV: &str = "NAAB_AUDIT_HMAC_KEY";

/// Event categories recorded in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AuditEventKind {
    FfiValidationFailure,
    PolyglotTimeout,
    PolyglotFailure,
    PathViolation,
    SanitizerHit,
    RegexRejected,
    ResourceLimitHit,
    GcRun,
}

/// One persisted audit record. Field order is the canonical JSON order the
/// hash chain is computed over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: String,
    pub seq: u64,
    pub prev_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hmac: Option<String>,
    pub event_kind: AuditEventKind,
    pub payload: serde_json::Value,
}

#[derive(Debug)]
struct AuditState {
    seq: u64,
    prev_hash: String,
    file: Option<File>,
    /// In-memory tail kept when no path is configured, so hosts and tests
    /// can still inspect recent events.
    recent: Vec<AuditRecord>,
}

/// Append-only audit log with an integrity chain. Writes are serialized by
/// an internal mutex (shared-resource policy).
#[derive(Debug)]
pub struct AuditLog {
    state: Mutex<AuditState>,
    hmac_key: Option<Vec<u8>>,
    path: Option<PathBuf>,
}

/// Hash value used for the first record in a chain.
const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

impl AuditLog {
    /// Opens (appending) or creates the log at `path`; `None` keeps records
    /// in memory only. The HMAC key is read from [`HMAC_KEY_ENV`] once, here.
    #[must_use]
    pub fn new(path: Option<PathBuf>) -> Self {
        let hmac_key = std::env::var(HMAC_KEY_ENV).ok().map(String::into_bytes);
        let file = path.as_ref().and_then(|p| {
            OpenOptions::new().create(true).append(true).open(p).ok()
        });
        Self {
            state: Mutex::new(AuditState {
                seq: 0,
                prev_hash: GENESIS_HASH.to_owned(),
                file,
                recent: Vec::new(),
            }),
            hmac_key,
            path,
        }
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Appends one event. Failures to persist are swallowed (the log must
    /// never turn a security event into a crash) but the chain state still
    /// advances so in-memory verification stays consistent.
    pub fn log(&self, event_kind: AuditEventKind, payload: serde_json::Value) {
        let mut state = self.state.lock().expect("audit log mutex poisoned");
        let record = AuditRecord {
            timestamp: chrono::Utc::now().to_rfc3339(),
            seq: state.seq,
            prev_hash: state.prev_hash.clone(),
            hmac: None,
            event_kind,
            payload,
        };
        let record = self.seal(record);
        let line = serde_json::to_string(&record).expect("audit record serializes");

        state.prev_hash = hash_line(&line);
        state.seq += 1;
        if let Some(file) = state.file.as_mut() {
            let _ = writeln!(file, "{line}");
            let _ = file.flush();
        }
        state.recent.push(record);
        if state.recent.len() > 1024 {
            state.recent.remove(0);
        }
    }

    fn seal(&self, mut record: AuditRecord) -> AuditRecord {
        if let Some(key) = &self.hmac_key {
            let unsigned = serde_json::to_string(&record).expect("audit record serializes");
            let mut mac = Hmac::<Sha256>::new_from_slice(key).expect("hmac accepts any key length");
            mac.update(unsigned.as_bytes());
            record.hmac = Some(hex::encode(mac.finalize().into_bytes()));
        }
        record
    }

    /// Recent records (most recent last). Mainly for hosts without a
    /// persistent path and for tests.
    #[must_use]
    pub fn recent(&self) -> Vec<AuditRecord> {
        self.state.lock().expect("audit log mutex poisoned").recent.clone()
    }
}

/// Outcome of verifying a persisted audit chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditVerification {
    /// Number of records whose chain (and HMAC, when keyed) checked out.
    pub intact_records: usize,
    /// Description of the first corruption, if any. The chain prefix before
    /// it remains trustworthy.
    pub first_corruption: Option<String>,
}

/// Replays the chain in `path`, recomputing hashes (and HMACs when `key` is
/// given). Stops at the first corrupt or truncated record.
pub fn verify_audit_log(path: &Path, key: Option<&[u8]>) -> std::io::Result<AuditVerification> {
    let reader = BufReader::new(File::open(path)?);
    let mut prev_hash = GENESIS_HASH.to_owned();
    let mut intact = 0usize;

    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: AuditRecord = match serde_json::from_str(&line) {
            Ok(record) => record,
            Err(err) => {
                return Ok(AuditVerification {
                    intact_records: intact,
                    first_corruption: Some(format!("line {}: unparseable record: {err}", line_no + 1)),
                });
            }
        };
        if record.seq != intact as u64 {
            return Ok(AuditVerification {
                intact_records: intact,
                first_corruption: Some(format!("line {}: sequence gap", line_no + 1)),
            });
        }
        if record.prev_hash != prev_hash {
            return Ok(AuditVerification {
                intact_records: intact,
                first_corruption: Some(format!("line {}: hash chain broken", line_no + 1)),
            });
        }
        if let Some(key) = key {
            let mut unsigned = record.clone();
            let recorded = unsigned.hmac.take();
            let unsigned_json = serde_json::to_string(&unsigned).expect("audit record serializes");
            let mut mac = Hmac::<Sha256>::new_from_slice(key).expect("hmac accepts any key length");
            mac.update(unsigned_json.as_bytes());
            let expected = hex::encode(mac.finalize().into_bytes());
            if recorded.as_deref() != Some(expected.as_str()) {
                return Ok(AuditVerification {
                    intact_records: intact,
                    first_corruption: Some(format!("line {}: HMAC mismatch", line_no + 1)),
                });
            }
        }
        prev_hash = hash_line(&line);
        intact += 1;
    }

    Ok(AuditVerification {
        intact_records: intact,
        first_corruption: None,
    })
}

fn hash_line(line: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(line.as_bytes());
    hex::encode(hasher.finalize())
}
