//! Typed DTOs for the remote resources.
//!
//! Each entity kind has exactly one defaulting entry point (`from_remote`)
//! that reshapes a raw server object into the typed record, applying serde
//! defaults for absent fields. Secret-bearing fields hold [`EncryptedBlob`]s:
//! they are encrypted client-side before the record ever reaches the cache
//! or the remote service.

use crate::crypto::EncryptedBlob;
use crate::storage::StorageError;
use crate::totp::TotpAlgorithm;
use crate::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An entity the mutation coordinator can manage: serializable, cloneable,
/// and addressable by id.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Remote resource name, also the cache-key prefix for this kind.
    const RESOURCE: &'static str;

    fn id(&self) -> &str;

    fn set_id(&mut self, id: String);
}

fn from_remote_value<T: Record>(value: Value) -> Result<T> {
    Ok(serde_json::from_value(value)
        .map_err(|e| StorageError::Serialization(e.to_string()))?)
}

/// A stored credential. `secret` is the encrypted password.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PasswordRecord {
    pub id: String,
    pub space_id: Option<String>,
    pub title: String,
    pub username: String,
    pub secret: EncryptedBlob,
    pub url: Option<String>,
    pub notes: Option<EncryptedBlob>,
    pub updated_at: i64,
}

impl PasswordRecord {
    /// Reshape a raw server object, defaulting absent fields.
    pub fn from_remote(value: Value) -> Result<Self> {
        from_remote_value(value)
    }
}

impl Record for PasswordRecord {
    const RESOURCE: &'static str = "passwords";

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }
}

/// A TOTP entry. `secret` is the encrypted base32 seed; generation
/// parameters stay in the clear so codes can be listed without decrypting
/// every entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OtpRecord {
    pub id: String,
    pub space_id: Option<String>,
    pub label: String,
    pub secret: EncryptedBlob,
    pub algorithm: TotpAlgorithm,
    pub digits: u8,
    pub period: u32,
    pub issuer: Option<String>,
    pub updated_at: i64,
}

impl Default for OtpRecord {
    fn default() -> Self {
        Self {
            id: String::new(),
            space_id: None,
            label: String::new(),
            secret: EncryptedBlob::default(),
            algorithm: TotpAlgorithm::Sha1,
            digits: 6,
            period: 30,
            issuer: None,
            updated_at: 0,
        }
    }
}

impl OtpRecord {
    pub fn from_remote(value: Value) -> Result<Self> {
        let mut record: Self = from_remote_value(value)?;
        // A sloppy server may send explicit zeros; fall back to the
        // otpauth defaults rather than propagate unusable parameters
        if record.digits == 0 {
            record.digits = 6;
        }
        if record.period == 0 {
            record.period = 30;
        }
        Ok(record)
    }
}

impl Record for OtpRecord {
    const RESOURCE: &'static str = "otp_entries";

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }
}

/// A shared space grouping entries and members.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Space {
    pub id: String,
    pub name: String,
    pub owner_id: String,
    pub member_ids: Vec<String>,
}

impl Space {
    pub fn from_remote(value: Value) -> Result<Self> {
        from_remote_value(value)
    }
}

impl Record for Space {
    const RESOURCE: &'static str = "spaces";

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }
}

/// A shared bill inside a space. Splitting arithmetic lives with the caller;
/// the core only synchronizes the record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Bill {
    pub id: String,
    pub space_id: String,
    pub title: String,
    pub amount_cents: i64,
    pub paid_by: String,
    pub participant_ids: Vec<String>,
    pub settled: bool,
}

impl Bill {
    pub fn from_remote(value: Value) -> Result<Self> {
        from_remote_value(value)
    }
}

impl Record for Bill {
    const RESOURCE: &'static str = "bills";

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }
}
