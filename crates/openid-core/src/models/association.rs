use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::StoreError;

/// A shared secret negotiated with an identity provider.
#[derive(Clone, PartialEq, Eq)]
pub struct Association {
    pub handle: String,
    pub secret: Vec<u8>,
    pub issued: i64,
    pub lifetime: i64,
    pub assoc_type: String,
}

impl Association {
    pub fn new(
        handle: impl Into<String>,
        secret: impl Into<Vec<u8>>,
        issued: i64,
        lifetime: i64,
        assoc_type: impl Into<String>,
    ) -> Self {
        Self {
            handle: handle.into(),
            secret: secret.into(),
            issued,
            lifetime,
            assoc_type: assoc_type.into(),
        }
    }

    /// Seconds of validity left at `now`, never negative.
    pub fn expires_in(&self, now: i64) -> i64 {
        self.issued
            .saturating_add(self.lifetime)
            .saturating_sub(now)
            .max(0)
    }

    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_in(now) == 0
    }
}

// Keep the secret out of logs.
impl fmt::Debug for Association {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Association")
            .field("handle", &self.handle)
            .field("secret", &"<redacted>")
            .field("issued", &self.issued)
            .field("lifetime", &self.lifetime)
            .field("assoc_type", &self.assoc_type)
            .finish()
    }
}

/// Persisted form of an association, one row of `openid_associations`.
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssociationRecord {
    pub server_url: String,
    pub handle: String,
    /// Standard base64 of the raw secret.
    pub secret: String,
    pub issued: i64,
    pub lifetime: i64,
    pub assoc_type: String,
}

impl AssociationRecord {
    pub fn new(server_url: &str, association: &Association) -> Self {
        Self {
            server_url: server_url.to_string(),
            handle: association.handle.clone(),
            secret: STANDARD.encode(&association.secret),
            issued: association.issued,
            lifetime: association.lifetime,
            assoc_type: association.assoc_type.clone(),
        }
    }

    pub fn to_association(&self) -> Result<Association, StoreError> {
        // Tolerate line-wrapped encodings written by MIME-style encoders.
        let compact: String = self
            .secret
            .chars()
            .filter(|c| !c.is_ascii_whitespace())
            .collect();
        let secret = STANDARD.decode(compact.as_bytes()).map_err(|e| {
            StoreError::corrupt_data(&format!(
                "association {} for {} has an undecodable secret: {}",
                self.handle, self.server_url, e
            ))
        })?;

        Ok(Association {
            handle: self.handle.clone(),
            secret,
            issued: self.issued,
            lifetime: self.lifetime,
            assoc_type: self.assoc_type.clone(),
        })
    }

    /// Sweep criterion used by periodic cleanup: `issued + lifetime < now`.
    pub fn is_past_lifetime(&self, now: i64) -> bool {
        self.issued.saturating_add(self.lifetime) < now
    }
}

/// Outcome of examining the rows matched by an association lookup.
#[derive(Debug, Default)]
pub struct AssociationLookup {
    /// The live association with the greatest `issued`, if any.
    pub found: Option<Association>,
    /// Rows that are expired at `now` and must be deleted by the caller.
    pub expired: Vec<AssociationRecord>,
}

/// Partition matched rows into live and expired, keeping the newest live one.
///
/// Equal `issued` values resolve to the later row in `records`.
pub fn select_association(
    records: Vec<AssociationRecord>,
    now: i64,
) -> Result<AssociationLookup, StoreError> {
    let mut lookup = AssociationLookup::default();

    for record in records {
        let association = record.to_association()?;
        if association.is_expired(now) {
            lookup.expired.push(record);
            continue;
        }

        let newer = lookup
            .found
            .as_ref()
            .map_or(true, |current| association.issued >= current.issued);
        if newer {
            lookup.found = Some(association);
        }
    }

    Ok(lookup)
}
