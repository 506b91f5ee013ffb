//! Identifier kinds accepted by the lookup service

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of identifier being checked
///
/// Every kind travels in its own query parameter; see [`IdentifierType::query_key`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierType {
    /// Partner-side user id
    PartnerUid,
    /// One-time pseudonymous token
    Otp,
    /// Device advertising id
    DeviceId,
    /// Externally assigned user id
    ExternalUid,
}

impl IdentifierType {
    pub const ALL: [IdentifierType; 4] = [
        IdentifierType::PartnerUid,
        IdentifierType::Otp,
        IdentifierType::DeviceId,
        IdentifierType::ExternalUid,
    ];

    /// Query parameter that carries an identifier of this kind
    pub fn query_key(self) -> &'static str {
        match self {
            IdentifierType::PartnerUid => "partner_uid",
            IdentifierType::Otp => "otp",
            IdentifierType::DeviceId => "device_id",
            IdentifierType::ExternalUid => "external_uid",
        }
    }
}

impl fmt::Display for IdentifierType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.query_key())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown identifier type {0:?} (expected partner_uid, otp, device_id or external_uid)")]
pub struct UnknownIdentifierType(pub String);

impl FromStr for IdentifierType {
    type Err = UnknownIdentifierType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        IdentifierType::ALL
            .into_iter()
            .find(|kind| kind.query_key() == normalized)
            .ok_or_else(|| UnknownIdentifierType(s.to_string()))
    }
}
