//! Code-signature state and the coarse trust classification derived from it.

use serde::{Deserialize, Serialize};

/// Teams whose signatures are treated as trusted vendors.
const TRUSTED_TEAMS: &[&str] = &["apple", "microsoft", "google", "adobe", "mozilla"];

/// Code-signing state of one executable, as reported by `codesign`.
///
/// Absent entirely (the enrichment carries `None`) when the executable path
/// is unknown or unreadable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signature {
    pub signed: bool,
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team_identifier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorities: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notarized: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_app_store: Option<bool>,
}

/// Coarse trust classification of a signature, worst first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustLevel {
    /// Signed but the signature fails validation.
    Malicious,
    /// Not signed at all.
    Suspicious,
    /// Signed and valid, but no team and no notarization to anchor it.
    Unknown,
    /// Notarized or carrying a developer team identifier.
    Verified,
    /// Team in the trusted-vendor set, or distributed via the App Store.
    Trusted,
}

impl Signature {
    /// Classify this signature into a [`TrustLevel`].
    pub fn trust_level(&self) -> TrustLevel {
        if self.signed && !self.valid {
            return TrustLevel::Malicious;
        }
        if !self.signed {
            return TrustLevel::Suspicious;
        }
        if self.is_app_store == Some(true) || self.has_trusted_team() {
            return TrustLevel::Trusted;
        }
        if self.notarized == Some(true) || self.team_identifier.is_some() {
            return TrustLevel::Verified;
        }
        TrustLevel::Unknown
    }

    /// Whether the team identifier names one of the trusted vendors.
    pub fn has_trusted_team(&self) -> bool {
        match &self.team_identifier {
            Some(team) => {
                let team = team.to_lowercase();
                TRUSTED_TEAMS.iter().any(|t| team.contains(t))
            }
            None => false,
        }
    }
}
