//! Classification of adapter disconnect reasons (§4.6, §7).

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DisconnectReason {
    Conflict,
    Unpaired,
    Navigation,
    Timeout,
    NetworkError,
    Logout,
    Banned,
    TosBlock,
    SmbTosBlock,
    Other,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Conflict => "CONFLICT",
            Self::Unpaired => "UNPAIRED",
            Self::Navigation => "NAVIGATION",
            Self::Timeout => "TIMEOUT",
            Self::NetworkError => "NETWORK_ERROR",
            Self::Logout => "LOGOUT",
            Self::Banned => "BANNED",
            Self::TosBlock => "TOS_BLOCK",
            Self::SmbTosBlock => "SMB_TOS_BLOCK",
            Self::Other => "OTHER",
        };
        f.write_str(s)
    }
}

impl DisconnectReason {
    /// `IMMEDIATE_REASONS` — short, near-zero backoff.
    pub fn is_immediate(self) -> bool {
        matches!(
            self,
            Self::Conflict | Self::Unpaired | Self::Navigation | Self::Timeout | Self::NetworkError
        )
    }

    /// `NO_RECONNECT_REASONS` — permanently disable reconnection and clear
    /// `enabled` in the instance metadata store.
    pub fn is_permanent(self) -> bool {
        matches!(
            self,
            Self::Logout | Self::TosBlock | Self::SmbTosBlock | Self::Banned
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn immediate_reasons_match_spec() {
        for r in [
            DisconnectReason::Conflict,
            DisconnectReason::Unpaired,
            DisconnectReason::Navigation,
            DisconnectReason::Timeout,
            DisconnectReason::NetworkError,
        ] {
            assert!(r.is_immediate());
            assert!(!r.is_permanent());
        }
    }

    #[test]
    fn permanent_reasons_match_spec() {
        for r in [
            DisconnectReason::Logout,
            DisconnectReason::TosBlock,
            DisconnectReason::SmbTosBlock,
            DisconnectReason::Banned,
        ] {
            assert!(r.is_permanent());
            assert!(!r.is_immediate());
        }
    }

    #[test]
    fn other_is_neither() {
        assert!(!DisconnectReason::Other.is_immediate());
        assert!(!DisconnectReason::Other.is_permanent());
    }
}
