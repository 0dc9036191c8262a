//! Closed tag sets shared by the wire protocol and the store.
//!
//! Every tag has one canonical upper-case spelling, which is what goes on
//! the wire and into the database. Parsing is case-insensitive and also
//! accepts the short aliases agents and operators use in practice
//! (`ALLOW` for `ALLOWLIST`, and so on).

use crate::error::FrameError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

macro_rules! wire_tag {
    (
        $(#[$meta:meta])*
        $name:ident, $kind:literal {
            $( $(#[$vmeta:meta])* $variant:ident => $canon:literal $(| $alias:literal)* ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "&'static str")]
        pub enum $name {
            $( $(#[$vmeta])* $variant, )+
        }

        impl $name {
            /// Every variant, in declaration order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// Returns the canonical wire spelling.
            pub const fn as_str(self) -> &'static str {
                match self {
                    $( $name::$variant => $canon, )+
                }
            }
        }

        impl FromStr for $name {
            type Err = FrameError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let upper = s.trim().to_ascii_uppercase();
                match upper.as_str() {
                    $( $canon $(| $alias)* => Ok($name::$variant), )+
                    _ => Err(FrameError::unknown_tag($kind, s)),
                }
            }
        }

        impl TryFrom<String> for $name {
            type Error = FrameError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }

        impl From<$name> for &'static str {
            fn from(value: $name) -> Self {
                value.as_str()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

wire_tag! {
    /// The decision a rule enforces on matching executions.
    Policy, "policy" {
        /// Allow execution.
        Allow => "ALLOWLIST" | "ALLOW",
        /// Block execution.
        Block => "BLOCKLIST" | "BLOCK",
    }
}

wire_tag! {
    /// What a rule identifier refers to.
    RuleType, "rule type" {
        /// SHA-256 of a binary.
        Binary => "BINARY",
        /// SHA-256 of a signing certificate.
        Certificate => "CERTIFICATE",
        /// Team-qualified signing identifier.
        SigningId => "SIGNINGID" | "SIGNING_ID",
        /// Apple developer team id.
        TeamId => "TEAMID" | "TEAM_ID",
        /// Code directory hash.
        CdHash => "CDHASH",
    }
}

wire_tag! {
    /// A voter's ballot on a proposal.
    VoteType, "vote type" {
        /// Vote to allow.
        Allow => "ALLOWLIST" | "ALLOW",
        /// Vote to block.
        Block => "BLOCKLIST" | "BLOCK",
    }
}

wire_tag! {
    /// Agent enforcement mode.
    ClientMode, "client mode" {
        /// Log only.
        Monitor => "MONITOR",
        /// Block anything not allowed.
        Lockdown => "LOCKDOWN",
    }
}

impl VoteType {
    /// The policy a proposal gets when this ballot side wins.
    pub const fn policy(self) -> Policy {
        match self {
            VoteType::Allow => Policy::Allow,
            VoteType::Block => Policy::Block,
        }
    }
}

impl ClientMode {
    /// Maps the legacy numeric encoding (`1` monitor, `2` lockdown).
    pub const fn from_legacy(code: i64) -> Option<Self> {
        match code {
            1 => Some(ClientMode::Monitor),
            2 => Some(ClientMode::Lockdown),
            _ => None,
        }
    }

    /// Normalizes whatever an agent sent as its mode.
    ///
    /// Accepts a symbolic string in any case, a legacy integer, or a
    /// string holding a legacy integer. Anything else means "no mode
    /// update" and yields `None`.
    pub fn normalize(raw: &serde_json::Value) -> Option<Self> {
        match raw {
            serde_json::Value::String(s) => s
                .parse()
                .ok()
                .or_else(|| s.trim().parse::<i64>().ok().and_then(Self::from_legacy)),
            serde_json::Value::Number(n) => n.as_i64().and_then(Self::from_legacy),
            _ => None,
        }
    }
}
