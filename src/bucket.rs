use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::CueClubError;

/// Named top-level slots of the persisted document. The store itself is
/// shape-agnostic; each bucket's value is owned by the screen that uses it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Bucket {
    #[serde(rename = "settings")]
    Settings,
    #[serde(rename = "tables")]
    Tables,
    #[serde(rename = "users")]
    Users,
    #[serde(rename = "transactions")]
    Transactions,
    #[serde(rename = "dayClosures")]
    DayClosures,
    #[serde(rename = "expenses")]
    Expenses,
    #[serde(rename = "emergencyPin")]
    EmergencyPin,
    #[serde(rename = "reservations")]
    Reservations,
    #[serde(rename = "loyaltyConfig")]
    LoyaltyConfig,
}

impl Bucket {
    pub const ALL: [Bucket; 9] = [
        Bucket::Settings,
        Bucket::Tables,
        Bucket::Users,
        Bucket::Transactions,
        Bucket::DayClosures,
        Bucket::Expenses,
        Bucket::EmergencyPin,
        Bucket::Reservations,
        Bucket::LoyaltyConfig,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            Bucket::Settings => "settings",
            Bucket::Tables => "tables",
            Bucket::Users => "users",
            Bucket::Transactions => "transactions",
            Bucket::DayClosures => "dayClosures",
            Bucket::Expenses => "expenses",
            Bucket::EmergencyPin => "emergencyPin",
            Bucket::Reservations => "reservations",
            Bucket::LoyaltyConfig => "loyaltyConfig",
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Bucket {
    type Err = CueClubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Bucket::ALL
            .iter()
            .copied()
            .find(|bucket| bucket.key() == s)
            .ok_or_else(|| CueClubError::Storage(format!("unknown bucket `{}`", s)))
    }
}
