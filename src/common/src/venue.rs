//! Venue identity shared across adapters, matcher, and evaluator.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A binary-outcome marketplace the scanner polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Venue {
    Poly,
    Opinion,
    Predict,
    Kalshi,
}

impl Venue {
    pub const ALL: [Venue; 4] = [Venue::Poly, Venue::Opinion, Venue::Predict, Venue::Kalshi];

    pub fn as_str(&self) -> &'static str {
        match self {
            Venue::Poly => "poly",
            Venue::Opinion => "opinion",
            Venue::Predict => "predict",
            Venue::Kalshi => "kalshi",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "poly" | "polymarket" => Some(Venue::Poly),
            "opinion" => Some(Venue::Opinion),
            "predict" => Some(Venue::Predict),
            "kalshi" => Some(Venue::Kalshi),
            _ => None,
        }
    }

    /// Config section key, e.g. `venues.poly`.
    pub fn config_key(&self) -> &'static str {
        self.as_str()
    }

    /// Whether this venue exposes a realtime WebSocket feed (C6 worker eligibility).
    /// Kalshi, Opinion, and Predict expose REST-only market data; only
    /// Polymarket's CLOB stream qualifies, matching its adapter.
    pub fn has_realtime_feed(&self) -> bool {
        matches!(self, Venue::Poly)
    }
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Runtime health of a venue, surfaced on the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VenueStatus {
    Ok,
    Error,
    /// Set after `AuthenticationFailed`; permanent for the process lifetime.
    Disabled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_str() {
        for v in Venue::ALL {
            assert_eq!(Venue::from_str(v.as_str()), Some(v));
        }
    }

    #[test]
    fn unknown_venue_is_none() {
        assert_eq!(Venue::from_str("nope"), None);
    }
}
