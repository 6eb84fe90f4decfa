//! Core data model shared by the matcher, evaluator, orchestrator, and realtime fan-out.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::venue::Venue;

/// A point-in-time view of one market on one venue.
///
/// Snapshots with a missing or zero ask on either side must be dropped before
/// evaluation; see [`MarketSnapshot::has_valid_quotes`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub venue: Venue,
    pub venue_market_id: String,
    pub title: String,
    pub yes_ask: Option<Decimal>,
    pub yes_bid: Option<Decimal>,
    pub no_ask: Option<Decimal>,
    pub no_bid: Option<Decimal>,
    pub ask_size_yes: Option<Decimal>,
    pub ask_size_no: Option<Decimal>,
    pub liquidity_usd: Option<Decimal>,
    pub volume_24h_usd: Option<Decimal>,
    pub end_time: Option<DateTime<Utc>>,
    pub url: Option<String>,
    /// True if one side's quote was computed as `1 - yes_bid`/`1 - yes_ask`
    /// rather than read directly from the venue's book.
    pub derived: bool,
}

impl MarketSnapshot {
    /// `0 < yes_ask, no_ask < 1` — required before this snapshot may feed the evaluator.
    pub fn has_valid_quotes(&self) -> bool {
        let in_range = |d: Decimal| d > Decimal::ZERO && d < Decimal::ONE;
        matches!(self.yes_ask, Some(a) if in_range(a)) && matches!(self.no_ask, Some(a) if in_range(a))
    }
}

/// Which binary side a [`QuoteUpdate`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Yes,
    No,
}

/// A differential update from a venue's realtime stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteUpdate {
    pub venue: Venue,
    pub venue_market_id: String,
    pub side: Side,
    pub best_bid: Option<Decimal>,
    pub best_ask: Option<Decimal>,
    pub timestamp: DateTime<Utc>,
}

/// One leg of an editorial cross-venue event pin.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MappingLeg {
    pub venue_market_id: String,
    pub outcome_label: String,
}

/// An editorial record pinning one real-world event across venues.
///
/// Loaded once at startup from a config file; immutable thereafter.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ManualMapping {
    pub slug: String,
    pub description: String,
    /// `outcome_key -> venue -> leg`.
    pub outcomes: HashMap<String, HashMap<Venue, MappingLeg>>,
}

/// A matched pair of markets across venues, produced by the matcher.
///
/// `confidence == 1.0` iff produced via the manual map.
#[derive(Debug, Clone)]
pub struct MatchPair {
    pub snapshot_a: MarketSnapshot,
    pub snapshot_b: MarketSnapshot,
    pub confidence: f64,
    pub match_reason: String,
}

impl MatchPair {
    pub fn key(&self) -> OpportunityKey {
        OpportunityKey {
            venue_a: self.snapshot_a.venue,
            venue_market_id_a: self.snapshot_a.venue_market_id.clone(),
            venue_b: self.snapshot_b.venue,
            venue_market_id_b: self.snapshot_b.venue_market_id.clone(),
        }
    }
}

/// Which side is bought YES and which is bought NO.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Buy YES on market A, buy NO on market B.
    AYesBNo,
    /// Buy YES on market B, buy NO on market A.
    BYesANo,
}

/// Identifies an opportunity independent of its direction's scoring.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OpportunityKey {
    pub venue_a: Venue,
    pub venue_market_id_a: String,
    pub venue_b: Venue,
    pub venue_market_id_b: String,
}

/// A cross-venue arbitrage opportunity surviving both the evaluator's
/// threshold test and the orchestrator's merge-with-prior-state step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Opportunity {
    pub market_a: MarketRef,
    pub market_b: MarketRef,
    pub direction: Direction,
    pub combined_price: Decimal,
    pub edge_pct: Decimal,
    pub ask_size_min: Option<Decimal>,
    pub confidence: f64,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub last_notified_at: Option<DateTime<Utc>>,
    /// Consecutive scans in which this opportunity's pair was absent from the
    /// fresh match set. Reset to 0 whenever re-observed; the entry is dropped
    /// once this exceeds `arbitrage.stale_opportunity_scans`.
    pub consecutive_misses: u32,
}

/// Denormalized reference to one leg of an opportunity for display purposes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketRef {
    pub venue: Venue,
    pub venue_market_id: String,
    pub title: String,
}

impl Opportunity {
    pub fn key(&self) -> OpportunityKey {
        OpportunityKey {
            venue_a: self.market_a.venue,
            venue_market_id_a: self.market_a.venue_market_id.clone(),
            venue_b: self.market_b.venue,
            venue_market_id_b: self.market_b.venue_market_id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn snapshot(venue: Venue, yes_ask: Decimal, no_ask: Decimal) -> MarketSnapshot {
        MarketSnapshot {
            venue,
            venue_market_id: "m".to_string(),
            title: "title".to_string(),
            yes_ask: Some(yes_ask),
            yes_bid: None,
            no_ask: Some(no_ask),
            no_bid: None,
            ask_size_yes: None,
            ask_size_no: None,
            liquidity_usd: None,
            volume_24h_usd: None,
            end_time: None,
            url: None,
            derived: false,
        }
    }

    #[test]
    fn valid_quotes_require_both_sides_in_open_interval() {
        assert!(snapshot(Venue::Poly, dec!(0.4), dec!(0.55)).has_valid_quotes());
        assert!(!snapshot(Venue::Poly, dec!(0.0), dec!(0.55)).has_valid_quotes());
        assert!(!snapshot(Venue::Poly, dec!(1.0), dec!(0.55)).has_valid_quotes());
    }
}
