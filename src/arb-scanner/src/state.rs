//! Shared application state (§5): snapshots published by atomic pointer swap
//! so realtime workers and the dashboard never take a reader-side lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use common::{MarketSnapshot, MatchPair, Opportunity, OpportunityKey, Venue, VenueStatus};

/// Per-venue catalog plus health, published once per scan.
#[derive(Debug, Clone, Default)]
pub struct CatalogSnapshot {
    pub markets: HashMap<Venue, Vec<MarketSnapshot>>,
    pub status: HashMap<Venue, VenueStatus>,
}

/// Immutable lookup table from a market id to the match pairs it participates
/// in, rebuilt after every scan and read lock-free by realtime workers (§4.6).
#[derive(Debug, Clone, Default)]
pub struct MatchIndex {
    pub by_market: HashMap<(Venue, String), Vec<MatchPair>>,
}

impl MatchIndex {
    pub fn build(pairs: &[MatchPair]) -> Self {
        let mut by_market: HashMap<(Venue, String), Vec<MatchPair>> = HashMap::new();
        for pair in pairs {
            by_market
                .entry((pair.snapshot_a.venue, pair.snapshot_a.venue_market_id.clone()))
                .or_default()
                .push(pair.clone());
            by_market
                .entry((pair.snapshot_b.venue, pair.snapshot_b.venue_market_id.clone()))
                .or_default()
                .push(pair.clone());
        }
        Self { by_market }
    }
}

/// Scan-level counters surfaced on `/api/state` and `/health`.
#[derive(Debug, Clone, Default)]
pub struct ScanStats {
    pub scan_count: u64,
    pub last_scan_at: Option<DateTime<Utc>>,
    pub last_scan_ok: bool,
    pub consecutive_failures: u32,
}

/// Everything the dashboard and realtime workers read. The orchestrator
/// (C5) and realtime fan-out (C6) are the only writers; both publish through
/// `ArcSwap::store`, never by mutating a shared value in place.
pub struct AppState {
    pub catalogs: ArcSwap<CatalogSnapshot>,
    pub match_index: ArcSwap<MatchIndex>,
    pub opportunities: ArcSwap<HashMap<OpportunityKey, Opportunity>>,
    pub stats: ArcSwap<ScanStats>,
    pub effective_threshold: ArcSwap<rust_decimal::Decimal>,
    /// Held only around the dedup-and-merge step when publishing a new
    /// opportunity map; readers never take it (§5 shared-resource model).
    /// A plain `std::sync::Mutex` rather than `tokio::sync::Mutex` since the
    /// realtime worker's `on_update` callback is synchronous and must take
    /// it too (mirrors the per-market `book` lock in realtime.rs).
    pub opportunities_merge_lock: Mutex<()>,
}

impl AppState {
    pub fn new(default_threshold: rust_decimal::Decimal) -> Arc<Self> {
        Arc::new(Self {
            catalogs: ArcSwap::from_pointee(CatalogSnapshot::default()),
            match_index: ArcSwap::from_pointee(MatchIndex::default()),
            opportunities: ArcSwap::from_pointee(HashMap::new()),
            stats: ArcSwap::from_pointee(ScanStats::default()),
            effective_threshold: ArcSwap::from_pointee(default_threshold),
            opportunities_merge_lock: Mutex::new(()),
        })
    }

    pub fn top_opportunities(&self, n: usize) -> Vec<Opportunity> {
        let mut opps: Vec<Opportunity> = self.opportunities.load().values().cloned().collect();
        opps.sort_by(|a, b| b.edge_pct.cmp(&a.edge_pct));
        opps.truncate(n);
        opps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{Direction, MarketRef};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn snapshot(venue: Venue, id: &str) -> MarketSnapshot {
        MarketSnapshot {
            venue,
            venue_market_id: id.to_string(),
            title: "title".to_string(),
            yes_ask: Some(dec!(0.4)),
            yes_bid: None,
            no_ask: Some(dec!(0.55)),
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

    fn pair(id_a: &str, id_b: &str) -> MatchPair {
        MatchPair {
            snapshot_a: snapshot(Venue::Poly, id_a),
            snapshot_b: snapshot(Venue::Kalshi, id_b),
            confidence: 1.0,
            match_reason: "manual".to_string(),
        }
    }

    fn opportunity(id_a: &str, id_b: &str, edge_pct: Decimal) -> Opportunity {
        let now = chrono::DateTime::<Utc>::from_timestamp(0, 0).unwrap();
        Opportunity {
            market_a: MarketRef { venue: Venue::Poly, venue_market_id: id_a.to_string(), title: "a".to_string() },
            market_b: MarketRef { venue: Venue::Kalshi, venue_market_id: id_b.to_string(), title: "b".to_string() },
            direction: Direction::AYesBNo,
            combined_price: dec!(0.9),
            edge_pct,
            ask_size_min: None,
            confidence: 1.0,
            first_seen_at: now,
            last_seen_at: now,
            last_notified_at: None,
            consecutive_misses: 0,
        }
    }

    #[test]
    fn match_index_indexes_both_legs_by_venue_and_id() {
        let idx = MatchIndex::build(&[pair("p1", "k1")]);
        assert_eq!(idx.by_market[&(Venue::Poly, "p1".to_string())].len(), 1);
        assert_eq!(idx.by_market[&(Venue::Kalshi, "k1".to_string())].len(), 1);
        assert!(!idx.by_market.contains_key(&(Venue::Poly, "k1".to_string())));
    }

    #[test]
    fn match_index_collects_multiple_pairs_touching_same_market() {
        let idx = MatchIndex::build(&[pair("p1", "k1"), pair("p1", "k2")]);
        assert_eq!(idx.by_market[&(Venue::Poly, "p1".to_string())].len(), 2);
    }

    #[test]
    fn top_opportunities_sorts_descending_and_truncates() {
        let state = AppState::new(dec!(2.0));
        let mut map = HashMap::new();
        let a = opportunity("p1", "k1", dec!(3.0));
        let b = opportunity("p2", "k2", dec!(5.0));
        let c = opportunity("p3", "k3", dec!(1.0));
        map.insert(a.key(), a);
        map.insert(b.key(), b);
        map.insert(c.key(), c);
        state.opportunities.store(Arc::new(map));

        let top = state.top_opportunities(2);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].edge_pct, dec!(5.0));
        assert_eq!(top[1].edge_pct, dec!(3.0));
    }
}
