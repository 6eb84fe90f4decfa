//! Realtime fan-out (C6): one worker per venue exposing a WebSocket feed.
//! Maintains per-market top-of-book state and incrementally re-evaluates
//! opportunities touching each updated market, publishing rising/falling
//! edge transitions without blocking on other markets.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use common::{evaluate, EvaluatorConfig, MatchPair, Opportunity, QuoteUpdate, Side};
use tracing::{info, warn};

use crate::adapters_registry::AdapterHandle;
use crate::state::AppState;

const TARGET_TOP_N: usize = 150;

struct BookEntry {
    yes_bid: Option<rust_decimal::Decimal>,
    yes_ask: Option<rust_decimal::Decimal>,
    no_bid: Option<rust_decimal::Decimal>,
    no_ask: Option<rust_decimal::Decimal>,
}

/// Applies one `QuoteUpdate` onto whichever leg of a match pair it refers to.
fn apply_update(pair: &mut MatchPair, update: &QuoteUpdate) {
    let target = if pair.snapshot_a.venue == update.venue
        && pair.snapshot_a.venue_market_id == update.venue_market_id
    {
        Some(&mut pair.snapshot_a)
    } else if pair.snapshot_b.venue == update.venue
        && pair.snapshot_b.venue_market_id == update.venue_market_id
    {
        Some(&mut pair.snapshot_b)
    } else {
        None
    };

    if let Some(snapshot) = target {
        match update.side {
            Side::Yes => {
                if update.best_bid.is_some() {
                    snapshot.yes_bid = update.best_bid;
                    snapshot.no_ask = update.best_bid.map(|b| rust_decimal::Decimal::ONE - b);
                }
                if update.best_ask.is_some() {
                    snapshot.yes_ask = update.best_ask;
                    snapshot.no_bid = update.best_ask.map(|a| rust_decimal::Decimal::ONE - a);
                }
            }
            Side::No => {
                if update.best_bid.is_some() {
                    snapshot.no_bid = update.best_bid;
                }
                if update.best_ask.is_some() {
                    snapshot.no_ask = update.best_ask;
                }
            }
        }
        snapshot.derived = true;
    }
}

/// Picks the subscription target set: top-N by 24h volume on the venue,
/// union every market currently participating in a live opportunity (§4.6).
fn target_market_ids(state: &AppState, venue: common::Venue) -> Vec<String> {
    let catalogs = state.catalogs.load();
    let mut ids: Vec<String> = catalogs
        .markets
        .get(&venue)
        .map(|markets| {
            let mut sorted = markets.clone();
            sorted.sort_by(|a, b| b.volume_24h_usd.cmp(&a.volume_24h_usd));
            sorted
                .into_iter()
                .take(TARGET_TOP_N)
                .map(|m| m.venue_market_id)
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    for opp in state.opportunities.load().values() {
        if opp.market_a.venue == venue {
            ids.push(opp.market_a.venue_market_id.clone());
        }
        if opp.market_b.venue == venue {
            ids.push(opp.market_b.venue_market_id.clone());
        }
    }
    ids.sort();
    ids.dedup();
    ids
}

pub struct RealtimeWorker {
    pub adapter: AdapterHandle,
    pub state: Arc<AppState>,
    pub evaluator_config: EvaluatorConfig,
    pub on_new_opportunity: Arc<dyn Fn(Opportunity) + Send + Sync>,
}

impl RealtimeWorker {
    /// Runs until the adapter's own reconnect budget is exhausted
    /// (`SubscriptionDied`), at which point the orchestrator's polling path
    /// remains the sole source of truth for this venue.
    pub async fn run(self) {
        let venue = self.adapter.adapter.venue();
        if !self.adapter.adapter.supports_realtime() {
            return;
        }

        let book: Arc<Mutex<HashMap<String, BookEntry>>> = Arc::new(Mutex::new(HashMap::new()));
        let state = self.state.clone();
        let evaluator_config = self.evaluator_config;
        let on_new_opportunity = self.on_new_opportunity.clone();
        let book_for_callback = book.clone();

        let on_update = Arc::new(move |update: QuoteUpdate| {
            let mut guard = book_for_callback.lock().unwrap();
            let entry = guard.entry(update.venue_market_id.clone()).or_insert(BookEntry {
                yes_bid: None,
                yes_ask: None,
                no_bid: None,
                no_ask: None,
            });
            match update.side {
                Side::Yes => {
                    entry.yes_bid = update.best_bid.or(entry.yes_bid);
                    entry.yes_ask = update.best_ask.or(entry.yes_ask);
                }
                Side::No => {
                    entry.no_bid = update.best_bid.or(entry.no_bid);
                    entry.no_ask = update.best_ask.or(entry.no_ask);
                }
            }
            drop(guard);

            let index = state.match_index.load();
            let Some(pairs) = index.by_market.get(&(update.venue, update.venue_market_id.clone())) else {
                return;
            };

            for pair in pairs {
                let mut pair = pair.clone();
                apply_update(&mut pair, &update);
                if let Some(opp) = evaluate(&pair, &evaluator_config, Utc::now()) {
                    let key = opp.key();
                    let was_live;
                    {
                        let _guard = state.opportunities_merge_lock.lock().unwrap();
                        was_live = state.opportunities.load().contains_key(&key);
                        let mut opportunities = (*state.opportunities.load_full()).clone();
                        opportunities.insert(key, opp.clone());
                        state.opportunities.store(Arc::new(opportunities));
                    }
                    if !was_live {
                        on_new_opportunity(opp);
                    }
                }
            }
        });

        let target_ids = target_market_ids(&self.state, venue);
        info!(%venue, count = target_ids.len(), "starting realtime subscription");

        match self.adapter.adapter.subscribe(target_ids, on_update).await {
            Ok(()) => info!(%venue, "realtime subscription ended cleanly"),
            Err(e) => warn!(%venue, error = %e, "realtime subscription died; falling back to polling"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Venue;
    use rust_decimal_macros::dec;

    fn snapshot(venue: Venue, id: &str) -> common::MarketSnapshot {
        common::MarketSnapshot {
            venue,
            venue_market_id: id.to_string(),
            title: "title".to_string(),
            yes_ask: Some(dec!(0.4)),
            yes_bid: Some(dec!(0.38)),
            no_ask: Some(dec!(0.62)),
            no_bid: Some(dec!(0.6)),
            ask_size_yes: None,
            ask_size_no: None,
            liquidity_usd: None,
            volume_24h_usd: Some(dec!(1000)),
            end_time: None,
            url: None,
            derived: false,
        }
    }

    fn update(venue: Venue, id: &str, side: Side, bid: Option<rust_decimal::Decimal>, ask: Option<rust_decimal::Decimal>) -> QuoteUpdate {
        QuoteUpdate {
            venue,
            venue_market_id: id.to_string(),
            side,
            best_bid: bid,
            best_ask: ask,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn apply_update_patches_matching_leg_a() {
        let mut pair = MatchPair {
            snapshot_a: snapshot(Venue::Poly, "p1"),
            snapshot_b: snapshot(Venue::Kalshi, "k1"),
            confidence: 1.0,
            match_reason: "manual".to_string(),
        };
        let upd = update(Venue::Poly, "p1", Side::Yes, Some(dec!(0.3)), Some(dec!(0.35)));

        apply_update(&mut pair, &upd);

        assert_eq!(pair.snapshot_a.yes_bid, Some(dec!(0.3)));
        assert_eq!(pair.snapshot_a.yes_ask, Some(dec!(0.35)));
        assert_eq!(pair.snapshot_a.no_ask, Some(rust_decimal::Decimal::ONE - dec!(0.3)));
        assert_eq!(pair.snapshot_a.no_bid, Some(rust_decimal::Decimal::ONE - dec!(0.35)));
        assert!(pair.snapshot_a.derived);
        assert_eq!(pair.snapshot_b.yes_bid, Some(dec!(0.38)));
    }

    #[test]
    fn apply_update_ignores_market_not_in_pair() {
        let mut pair = MatchPair {
            snapshot_a: snapshot(Venue::Poly, "p1"),
            snapshot_b: snapshot(Venue::Kalshi, "k1"),
            confidence: 1.0,
            match_reason: "manual".to_string(),
        };
        let before_derived_a = pair.snapshot_a.derived;
        let before_derived_b = pair.snapshot_b.derived;
        let upd = update(Venue::Poly, "unrelated", Side::Yes, Some(dec!(0.3)), Some(dec!(0.35)));

        apply_update(&mut pair, &upd);

        assert_eq!(pair.snapshot_a.derived, before_derived_a);
        assert_eq!(pair.snapshot_b.derived, before_derived_b);
    }

    #[test]
    fn apply_update_on_no_side_does_not_touch_yes() {
        let mut pair = MatchPair {
            snapshot_a: snapshot(Venue::Poly, "p1"),
            snapshot_b: snapshot(Venue::Kalshi, "k1"),
            confidence: 1.0,
            match_reason: "manual".to_string(),
        };
        let upd = update(Venue::Kalshi, "k1", Side::No, Some(dec!(0.61)), Some(dec!(0.63)));

        apply_update(&mut pair, &upd);

        assert_eq!(pair.snapshot_b.no_bid, Some(dec!(0.61)));
        assert_eq!(pair.snapshot_b.no_ask, Some(dec!(0.63)));
        assert_eq!(pair.snapshot_b.yes_bid, Some(dec!(0.38)));
    }

    #[test]
    fn target_market_ids_unions_top_volume_and_live_opportunity_markets() {
        use crate::state::AppState;
        use common::{Direction, MarketRef, Opportunity};

        let state = AppState::new(dec!(2.0));
        state.catalogs.store(Arc::new(crate::state::CatalogSnapshot {
            markets: HashMap::from([(Venue::Poly, vec![snapshot(Venue::Poly, "top1")])]),
            status: HashMap::new(),
        }));

        let now = chrono::DateTime::<Utc>::from_timestamp(0, 0).unwrap();
        let opp = Opportunity {
            market_a: MarketRef { venue: Venue::Poly, venue_market_id: "pinned".to_string(), title: "a".to_string() },
            market_b: MarketRef { venue: Venue::Kalshi, venue_market_id: "k9".to_string(), title: "b".to_string() },
            direction: Direction::AYesBNo,
            combined_price: dec!(0.9),
            edge_pct: dec!(3.0),
            ask_size_min: None,
            confidence: 1.0,
            first_seen_at: now,
            last_seen_at: now,
            last_notified_at: None,
            consecutive_misses: 0,
        };
        let mut map = HashMap::new();
        map.insert(opp.key(), opp);
        state.opportunities.store(Arc::new(map));

        let ids = target_market_ids(&state, Venue::Poly);

        assert!(ids.contains(&"top1".to_string()));
        assert!(ids.contains(&"pinned".to_string()));
        assert!(!ids.contains(&"k9".to_string()));
    }
}
