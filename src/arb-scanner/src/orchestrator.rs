//! Scan orchestrator (C5): the periodic control loop. Fetches every enabled
//! venue's catalog in parallel, matches every unordered venue pair, evaluates
//! both directions, merges with prior state, and publishes by pointer swap.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::{evaluate, match_catalogs, Config, EvaluatorConfig, ManualMapping, MatchPair, Opportunity, VenueStatus};
use tokio::time::timeout;
use tracing::{info, warn};

use crate::adapters_registry::AdapterHandle;
use crate::dashboard::DashboardState;
use crate::state::{AppState, CatalogSnapshot, MatchIndex, ScanStats};

const CATALOG_FETCH_TIMEOUT: Duration = Duration::from_secs(15);
const MAX_CONSECUTIVE_FAILURES: u32 = 5;
const COOLOFF: Duration = Duration::from_secs(30);

/// Merges a freshly evaluated opportunity into prior state, retaining
/// `first_seen_at` when the edge barely moved (§3 lifecycles) and resetting
/// the miss counter since the pair was just re-observed.
fn merge_opportunity(
    prior: Option<&Opportunity>,
    mut fresh: Opportunity,
) -> Opportunity {
    if let Some(prior) = prior {
        let delta = (fresh.edge_pct - prior.edge_pct).abs();
        if delta < rust_decimal::Decimal::new(5, 1) {
            fresh.first_seen_at = prior.first_seen_at;
        }
        fresh.last_notified_at = prior.last_notified_at;
    }
    fresh.consecutive_misses = 0;
    fresh
}

pub struct Orchestrator {
    pub state: Arc<AppState>,
    pub adapters: Vec<AdapterHandle>,
    pub manual_mappings: Vec<ManualMapping>,
    pub evaluator_config: EvaluatorConfig,
    pub config: Config,
    pub on_new_opportunity: Arc<dyn Fn(Opportunity) + Send + Sync>,
    pub dashboard: Option<Arc<DashboardState>>,
}

impl Orchestrator {
    /// Run one scan cycle. Used directly by `scan-once` and looped by `run`.
    pub async fn scan_once(&self) -> anyhow::Result<usize> {
        let mut catalogs: HashMap<common::Venue, Vec<common::MarketSnapshot>> = HashMap::new();
        let mut statuses: HashMap<common::Venue, VenueStatus> = HashMap::new();

        let fetches = self.adapters.iter().map(|h| {
            let adapter = h.adapter.clone();
            async move {
                let venue = adapter.venue();
                let result = timeout(CATALOG_FETCH_TIMEOUT, adapter.list_markets(common::adapters::StatusFilter::Open)).await;
                (venue, result)
            }
        });
        let results = futures_util::future::join_all(fetches).await;

        for (venue, result) in results {
            match result {
                Ok(Ok(markets)) => {
                    statuses.insert(venue, VenueStatus::Ok);
                    catalogs.insert(venue, markets);
                }
                Ok(Err(common::AdapterError::AuthenticationFailed { .. })) => {
                    warn!(%venue, "authentication failed, disabling venue for process lifetime");
                    statuses.insert(venue, VenueStatus::Disabled);
                }
                Ok(Err(e)) => {
                    warn!(%venue, error = %e, "catalog fetch failed");
                    statuses.insert(venue, VenueStatus::Error);
                }
                Err(_) => {
                    warn!(%venue, "catalog fetch timed out");
                    statuses.insert(venue, VenueStatus::Error);
                }
            }
        }

        let venues: Vec<common::Venue> = catalogs.keys().copied().collect();
        let mut all_pairs: Vec<MatchPair> = Vec::new();
        for i in 0..venues.len() {
            for j in (i + 1)..venues.len() {
                let (va, vb) = (venues[i], venues[j]);
                let catalog_a = &catalogs[&va];
                let catalog_b = &catalogs[&vb];
                if catalog_a.is_empty() || catalog_b.is_empty() {
                    continue;
                }
                let min_similarity = self
                    .config
                    .venues
                    .get(va.as_str())
                    .zip(self.config.venues.get(vb.as_str()))
                    .map(|(a, b)| a.min_similarity.max(b.min_similarity))
                    .unwrap_or_else(common::matcher::default_min_similarity);
                let pairs = match_catalogs(catalog_a, catalog_b, &self.manual_mappings, min_similarity);
                all_pairs.extend(pairs);
            }
        }

        let now = Utc::now();
        let opportunity_count;
        {
            let _guard = self.state.opportunities_merge_lock.lock().unwrap();
            let prior = self.state.opportunities.load();
            let mut fresh_map: HashMap<common::OpportunityKey, Opportunity> = HashMap::new();

            for pair in &all_pairs {
                if let Some(opp) = evaluate(pair, &self.evaluator_config, now) {
                    let key = opp.key();
                    let is_new = !prior.contains_key(&key);
                    let merged = merge_opportunity(prior.get(&key), opp);
                    if is_new {
                        (self.on_new_opportunity)(merged.clone());
                    }
                    fresh_map.insert(key, merged);
                }
            }

            let stale_limit = self.config.arbitrage.stale_opportunity_scans;
            for (key, stale) in prior.iter() {
                if fresh_map.contains_key(key) {
                    continue;
                }
                if stale.consecutive_misses + 1 <= stale_limit {
                    let mut carried = stale.clone();
                    carried.consecutive_misses += 1;
                    fresh_map.insert(key.clone(), carried);
                }
            }

            opportunity_count = fresh_map.len();
            self.state.opportunities.store(Arc::new(fresh_map));
        }

        self.state.catalogs.store(Arc::new(CatalogSnapshot {
            markets: catalogs,
            status: statuses,
        }));
        self.state.match_index.store(Arc::new(MatchIndex::build(&all_pairs)));

        let prior_stats = self.state.stats.load();
        self.state.stats.store(Arc::new(ScanStats {
            scan_count: prior_stats.scan_count + 1,
            last_scan_at: Some(now),
            last_scan_ok: true,
            consecutive_failures: 0,
        }));

        info!(opportunity_count, pair_count = all_pairs.len(), "scan complete");

        if let Some(dashboard) = &self.dashboard {
            dashboard.notify_state_changed();
        }

        Ok(opportunity_count)
    }

    /// Run forever at `scan_interval_secs`, coalescing overlapping ticks and
    /// cooling off after repeated failures (§4.5).
    pub async fn run(self: Arc<Self>) {
        let interval_secs = self.evaluator_config_scan_interval();
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        let mut consecutive_failures: u32 = 0;
        let running = Arc::new(tokio::sync::Mutex::new(()));

        loop {
            ticker.tick().await;
            let Ok(_guard) = running.clone().try_lock_owned() else {
                warn!("previous scan still running, skipping this tick");
                continue;
            };

            match self.scan_once().await {
                Ok(_) => consecutive_failures = 0,
                Err(e) => {
                    consecutive_failures += 1;
                    warn!(error = %e, consecutive_failures, "scan failed");
                    let prior_stats = self.state.stats.load();
                    self.state.stats.store(Arc::new(ScanStats {
                        scan_count: prior_stats.scan_count,
                        last_scan_at: prior_stats.last_scan_at,
                        last_scan_ok: false,
                        consecutive_failures,
                    }));
                    if consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                        warn!("cooling off after {MAX_CONSECUTIVE_FAILURES} consecutive failures");
                        tokio::time::sleep(COOLOFF).await;
                        consecutive_failures = 0;
                    }
                }
            }
        }
    }

    fn evaluator_config_scan_interval(&self) -> u64 {
        self.config.arbitrage.scan_interval_secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{Direction, MarketRef, Venue};
    use rust_decimal_macros::dec;

    fn opportunity(edge_pct: rust_decimal::Decimal, first_seen_at: chrono::DateTime<Utc>) -> Opportunity {
        Opportunity {
            market_a: MarketRef { venue: Venue::Poly, venue_market_id: "p1".to_string(), title: "a".to_string() },
            market_b: MarketRef { venue: Venue::Kalshi, venue_market_id: "k1".to_string(), title: "b".to_string() },
            direction: Direction::AYesBNo,
            combined_price: dec!(0.9),
            edge_pct,
            ask_size_min: None,
            confidence: 1.0,
            first_seen_at,
            last_seen_at: first_seen_at,
            last_notified_at: None,
            consecutive_misses: 0,
        }
    }

    #[test]
    fn merge_keeps_first_seen_when_edge_barely_moves() {
        let t0 = chrono::DateTime::<Utc>::from_timestamp(1_000, 0).unwrap();
        let t1 = chrono::DateTime::<Utc>::from_timestamp(2_000, 0).unwrap();
        let prior = opportunity(dec!(3.0), t0);
        let fresh = opportunity(dec!(3.2), t1);

        let merged = merge_opportunity(Some(&prior), fresh);

        assert_eq!(merged.first_seen_at, t0);
        assert_eq!(merged.last_seen_at, t1);
    }

    #[test]
    fn merge_resets_first_seen_when_edge_jumps() {
        let t0 = chrono::DateTime::<Utc>::from_timestamp(1_000, 0).unwrap();
        let t1 = chrono::DateTime::<Utc>::from_timestamp(2_000, 0).unwrap();
        let prior = opportunity(dec!(3.0), t0);
        let fresh = opportunity(dec!(6.0), t1);

        let merged = merge_opportunity(Some(&prior), fresh);

        assert_eq!(merged.first_seen_at, t1);
    }

    #[test]
    fn merge_preserves_prior_last_notified_at() {
        let t0 = chrono::DateTime::<Utc>::from_timestamp(1_000, 0).unwrap();
        let mut prior = opportunity(dec!(3.0), t0);
        prior.last_notified_at = Some(t0);
        let fresh = opportunity(dec!(3.0), t0);

        let merged = merge_opportunity(Some(&prior), fresh);

        assert_eq!(merged.last_notified_at, Some(t0));
    }

    #[test]
    fn merge_with_no_prior_passes_fresh_through() {
        let t0 = chrono::DateTime::<Utc>::from_timestamp(1_000, 0).unwrap();
        let fresh = opportunity(dec!(3.0), t0);

        let merged = merge_opportunity(None, fresh.clone());

        assert_eq!(merged.first_seen_at, fresh.first_seen_at);
        assert_eq!(merged.last_notified_at, None);
    }

    #[test]
    fn merge_resets_consecutive_misses_on_reobservation() {
        let t0 = chrono::DateTime::<Utc>::from_timestamp(1_000, 0).unwrap();
        let mut prior = opportunity(dec!(3.0), t0);
        prior.consecutive_misses = 4;
        let fresh = opportunity(dec!(3.0), t0);

        let merged = merge_opportunity(Some(&prior), fresh);

        assert_eq!(merged.consecutive_misses, 0);
    }

    #[test]
    fn stale_opportunity_carried_forward_until_miss_limit_exceeded() {
        let t0 = chrono::DateTime::<Utc>::from_timestamp(1_000, 0).unwrap();
        let mut prior_map: HashMap<common::OpportunityKey, Opportunity> = HashMap::new();
        let mut stale = opportunity(dec!(3.0), t0);
        stale.consecutive_misses = 2;
        let key = stale.key();
        prior_map.insert(key.clone(), stale);

        let stale_limit: u32 = 3;
        let fresh_map: HashMap<common::OpportunityKey, Opportunity> = HashMap::new();

        let mut carried_map = fresh_map;
        for (k, v) in prior_map.iter() {
            if carried_map.contains_key(k) {
                continue;
            }
            if v.consecutive_misses + 1 <= stale_limit {
                let mut carried = v.clone();
                carried.consecutive_misses += 1;
                carried_map.insert(k.clone(), carried);
            }
        }

        assert_eq!(carried_map[&key].consecutive_misses, 3);

        let mut carried_map_2: HashMap<common::OpportunityKey, Opportunity> = HashMap::new();
        for (k, v) in prior_map.iter() {
            if v.consecutive_misses + 1 <= 2 {
                carried_map_2.insert(k.clone(), v.clone());
            }
        }
        assert!(!carried_map_2.contains_key(&key));
    }
}
