//! Constructs the four venue adapters from configuration and wraps them for
//! parallel dispatch (C9 bootstrap feeding C5/C6).

use std::sync::Arc;

use common::adapters::kalshi::KalshiAdapter;
use common::adapters::opinion::OpinionAdapter;
use common::adapters::polymarket::PolymarketAdapter;
use common::adapters::predict::PredictAdapter;
use common::adapters::VenueAdapter;
use common::Config;

#[derive(Clone)]
pub struct AdapterHandle {
    pub adapter: Arc<dyn VenueAdapter>,
}

pub fn build_adapters(config: &Config) -> Vec<AdapterHandle> {
    let mut handles = Vec::new();

    if let Some(v) = config.venues.get("poly") {
        handles.push(AdapterHandle {
            adapter: Arc::new(PolymarketAdapter::new(Some(v.base_url.clone()), None, v.cache_seconds)),
        });
    }
    if let Some(v) = config.venues.get("opinion") {
        handles.push(AdapterHandle {
            adapter: Arc::new(OpinionAdapter::new(
                Some(v.base_url.clone()),
                v.api_key.clone(),
                v.cache_seconds,
            )),
        });
    }
    if let Some(v) = config.venues.get("predict") {
        handles.push(AdapterHandle {
            adapter: Arc::new(PredictAdapter::new(
                Some(v.base_url.clone()),
                v.api_key.clone(),
                v.cache_seconds,
            )),
        });
    }
    if let Some(v) = config.venues.get("kalshi") {
        handles.push(AdapterHandle {
            adapter: Arc::new(KalshiAdapter::new(Some(v.base_url.clone()), v.cache_seconds)),
        });
    }

    handles
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::config::{ArbitrageConfig, DashboardConfig, TelegramConfig, VenueConfig};
    use common::Venue;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    fn base_config() -> Config {
        Config {
            arbitrage: ArbitrageConfig {
                min_arbitrage_threshold: dec!(2.0),
                scan_interval_secs: 15,
                cooldown_minutes: 5,
                trading_fee: dec!(0.005),
                derived_quote_penalty_pct: dec!(1.0),
                stale_opportunity_scans: 10,
            },
            venues: HashMap::new(),
            telegram: TelegramConfig { enabled: false, bot_token: String::new(), chat_id: String::new() },
            dashboard: DashboardConfig { host: "0.0.0.0".to_string(), port: 8080 },
        }
    }

    fn venue(base_url: &str) -> VenueConfig {
        VenueConfig { base_url: base_url.to_string(), api_key: None, cache_seconds: 60, min_similarity: 0.4 }
    }

    #[test]
    fn build_adapters_skips_unconfigured_venues() {
        let mut config = base_config();
        config.venues.insert("poly".to_string(), venue("https://gamma-api.polymarket.com"));

        let handles = build_adapters(&config);

        assert_eq!(handles.len(), 1);
        assert_eq!(handles[0].adapter.venue(), Venue::Poly);
    }

    #[test]
    fn build_adapters_constructs_one_handle_per_configured_venue() {
        let mut config = base_config();
        config.venues.insert("poly".to_string(), venue("https://gamma-api.polymarket.com"));
        config.venues.insert("kalshi".to_string(), venue("https://api.elections.kalshi.com/trade-api/v2"));
        config.venues.insert("opinion".to_string(), venue("https://proxy.opinion.trade:8443/openapi"));
        config.venues.insert("predict".to_string(), venue("https://api.predict.fun"));

        let handles = build_adapters(&config);

        assert_eq!(handles.len(), 4);
        let venues: Vec<Venue> = handles.iter().map(|h| h.adapter.venue()).collect();
        assert!(venues.contains(&Venue::Poly));
        assert!(venues.contains(&Venue::Kalshi));
        assert!(venues.contains(&Venue::Opinion));
        assert!(venues.contains(&Venue::Predict));
    }
}
