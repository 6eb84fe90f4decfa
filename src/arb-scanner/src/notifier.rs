//! Notification broker (C7): deduplicates by `(marketA, marketB, direction)`
//! with a cooldown window, then dispatches to every enabled sink best-effort.
//! Formatting is grounded in the original Telegram notifier's layout
//! (per-leg buy/sell annotation, combined price, edge) generalized to the
//! title-based `Opportunity` type.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use common::{Config, Direction, Opportunity, OpportunityKey};
use tracing::{info, warn};

#[async_trait::async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, message: &str);
}

/// Always-on sink: surfaces opportunities at `info` level so local/dev runs
/// without Telegram configured still see them.
pub struct LogSink;

#[async_trait::async_trait]
impl NotificationSink for LogSink {
    async fn send(&self, message: &str) {
        info!("{message}");
    }
}

/// HTTP POST to the Telegram Bot API `sendMessage` endpoint.
pub struct TelegramSink {
    client: reqwest::Client,
    bot_token: String,
    chat_id: String,
}

impl TelegramSink {
    pub fn new(bot_token: String, chat_id: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            bot_token,
            chat_id,
        }
    }
}

#[async_trait::async_trait]
impl NotificationSink for TelegramSink {
    async fn send(&self, message: &str) {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);
        let escaped = message.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;");
        let result = self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "chat_id": self.chat_id,
                "text": escaped,
                "parse_mode": "HTML",
            }))
            .timeout(std::time::Duration::from_secs(15))
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => info!("telegram: dispatched"),
            Ok(resp) => warn!("telegram: non-success status {}", resp.status()),
            Err(e) => warn!("telegram: dispatch failed: {e}"),
        }
    }
}

fn format_opportunity(opp: &Opportunity) -> String {
    let (buy_yes, buy_no) = match opp.direction {
        Direction::AYesBNo => (&opp.market_a, &opp.market_b),
        Direction::BYesANo => (&opp.market_b, &opp.market_a),
    };

    format!(
        "Arbitrage opportunity\n\
         Edge: {:.2}%  Combined: {:.1}%\n\
         Buy YES on {} ({})\n\
         Buy NO  on {} ({})\n\
         Confidence: {:.2}",
        opp.edge_pct,
        opp.combined_price * rust_decimal::Decimal::new(100, 0),
        buy_yes.venue,
        buy_yes.title,
        buy_no.venue,
        buy_no.title,
        opp.confidence,
    )
}

pub struct NotificationBroker {
    sinks: Vec<Box<dyn NotificationSink>>,
    cooldown: chrono::Duration,
    last_notified: Mutex<HashMap<OpportunityKey, DateTime<Utc>>>,
}

impl NotificationBroker {
    pub fn from_config(config: &Config) -> Self {
        let mut sinks: Vec<Box<dyn NotificationSink>> = vec![Box::new(LogSink)];
        if config.telegram.enabled && !config.telegram.bot_token.is_empty() && !config.telegram.chat_id.is_empty() {
            sinks.push(Box::new(TelegramSink::new(
                config.telegram.bot_token.clone(),
                config.telegram.chat_id.clone(),
            )));
        } else if config.telegram.enabled {
            warn!("telegram notification enabled but bot_token/chat_id missing; log sink only");
        }

        Self {
            sinks,
            cooldown: chrono::Duration::minutes(config.arbitrage.cooldown_minutes),
            last_notified: Mutex::new(HashMap::new()),
        }
    }

    /// Dispatches `opp` to every sink unless its key was notified within the
    /// cooldown window. Best-effort: a failed sink logs and continues.
    /// Returns whether a dispatch actually happened, so the caller can write
    /// `last_notified_at` back onto the canonical stored opportunity.
    pub async fn notify(&self, opp: &Opportunity) -> bool {
        let key = opp.key();
        let now = Utc::now();
        {
            let mut last = self.last_notified.lock().unwrap();
            if let Some(prior) = last.get(&key) {
                if now - *prior < self.cooldown {
                    return false;
                }
            }
            last.insert(key, now);
        }

        let message = format_opportunity(opp);
        for sink in &self.sinks {
            sink.send(&message).await;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::config::{ArbitrageConfig, DashboardConfig, TelegramConfig, VenueConfig};
    use common::{MarketRef, Venue};
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn opportunity(direction: Direction) -> Opportunity {
        let now = chrono::DateTime::<Utc>::from_timestamp(0, 0).unwrap();
        Opportunity {
            market_a: MarketRef { venue: Venue::Poly, venue_market_id: "p1".to_string(), title: "Will X happen".to_string() },
            market_b: MarketRef { venue: Venue::Kalshi, venue_market_id: "k1".to_string(), title: "X happens by 2026".to_string() },
            direction,
            combined_price: dec!(0.95),
            edge_pct: dec!(3.0),
            ask_size_min: None,
            confidence: 0.87,
            first_seen_at: now,
            last_seen_at: now,
            last_notified_at: None,
            consecutive_misses: 0,
        }
    }

    #[test]
    fn format_names_the_yes_leg_first_for_a_yes_b_no() {
        let msg = format_opportunity(&opportunity(Direction::AYesBNo));
        assert!(msg.contains("Buy YES on poly (Will X happen)"));
        assert!(msg.contains("Buy NO  on kalshi (X happens by 2026)"));
    }

    #[test]
    fn format_swaps_legs_for_b_yes_a_no() {
        let msg = format_opportunity(&opportunity(Direction::BYesANo));
        assert!(msg.contains("Buy YES on kalshi (X happens by 2026)"));
        assert!(msg.contains("Buy NO  on poly (Will X happen)"));
    }

    #[test]
    fn telegram_escapes_html_entities() {
        let escaped = "<tag> & more".replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;");
        assert_eq!(escaped, "&lt;tag&gt; &amp; more");
    }

    struct CountingSink(Arc<AtomicUsize>);

    #[async_trait::async_trait]
    impl NotificationSink for CountingSink {
        async fn send(&self, _message: &str) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn config(cooldown_minutes: i64) -> Config {
        Config {
            arbitrage: ArbitrageConfig {
                min_arbitrage_threshold: dec!(2.0),
                scan_interval_secs: 15,
                cooldown_minutes,
                trading_fee: dec!(0.005),
                derived_quote_penalty_pct: dec!(1.0),
                stale_opportunity_scans: 10,
            },
            venues: HashMap::from([(
                "poly".to_string(),
                VenueConfig { base_url: "https://example.test".to_string(), api_key: None, cache_seconds: 60, min_similarity: 0.4 },
            )]),
            telegram: TelegramConfig { enabled: false, bot_token: String::new(), chat_id: String::new() },
            dashboard: DashboardConfig { host: "0.0.0.0".to_string(), port: 8080 },
        }
    }

    #[test]
    fn from_config_without_telegram_creds_only_builds_log_sink() {
        let mut cfg = config(5);
        cfg.telegram.enabled = true;
        let broker = NotificationBroker::from_config(&cfg);
        assert_eq!(broker.sinks.len(), 1);
    }

    #[test]
    fn from_config_with_telegram_creds_adds_telegram_sink() {
        let mut cfg = config(5);
        cfg.telegram.enabled = true;
        cfg.telegram.bot_token = "token".to_string();
        cfg.telegram.chat_id = "chat".to_string();
        let broker = NotificationBroker::from_config(&cfg);
        assert_eq!(broker.sinks.len(), 2);
    }

    #[tokio::test]
    async fn notify_suppresses_repeat_within_cooldown_window() {
        let counter = Arc::new(AtomicUsize::new(0));
        let broker = NotificationBroker {
            sinks: vec![Box::new(CountingSink(counter.clone()))],
            cooldown: chrono::Duration::minutes(5),
            last_notified: Mutex::new(HashMap::new()),
        };
        let opp = opportunity(Direction::AYesBNo);

        let first = broker.notify(&opp).await;
        let second = broker.notify(&opp).await;

        assert!(first);
        assert!(!second);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
