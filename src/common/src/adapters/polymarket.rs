//! Polymarket adapter (C1): Gamma REST API for catalog listing, CLOB
//! WebSocket for realtime top-of-book. Outcome arrays are positional
//! (index 0 = YES, index 1 = NO); the CLOB channel addressing is
//! `price_level::{assetId}_YES`/`..._NO`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::adapters::{reconnect_backoff, MarketCache, OnUpdate, StatusFilter, VenueAdapter, MAX_ASSETS_PER_CONNECTION, MAX_RECONNECT_ATTEMPTS};
use crate::error::AdapterError;
use crate::model::{MarketSnapshot, QuoteUpdate, Side};
use crate::venue::Venue;

const DEFAULT_GAMMA_URL: &str = "https://gamma-api.polymarket.com";
const DEFAULT_CLOB_WS_URL: &str = "wss://ws-subscriptions-clob.polymarket.com/ws";
const PAGE_SIZE: u32 = 100;
const MAX_PAGES: u32 = 50;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GammaEvent {
    #[serde(default)]
    markets: Vec<GammaMarket>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GammaMarket {
    condition_id: String,
    question: String,
    end_date: Option<String>,
    outcomes: Option<String>,
    clob_token_ids: Option<String>,
    best_bid: Option<f64>,
    best_ask: Option<f64>,
    volume24hr: Option<f64>,
    liquidity: Option<f64>,
    active: Option<bool>,
    closed: Option<bool>,
    slug: Option<String>,
}

impl GammaMarket {
    fn token_ids(&self) -> Option<Vec<String>> {
        self.clob_token_ids
            .as_ref()
            .and_then(|s| serde_json::from_str(s).ok())
    }

    fn outcomes(&self) -> Option<Vec<String>> {
        self.outcomes.as_ref().and_then(|s| serde_json::from_str(s).ok())
    }

    fn into_snapshot(self) -> Option<MarketSnapshot> {
        if self.closed.unwrap_or(false) || !self.active.unwrap_or(true) {
            return None;
        }

        let end_time = self
            .end_date
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        let outcomes = self.outcomes()?;
        if outcomes.len() != 2 {
            return None;
        }
        // Positional convention: index 0 = YES, index 1 = NO.
        let yes_ask = self.best_ask.and_then(|v| Decimal::try_from(v).ok());
        let yes_bid = self.best_bid.and_then(|v| Decimal::try_from(v).ok());
        let (no_ask, no_bid, derived) = (
            yes_bid.map(|b| Decimal::ONE - b),
            yes_ask.map(|a| Decimal::ONE - a),
            true,
        );

        let url = self
            .slug
            .as_ref()
            .map(|slug| format!("https://polymarket.com/event/{slug}"));

        Some(MarketSnapshot {
            venue: Venue::Poly,
            venue_market_id: self.condition_id,
            title: self.question,
            yes_ask,
            yes_bid,
            no_ask,
            no_bid,
            ask_size_yes: None,
            ask_size_no: None,
            liquidity_usd: self.liquidity.and_then(|v| Decimal::try_from(v).ok()),
            volume_24h_usd: self.volume24hr.and_then(|v| Decimal::try_from(v).ok()),
            end_time,
            url,
            derived,
        })
    }
}

/// Gamma REST + CLOB WebSocket client for Polymarket.
pub struct PolymarketAdapter {
    client: Client,
    gamma_url: String,
    clob_ws_url: String,
    cache: MarketCache,
}

impl PolymarketAdapter {
    pub fn new(gamma_url: Option<String>, clob_ws_url: Option<String>, cache_seconds: u64) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(15))
                .build()
                .expect("failed to build polymarket http client"),
            gamma_url: gamma_url.unwrap_or_else(|| DEFAULT_GAMMA_URL.to_string()),
            clob_ws_url: clob_ws_url.unwrap_or_else(|| DEFAULT_CLOB_WS_URL.to_string()),
            cache: MarketCache::new(Duration::from_secs(cache_seconds)),
        }
    }

    async fn fetch_page(&self, offset: u32, active: bool) -> Result<Vec<GammaEvent>, AdapterError> {
        let response = self
            .client
            .get(format!("{}/events", self.gamma_url))
            .query(&[
                ("active", active.to_string()),
                ("closed", "false".to_string()),
                ("limit", PAGE_SIZE.to_string()),
                ("offset", offset.to_string()),
            ])
            .send()
            .await
            .map_err(|source| AdapterError::NetworkUnavailable {
                venue: Venue::Poly.to_string(),
                reason: source.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(AdapterError::ParseError {
                venue: Venue::Poly.to_string(),
                reason: format!("gamma returned status {}", response.status()),
            });
        }

        response.json().await.map_err(|source| AdapterError::NetworkUnavailable {
            venue: Venue::Poly.to_string(),
            reason: source.to_string(),
        })
    }
}

#[async_trait]
impl VenueAdapter for PolymarketAdapter {
    fn venue(&self) -> Venue {
        Venue::Poly
    }

    async fn list_markets(&self, status: StatusFilter) -> Result<Vec<MarketSnapshot>, AdapterError> {
        let active = matches!(status, StatusFilter::Open);
        let mut snapshots = Vec::new();

        for page in 0..MAX_PAGES {
            let offset = page * PAGE_SIZE;
            match self.fetch_page(offset, active).await {
                Ok(events) => {
                    if events.is_empty() {
                        break;
                    }
                    for event in events {
                        for market in event.markets {
                            if let Some(snap) = market.into_snapshot() {
                                snapshots.push(snap);
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!("polymarket gamma page {page} failed: {e}");
                    if let Some(cached) = self.cache.get_any().await {
                        return Ok(cached);
                    }
                    if snapshots.is_empty() {
                        return Err(e);
                    }
                    break;
                }
            }
        }

        snapshots.sort_by(|a, b| b.volume_24h_usd.cmp(&a.volume_24h_usd));
        self.cache.put(snapshots.clone()).await;
        info!("polymarket: fetched {} markets", snapshots.len());
        Ok(snapshots)
    }

    fn supports_realtime(&self) -> bool {
        true
    }

    async fn subscribe(&self, market_ids: Vec<String>, on_update: OnUpdate) -> Result<(), AdapterError> {
        let mut attempt = 0;
        loop {
            match self.run_clob_stream(&market_ids, on_update.clone()).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    attempt += 1;
                    warn!("polymarket clob stream error (attempt {attempt}): {e}");
                    if attempt >= MAX_RECONNECT_ATTEMPTS {
                        return Err(AdapterError::SubscriptionDied {
                            venue: Venue::Poly.to_string(),
                        });
                    }
                    tokio::time::sleep(reconnect_backoff(attempt)).await;
                }
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct ClobPriceLevel {
    #[serde(default)]
    price: String,
    #[serde(default)]
    size: String,
}

#[derive(Debug, Deserialize)]
struct ClobBookMessage {
    event_type: String,
    asset_id: String,
    #[serde(alias = "buys", default)]
    bids: Vec<ClobPriceLevel>,
    #[serde(alias = "sells", default)]
    asks: Vec<ClobPriceLevel>,
}

impl PolymarketAdapter {
    async fn run_clob_stream(
        &self,
        market_ids: &[String],
        on_update: OnUpdate,
    ) -> Result<(), AdapterError> {
        let (ws_stream, _) = connect_async(&self.clob_ws_url)
            .await
            .map_err(|source| AdapterError::NetworkUnavailable {
                venue: Venue::Poly.to_string(),
                reason: source.to_string(),
            })?;

        let (mut write, mut read) = ws_stream.split();

        // CLOB channel addressing: price_level::{assetId}_YES batched up to the
        // per-connection cap; unsubscribe/resubscribe is left to the caller diffing sets.
        for chunk in market_ids.chunks(MAX_ASSETS_PER_CONNECTION) {
            let channels: Vec<String> = chunk
                .iter()
                .map(|id| format!("price_level::{id}_YES"))
                .collect();
            let subscribe_msg = serde_json::json!({
                "type": "subscribe",
                "channels": channels,
            });
            write
                .send(Message::Text(subscribe_msg.to_string()))
                .await
                .map_err(|_| AdapterError::SubscriptionDied {
                    venue: Venue::Poly.to_string(),
                })?;
        }

        let mut missed_pongs = 0;
        loop {
            match timeout(Duration::from_secs(15), read.next()).await {
                Ok(Some(Ok(Message::Text(text)))) => {
                    missed_pongs = 0;
                    if let Ok(msg) = serde_json::from_str::<ClobBookMessage>(&text) {
                        dispatch_book_message(msg, &on_update);
                    }
                }
                Ok(Some(Ok(Message::Pong(_)))) => {
                    missed_pongs = 0;
                }
                Ok(Some(Ok(_))) => {}
                Ok(Some(Err(e))) => {
                    debug!("polymarket clob read error: {e}");
                    return Ok(());
                }
                Ok(None) => return Ok(()),
                Err(_) => {
                    missed_pongs += 1;
                    if missed_pongs >= 3 {
                        return Ok(());
                    }
                    let _ = write.send(Message::Ping(vec![])).await;
                }
            }
        }
    }
}

fn dispatch_book_message(msg: ClobBookMessage, on_update: &OnUpdate) {
    if msg.event_type != "book" && msg.event_type != "price_change" {
        return;
    }
    let best_bid = msg
        .bids
        .iter()
        .filter_map(|p| p.price.parse::<Decimal>().ok())
        .max();
    let best_ask = msg
        .asks
        .iter()
        .filter_map(|p| p.price.parse::<Decimal>().ok())
        .min();

    on_update(QuoteUpdate {
        venue: Venue::Poly,
        venue_market_id: msg.asset_id,
        side: Side::Yes,
        best_bid,
        best_ask,
        timestamp: Utc::now(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn market_with_two_outcomes_and_live_status_parses() {
        let market = GammaMarket {
            condition_id: "0xabc".to_string(),
            question: "Will BTC reach $100k?".to_string(),
            end_date: Some("2025-12-31T12:00:00Z".to_string()),
            outcomes: Some("[\"Yes\",\"No\"]".to_string()),
            clob_token_ids: Some("[\"1\",\"2\"]".to_string()),
            best_bid: Some(0.45),
            best_ask: Some(0.47),
            volume24hr: Some(1000.0),
            liquidity: Some(5000.0),
            active: Some(true),
            closed: Some(false),
            slug: Some("btc-100k".to_string()),
        };
        let snap = market.into_snapshot().expect("should parse");
        assert_eq!(snap.venue, Venue::Poly);
        assert!(snap.derived);
        assert!(snap.has_valid_quotes());
    }

    #[test]
    fn closed_market_is_dropped() {
        let market = GammaMarket {
            condition_id: "0xabc".to_string(),
            question: "Will BTC reach $100k?".to_string(),
            end_date: None,
            outcomes: Some("[\"Yes\",\"No\"]".to_string()),
            clob_token_ids: Some("[\"1\",\"2\"]".to_string()),
            best_bid: Some(0.45),
            best_ask: Some(0.47),
            volume24hr: None,
            liquidity: None,
            active: Some(true),
            closed: Some(true),
            slug: None,
        };
        assert!(market.into_snapshot().is_none());
    }
}
