//! Kalshi adapter (C1): public REST API, no authentication required for
//! market data. Prices are returned directly in the `/markets` response in
//! cents; Kalshi exposes no orderbook WebSocket, so the scanner covers it by
//! polling only (`supports_realtime` is false and the orchestrator's polling
//! path is relied on exclusively, per the venue's own documented limitation).

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{info, warn};

use crate::adapters::{MarketCache, StatusFilter, VenueAdapter};
use crate::error::AdapterError;
use crate::model::MarketSnapshot;
use crate::venue::Venue;

const DEFAULT_BASE_URL: &str = "https://api.elections.kalshi.com/trade-api/v2";
const PAGE_SIZE: u32 = 1000;
const MAX_PAGES: u32 = 20;

#[derive(Debug, Deserialize)]
struct MarketsResponse {
    #[serde(default)]
    markets: Vec<KalshiMarket>,
    cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct KalshiMarket {
    ticker: String,
    title: String,
    status: String,
    close_time: Option<String>,
    yes_bid: Option<i64>,
    yes_ask: Option<i64>,
    no_bid: Option<i64>,
    no_ask: Option<i64>,
    volume_24h: Option<i64>,
    liquidity: Option<i64>,
}

fn cents_to_decimal(c: i64) -> Decimal {
    Decimal::new(c, 2)
}

impl KalshiMarket {
    fn into_snapshot(self) -> Option<MarketSnapshot> {
        if self.status != "open" && self.status != "active" {
            return None;
        }

        let end_time = self
            .close_time
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        let yes_ask = self.yes_ask.map(cents_to_decimal);
        let yes_bid = self.yes_bid.map(cents_to_decimal);

        // NO side is direct when present; otherwise derived per the adapter
        // contract, and the snapshot must be flagged accordingly.
        let (no_ask, no_bid, derived) = match (self.no_ask, self.no_bid) {
            (Some(a), Some(b)) => (Some(cents_to_decimal(a)), Some(cents_to_decimal(b)), false),
            _ => (
                yes_bid.map(|b| Decimal::ONE - b),
                yes_ask.map(|a| Decimal::ONE - a),
                true,
            ),
        };

        Some(MarketSnapshot {
            venue: Venue::Kalshi,
            venue_market_id: self.ticker.clone(),
            title: self.title,
            yes_ask,
            yes_bid,
            no_ask,
            no_bid,
            ask_size_yes: None,
            ask_size_no: None,
            liquidity_usd: self.liquidity.map(cents_to_decimal),
            volume_24h_usd: self.volume_24h.map(|v| Decimal::new(v, 0)),
            end_time,
            url: Some(format!("https://kalshi.com/markets/{}", self.ticker)),
            derived,
        })
    }
}

pub struct KalshiAdapter {
    client: Client,
    base_url: String,
    cache: MarketCache,
}

impl KalshiAdapter {
    pub fn new(base_url: Option<String>, cache_seconds: u64) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(15))
                .build()
                .expect("failed to build kalshi http client"),
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            cache: MarketCache::new(Duration::from_secs(cache_seconds)),
        }
    }

    async fn fetch_page(
        &self,
        status: &str,
        cursor: Option<&str>,
    ) -> Result<MarketsResponse, AdapterError> {
        let mut query = vec![
            ("status", status.to_string()),
            ("limit", PAGE_SIZE.to_string()),
        ];
        if let Some(c) = cursor {
            query.push(("cursor", c.to_string()));
        }

        let response = self
            .client
            .get(format!("{}/markets", self.base_url))
            .query(&query)
            .send()
            .await
            .map_err(|source| AdapterError::NetworkUnavailable {
                venue: Venue::Kalshi.to_string(),
                reason: source.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(AdapterError::ParseError {
                venue: Venue::Kalshi.to_string(),
                reason: format!("kalshi returned status {}", response.status()),
            });
        }

        response.json().await.map_err(|source| AdapterError::NetworkUnavailable {
            venue: Venue::Kalshi.to_string(),
            reason: source.to_string(),
        })
    }
}

#[async_trait]
impl VenueAdapter for KalshiAdapter {
    fn venue(&self) -> Venue {
        Venue::Kalshi
    }

    async fn list_markets(&self, status: StatusFilter) -> Result<Vec<MarketSnapshot>, AdapterError> {
        let status_param = match status {
            StatusFilter::Open => "open",
            StatusFilter::All => "unopened,open,closed,settled",
        };

        let mut snapshots = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_PAGES {
            match self.fetch_page(status_param, cursor.as_deref()).await {
                Ok(page) => {
                    if page.markets.is_empty() {
                        break;
                    }
                    for market in page.markets {
                        if let Some(snap) = market.into_snapshot() {
                            snapshots.push(snap);
                        }
                    }
                    match page.cursor {
                        Some(c) if !c.is_empty() => cursor = Some(c),
                        _ => break,
                    }
                }
                Err(e) => {
                    warn!("kalshi page failed: {e}");
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
        info!("kalshi: fetched {} markets", snapshots.len());
        Ok(snapshots)
    }
}
