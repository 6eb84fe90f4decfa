//! Opinion.trade adapter (C1): REST-only, offset pagination, lowercase
//! `apikey` auth header (not `Authorization: Bearer`, not `X-API-Key`).

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

const DEFAULT_BASE_URL: &str = "https://proxy.opinion.trade:8443/openapi";
const PAGE_SIZE: u32 = 20;
const MAX_PAGES: u32 = 25;

#[derive(Debug, Deserialize)]
struct MarketListResponse {
    #[serde(default)]
    data: Vec<OpinionMarket>,
}

#[derive(Debug, Deserialize)]
struct OpinionMarket {
    #[serde(rename = "marketId")]
    market_id: String,
    #[serde(rename = "marketTitle")]
    market_title: String,
    #[serde(rename = "statusEnum", default)]
    status: String,
    #[serde(rename = "yesPrice")]
    yes_price: Option<f64>,
    #[serde(rename = "noPrice")]
    no_price: Option<f64>,
    #[serde(default)]
    volume: Option<f64>,
    #[serde(rename = "volume24h", default)]
    volume_24h: Option<f64>,
    #[serde(rename = "cutoffAt")]
    cutoff_at: Option<i64>,
}

impl OpinionMarket {
    fn into_snapshot(self) -> Option<MarketSnapshot> {
        if self.status != "activated" && !self.status.is_empty() {
            return None;
        }

        // Opinion's public listing exposes only a mid-market yes/no price, not
        // top-of-book bid/ask; treat it as the ask side and flag as derived
        // since no real spread is observable.
        let yes_ask = self.yes_price.and_then(|v| Decimal::try_from(v).ok());
        let no_ask = self
            .no_price
            .and_then(|v| Decimal::try_from(v).ok())
            .or_else(|| yes_ask.map(|a| Decimal::ONE - a));

        let end_time = self.cutoff_at.and_then(|ts| DateTime::from_timestamp(ts, 0));

        Some(MarketSnapshot {
            venue: Venue::Opinion,
            venue_market_id: self.market_id,
            title: self.market_title,
            yes_ask,
            yes_bid: None,
            no_ask,
            no_bid: None,
            ask_size_yes: None,
            ask_size_no: None,
            liquidity_usd: None,
            volume_24h_usd: (self.volume_24h.or(self.volume)).and_then(|v| Decimal::try_from(v).ok()),
            end_time,
            url: None,
            derived: true,
        })
    }
}

pub struct OpinionAdapter {
    client: Client,
    base_url: String,
    cache: MarketCache,
}

impl OpinionAdapter {
    pub fn new(base_url: Option<String>, api_key: Option<String>, cache_seconds: u64) -> Self {
        let mut builder = Client::builder().timeout(Duration::from_secs(15));
        if let Some(key) = api_key {
            let mut headers = reqwest::header::HeaderMap::new();
            if let Ok(value) = reqwest::header::HeaderValue::from_str(&key) {
                headers.insert("apikey", value);
            }
            builder = builder.default_headers(headers);
        }
        Self {
            client: builder.build().expect("failed to build opinion http client"),
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            cache: MarketCache::new(Duration::from_secs(cache_seconds)),
        }
    }

    async fn fetch_page(&self, offset: u32) -> Result<Vec<OpinionMarket>, AdapterError> {
        let response = self
            .client
            .get(format!("{}/market", self.base_url))
            .query(&[
                ("status", "activated".to_string()),
                ("sortBy", "5".to_string()),
                ("limit", PAGE_SIZE.to_string()),
                ("offset", offset.to_string()),
            ])
            .send()
            .await
            .map_err(|source| {
                if source.status() == Some(reqwest::StatusCode::UNAUTHORIZED) {
                    AdapterError::AuthenticationFailed {
                        venue: Venue::Opinion.to_string(),
                    }
                } else {
                    AdapterError::NetworkUnavailable {
                        venue: Venue::Opinion.to_string(),
                        reason: source.to_string(),
                    }
                }
            })?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(AdapterError::AuthenticationFailed {
                venue: Venue::Opinion.to_string(),
            });
        }
        if !response.status().is_success() {
            return Err(AdapterError::ParseError {
                venue: Venue::Opinion.to_string(),
                reason: format!("opinion returned status {}", response.status()),
            });
        }

        let body: MarketListResponse =
            response.json().await.map_err(|source| AdapterError::NetworkUnavailable {
                venue: Venue::Opinion.to_string(),
                reason: source.to_string(),
            })?;
        Ok(body.data)
    }
}

#[async_trait]
impl VenueAdapter for OpinionAdapter {
    fn venue(&self) -> Venue {
        Venue::Opinion
    }

    async fn list_markets(&self, status: StatusFilter) -> Result<Vec<MarketSnapshot>, AdapterError> {
        if let StatusFilter::All = status {
            // Opinion's vocabulary treats "all" as a distinct filter value the
            // public proxy doesn't reliably honor; the scanner only ever needs open markets.
        }

        let mut snapshots = Vec::new();
        for page in 0..MAX_PAGES {
            match self.fetch_page(page * PAGE_SIZE).await {
                Ok(batch) => {
                    if batch.is_empty() {
                        break;
                    }
                    let batch_len = batch.len();
                    for market in batch {
                        if let Some(snap) = market.into_snapshot() {
                            snapshots.push(snap);
                        }
                    }
                    if batch_len < PAGE_SIZE as usize {
                        break;
                    }
                }
                Err(e @ AdapterError::AuthenticationFailed { .. }) => return Err(e),
                Err(e) => {
                    warn!("opinion page failed: {e}");
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
        info!("opinion: fetched {} markets", snapshots.len());
        Ok(snapshots)
    }
}
