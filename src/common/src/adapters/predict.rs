//! Predict.fun adapter (C1): REST-only, `x-api-key` auth header, uppercase
//! `status=OPEN` filter vocabulary, `first` (not `limit`) pagination param,
//! `{success, cursor, data}` response envelope.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{info, warn};

use crate::adapters::{MarketCache, StatusFilter, VenueAdapter};
use crate::error::AdapterError;
use crate::model::MarketSnapshot;
use crate::venue::Venue;

const DEFAULT_BASE_URL: &str = "https://api.predict.fun";
const PAGE_SIZE: u32 = 100;
const MAX_PAGES: u32 = 20;

#[derive(Debug, Deserialize)]
struct MarketsEnvelope {
    success: bool,
    #[serde(default)]
    data: Vec<PredictMarket>,
    cursor: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PredictMarket {
    id: String,
    question: Option<String>,
    title: Option<String>,
    status: String,
    liquidity: Option<f64>,
    volume: Option<f64>,
    #[serde(rename = "volume24h")]
    volume_24h: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct OrderbookEnvelope {
    success: bool,
    data: Option<OrderbookData>,
}

#[derive(Debug, Deserialize)]
struct OrderbookData {
    #[serde(default)]
    asks: Vec<[f64; 2]>,
    #[serde(default)]
    bids: Vec<[f64; 2]>,
}

pub struct PredictAdapter {
    client: Client,
    base_url: String,
    cache: MarketCache,
}

impl PredictAdapter {
    pub fn new(base_url: Option<String>, api_key: Option<String>, cache_seconds: u64) -> Self {
        let mut builder = Client::builder().timeout(Duration::from_secs(15));
        if let Some(key) = api_key {
            let mut headers = reqwest::header::HeaderMap::new();
            if let Ok(value) = reqwest::header::HeaderValue::from_str(&key) {
                headers.insert("x-api-key", value);
            }
            builder = builder.default_headers(headers);
        }
        Self {
            client: builder.build().expect("failed to build predict http client"),
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            cache: MarketCache::new(Duration::from_secs(cache_seconds)),
        }
    }

    async fn fetch_page(&self, cursor: Option<&str>) -> Result<MarketsEnvelope, AdapterError> {
        let mut query = vec![
            ("status", "OPEN".to_string()),
            ("first", PAGE_SIZE.to_string()),
        ];
        if let Some(c) = cursor {
            query.push(("after", c.to_string()));
        }

        let response = self
            .client
            .get(format!("{}/v1/markets", self.base_url))
            .query(&query)
            .send()
            .await
            .map_err(|source| AdapterError::NetworkUnavailable {
                venue: Venue::Predict.to_string(),
                reason: source.to_string(),
            })?;

        match response.status() {
            reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN => {
                return Err(AdapterError::AuthenticationFailed {
                    venue: Venue::Predict.to_string(),
                });
            }
            status if !status.is_success() => {
                return Err(AdapterError::ParseError {
                    venue: Venue::Predict.to_string(),
                    reason: format!("predict returned status {status}"),
                });
            }
            _ => {}
        }

        let envelope: MarketsEnvelope =
            response.json().await.map_err(|source| AdapterError::NetworkUnavailable {
                venue: Venue::Predict.to_string(),
                reason: source.to_string(),
            })?;

        if !envelope.success {
            return Err(AdapterError::ParseError {
                venue: Venue::Predict.to_string(),
                reason: envelope.message.unwrap_or_else(|| "unknown API error".to_string()),
            });
        }

        Ok(envelope)
    }

    async fn fetch_top_of_book(&self, market_id: &str) -> Option<(Decimal, Decimal)> {
        let response = self
            .client
            .get(format!("{}/v1/markets/{}/orderbook", self.base_url, market_id))
            .send()
            .await
            .ok()?;
        if !response.status().is_success() {
            return None;
        }
        let envelope: OrderbookEnvelope = response.json().await.ok()?;
        if !envelope.success {
            return None;
        }
        let data = envelope.data?;
        let best_ask = data.asks.first().and_then(|[p, _]| Decimal::try_from(*p).ok())?;
        let best_bid = data.bids.first().and_then(|[p, _]| Decimal::try_from(*p).ok())?;
        Some((best_bid, best_ask))
    }

    async fn into_snapshot(&self, market: PredictMarket) -> Option<MarketSnapshot> {
        if market.status != "OPEN" {
            return None;
        }
        let title = market.question.or(market.title)?;
        let (yes_bid, yes_ask) = self.fetch_top_of_book(&market.id).await?;

        Some(MarketSnapshot {
            venue: Venue::Predict,
            venue_market_id: market.id,
            title,
            yes_ask: Some(yes_ask),
            yes_bid: Some(yes_bid),
            // Predict.fun's orderbook API does not reliably support a NO-outcome
            // parameter; derive from the YES side per the venue's own documented workaround.
            no_ask: Some(Decimal::ONE - yes_bid),
            no_bid: Some(Decimal::ONE - yes_ask),
            ask_size_yes: None,
            ask_size_no: None,
            liquidity_usd: market.liquidity.and_then(|v| Decimal::try_from(v).ok()),
            volume_24h_usd: (market.volume_24h.or(market.volume)).and_then(|v| Decimal::try_from(v).ok()),
            end_time: None,
            url: None,
            derived: true,
        })
    }
}

#[async_trait]
impl VenueAdapter for PredictAdapter {
    fn venue(&self) -> Venue {
        Venue::Predict
    }

    async fn list_markets(&self, _status: StatusFilter) -> Result<Vec<MarketSnapshot>, AdapterError> {
        let mut snapshots = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_PAGES {
            match self.fetch_page(cursor.as_deref()).await {
                Ok(envelope) => {
                    if envelope.data.is_empty() {
                        break;
                    }
                    for market in envelope.data {
                        if let Some(snap) = self.into_snapshot(market).await {
                            snapshots.push(snap);
                        }
                    }
                    match envelope.cursor {
                        Some(c) if !c.is_empty() => cursor = Some(c),
                        _ => break,
                    }
                }
                Err(e @ AdapterError::AuthenticationFailed { .. }) => return Err(e),
                Err(e) => {
                    warn!("predict page failed: {e}");
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
        info!("predict: fetched {} markets", snapshots.len());
        Ok(snapshots)
    }
}
