//! Venue adapters (C1): each adapter translates one venue's REST/WebSocket API
//! to the common [`MarketSnapshot`]/[`QuoteUpdate`] vocabulary.

pub mod kalshi;
pub mod opinion;
pub mod polymarket;
pub mod predict;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::AdapterError;
use crate::model::{MarketSnapshot, QuoteUpdate};
use crate::venue::Venue;

/// Market status filter passed to `list_markets`; vocabulary is venue-specific
/// (`OPEN`/`activated`/`active=true&closed=false`) and each adapter maps this
/// small closed set onto its own filter syntax.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusFilter {
    Open,
    All,
}

/// Callback invoked by a realtime worker on every quote change.
pub type OnUpdate = Arc<dyn Fn(QuoteUpdate) + Send + Sync>;

/// Shared surface every venue adapter implements. Object-safe so the
/// orchestrator can hold `Vec<Box<dyn VenueAdapter>>` and fan requests out
/// concurrently without knowing each venue's concrete type.
#[async_trait]
pub trait VenueAdapter: Send + Sync {
    fn venue(&self) -> Venue;

    /// Fetch the venue's catalog, walking cursor pagination to an adapter-specific
    /// page cap, ordered by 24h volume descending. Returns a cached result (not
    /// an error) on transient failure if a cache exists; otherwise
    /// `NetworkUnavailable`.
    async fn list_markets(&self, status: StatusFilter) -> Result<Vec<MarketSnapshot>, AdapterError>;

    /// Whether this venue exposes a realtime WebSocket feed at all.
    fn supports_realtime(&self) -> bool {
        false
    }

    /// Open (or update) a subscription to `market_ids`, invoking `on_update` on
    /// every price change. Adapters without a realtime feed return
    /// `SubscriptionDied` immediately so the orchestrator falls back to polling.
    async fn subscribe(
        &self,
        _market_ids: Vec<String>,
        _on_update: OnUpdate,
    ) -> Result<(), AdapterError> {
        Err(AdapterError::SubscriptionDied {
            venue: self.venue().to_string(),
        })
    }
}

/// TTL'd cache of the last successful `list_markets` result, shared by every
/// REST adapter to satisfy the "return cached result on transient failure" rule.
pub(crate) struct MarketCache {
    ttl: Duration,
    inner: Mutex<Option<(Instant, Vec<MarketSnapshot>)>>,
}

impl MarketCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: Mutex::new(None),
        }
    }

    pub async fn get_fresh(&self) -> Option<Vec<MarketSnapshot>> {
        let guard = self.inner.lock().await;
        match &*guard {
            Some((at, markets)) if at.elapsed() < self.ttl => Some(markets.clone()),
            _ => None,
        }
    }

    /// Return whatever is cached regardless of freshness, for the "serve stale
    /// on transient failure" path.
    pub async fn get_any(&self) -> Option<Vec<MarketSnapshot>> {
        self.inner.lock().await.as_ref().map(|(_, m)| m.clone())
    }

    pub async fn put(&self, markets: Vec<MarketSnapshot>) {
        *self.inner.lock().await = Some((Instant::now(), markets));
    }
}

/// Exponential backoff with a 60s cap, as specified for realtime reconnects.
pub(crate) fn reconnect_backoff(attempt: u32) -> Duration {
    let secs = 2u64.saturating_pow(attempt.min(6)).min(60);
    Duration::from_secs(secs)
}

/// 10 consecutive failed reconnect attempts declares the stream dead.
pub(crate) const MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Upper bound of assets batched onto a single realtime connection.
pub(crate) const MAX_ASSETS_PER_CONNECTION: usize = 200;
