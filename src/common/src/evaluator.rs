//! Arbitrage evaluator (C4): given a matched market pair and fresh top-of-book
//! quotes on both sides, tests both directions against a configurable
//! threshold net of fees.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::model::{Direction, MarketRef, MarketSnapshot, MatchPair, Opportunity};

/// Tunables threaded in from configuration; never hardcoded past this point.
#[derive(Debug, Clone, Copy)]
pub struct EvaluatorConfig {
    /// Per-leg trading fee as a fraction (default 0.005).
    pub trading_fee: Decimal,
    /// Minimum net edge, in percent, required to emit an opportunity.
    pub min_edge_pct: Decimal,
    /// Extra percentage points added to the threshold when either leg is a derived quote.
    pub derived_quote_penalty_pct: Decimal,
    /// Pairs whose `end_time` differs by more than this many days are skipped entirely.
    pub max_end_time_gap_days: i64,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            trading_fee: dec!(0.005),
            min_edge_pct: dec!(2.0),
            derived_quote_penalty_pct: dec!(1.0),
            max_end_time_gap_days: 30,
        }
    }
}

fn in_open_unit_interval(q: Option<Decimal>) -> Option<Decimal> {
    q.filter(|v| *v > Decimal::ZERO && *v < Decimal::ONE)
}

fn end_time_gap_too_large(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>, max_days: i64) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => (a - b).num_days().abs() > max_days,
        _ => false,
    }
}

fn combined_and_edge(
    ask_yes: Decimal,
    ask_no: Decimal,
    fee: Decimal,
) -> (Decimal, Decimal) {
    let combined = ask_yes + ask_no;
    let edge_pct = (Decimal::ONE - combined - dec!(2) * fee) * dec!(100);
    (combined, edge_pct)
}

fn min_size(a: Option<Decimal>, b: Option<Decimal>) -> Option<Decimal> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}

fn market_ref(s: &MarketSnapshot) -> MarketRef {
    MarketRef {
        venue: s.venue,
        venue_market_id: s.venue_market_id.clone(),
        title: s.title.clone(),
    }
}

/// Evaluate both directions of a matched pair and return the single best
/// opportunity, if either direction clears the effective threshold.
///
/// Never emits both directions for the same key; on a tie, the larger edge wins.
pub fn evaluate(pair: &MatchPair, config: &EvaluatorConfig, now: DateTime<Utc>) -> Option<Opportunity> {
    let a = &pair.snapshot_a;
    let b = &pair.snapshot_b;

    if end_time_gap_too_large(a.end_time, b.end_time, config.max_end_time_gap_days) {
        return None;
    }

    let effective_threshold = if a.derived || b.derived {
        config.min_edge_pct + config.derived_quote_penalty_pct
    } else {
        config.min_edge_pct
    };

    let mut best: Option<(Direction, Decimal, Decimal)> = None;

    if let (Some(a_yes_ask), Some(b_no_ask)) =
        (in_open_unit_interval(a.yes_ask), in_open_unit_interval(b.no_ask))
    {
        let (combined, edge_pct) = combined_and_edge(a_yes_ask, b_no_ask, config.trading_fee);
        if edge_pct >= effective_threshold {
            best = Some((Direction::AYesBNo, combined, edge_pct));
        }
    }

    if let (Some(b_yes_ask), Some(a_no_ask)) =
        (in_open_unit_interval(b.yes_ask), in_open_unit_interval(a.no_ask))
    {
        let (combined, edge_pct) = combined_and_edge(b_yes_ask, a_no_ask, config.trading_fee);
        if edge_pct >= effective_threshold {
            let replace = match &best {
                Some((_, _, best_edge)) => edge_pct > *best_edge,
                None => true,
            };
            if replace {
                best = Some((Direction::BYesANo, combined, edge_pct));
            }
        }
    }

    let (direction, combined_price, edge_pct) = best?;

    let ask_size_min = match direction {
        Direction::AYesBNo => min_size(a.ask_size_yes, b.ask_size_no),
        Direction::BYesANo => min_size(b.ask_size_yes, a.ask_size_no),
    };

    Some(Opportunity {
        market_a: market_ref(a),
        market_b: market_ref(b),
        direction,
        combined_price,
        edge_pct,
        ask_size_min,
        confidence: pair.confidence,
        first_seen_at: now,
        last_seen_at: now,
        last_notified_at: None,
        consecutive_misses: 0,
    })
}
