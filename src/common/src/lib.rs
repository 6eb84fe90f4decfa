//! Shared library for the cross-venue arbitrage scanner.
//!
//! Provides the core pipeline components (C1-C4): venue adapters, keyword
//! extraction, the market-identity matcher, and the arbitrage evaluator, plus
//! the data model and ambient configuration/error types everything else
//! builds on.

pub mod adapters;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod keyword;
pub mod matcher;
pub mod model;
pub mod venue;

pub use config::Config;
pub use error::{AdapterError, ConfigError};
pub use evaluator::{evaluate, EvaluatorConfig};
pub use matcher::match_catalogs;
pub use model::{
    Direction, ManualMapping, MappingLeg, MarketRef, MarketSnapshot, MatchPair, Opportunity,
    OpportunityKey, QuoteUpdate, Side,
};
pub use venue::{Venue, VenueStatus};
