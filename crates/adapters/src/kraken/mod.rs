//! Kraken Exchange Adapter
//!
//! REST-only adapter for Kraken's spot market. Turns the exchange's HTTP API
//! (signing scheme, error envelopes, pagination, symbol spelling, decimal
//! encoding) into the normalized operation set of
//! [`crate::traits::ExchangeRest`].
//!
//! # Module Structure
//!
//! - [`account`] - Authentication, nonce management, retrying HTTP client
//! - [`symbols`] - Pair and currency code translation
//! - [`normalize`] - Raw payload to canonical record mapping
//! - [`history`] - Paginated historical trade retrieval
//! - [`spot`] - The [`KrakenSpotRest`] adapter facade

pub mod account;
pub mod history;
pub mod normalize;
pub mod spot;
pub mod symbols;

pub use spot::KrakenSpotRest;
