//! Exchange adapter layer.
//!
//! Normalized REST access to trading venues for the surrounding trading
//! stack. Each exchange lives under its own module and exposes the operation
//! set defined by [`traits::ExchangeRest`]. Monetary and quantity fields are
//! exact decimals ([`rust_decimal::Decimal`]) end to end; raw exchange
//! payloads never pass through a binary float on their way to a canonical
//! record.

pub mod kraken;
pub mod traits;

pub use kraken::KrakenSpotRest;
