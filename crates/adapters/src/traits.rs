use std::collections::BTreeMap;

use anyhow::Result;
use rust_decimal::Decimal;

pub type Price = Decimal;
pub type Quantity = Decimal;
/// Unix timestamp in seconds, at the wire format's own (fractional) resolution.
pub type UnixSeconds = f64;

// ============================================================================
// Market Data
// ============================================================================

/// Best bid/ask snapshot for one symbol.
#[derive(Clone, Debug, PartialEq)]
pub struct Ticker {
    pub symbol: String,
    pub bid: Price,
    pub ask: Price,
}

/// Order-book snapshot. Prices are unique per side; `BTreeMap` keeps each
/// side sorted, so bids read best-first via [`BookSnapshot::best_bid`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BookSnapshot {
    pub bids: BTreeMap<Price, Quantity>,
    pub asks: BTreeMap<Price, Quantity>,
}

impl BookSnapshot {
    pub fn best_bid(&self) -> Option<(&Price, &Quantity)> {
        self.bids.iter().next_back()
    }

    pub fn best_ask(&self) -> Option<(&Price, &Quantity)> {
        self.asks.iter().next()
    }
}

/// One executed public trade. The exchange only started attaching trade ids
/// to this feed later on, so `id` may be absent.
#[derive(Clone, Debug, PartialEq)]
pub struct Trade {
    pub symbol: String,
    pub side: Side,
    pub amount: Quantity,
    pub price: Price,
    pub timestamp: UnixSeconds,
    pub id: Option<String>,
}

// ============================================================================
// Orders & Trading
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    Buy,
    Sell,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OrderType {
    Limit,
    Market,
}

/// Execution option codes attached to an order (`oflags` on the wire).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OrderFlag {
    /// Maker-only: reject instead of crossing the spread.
    PostOnly,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OrderStatus {
    Open,
    Filled,
    Canceled,
}

/// Order lifecycle record as reported by the exchange.
///
/// `pending` is always `total - executed` and never negative; a payload
/// violating that is rejected during normalization.
#[derive(Clone, Debug, PartialEq)]
pub struct Order {
    pub order_id: String,
    pub symbol: String,
    pub side: Side,
    pub ord_type: OrderType,
    pub price: Price,
    pub total: Quantity,
    pub executed: Quantity,
    pub pending: Quantity,
    pub status: OrderStatus,
    pub timestamp: UnixSeconds,
}

#[derive(Clone, Debug, PartialEq)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: Side,
    pub ord_type: OrderType,
    pub amount: Quantity,
    pub price: Option<Price>,
    pub flags: Vec<OrderFlag>,
}

/// Result of an order placement. The exchange may split one request into
/// several orders (partial-fill-driven), in which case every resulting id is
/// queried and reported.
#[derive(Clone, Debug, PartialEq)]
pub enum OrderPlacement {
    Single(Order),
    Split(Vec<Order>),
}

// ============================================================================
// Account
// ============================================================================

/// One asset holding. The balance endpoint does not distinguish free from
/// locked funds, so `available == total`.
#[derive(Clone, Debug, PartialEq)]
pub struct Balance {
    pub currency: String,
    pub available: Decimal,
    pub total: Decimal,
}

/// One fill from the account's own trade history.
#[derive(Clone, Debug, PartialEq)]
pub struct Fill {
    pub trade_id: String,
    pub order_id: String,
    pub symbol: String,
    pub side: Side,
    pub price: Price,
    pub amount: Quantity,
    pub fee: Decimal,
    pub fee_currency: String,
    pub timestamp: UnixSeconds,
}

/// One accounting movement from the account ledger.
#[derive(Clone, Debug, PartialEq)]
pub struct LedgerEntry {
    pub ledger_id: String,
    pub ref_id: String,
    pub kind: String,
    pub sub_type: String,
    pub asset: String,
    pub asset_class: String,
    pub amount: Decimal,
    pub balance: Decimal,
    pub fee: Decimal,
    pub timestamp: UnixSeconds,
}

// ============================================================================
// Private-call Outcome
// ============================================================================

/// Outcome of a private endpoint call.
///
/// The exchange reports application-level failures inside a successful HTTP
/// response, and private operations hand that error list back to the caller
/// as a value rather than raising it, so callers must inspect the variant
/// before trusting a result.
#[derive(Clone, Debug, PartialEq)]
pub enum ApiResult<T> {
    Ok(T),
    Rejected(Vec<String>),
}

impl<T> ApiResult<T> {
    pub fn is_rejected(&self) -> bool {
        matches!(self, ApiResult::Rejected(_))
    }

    /// The normalized payload, if the exchange accepted the call.
    pub fn into_ok(self) -> Option<T> {
        match self {
            ApiResult::Ok(value) => Some(value),
            ApiResult::Rejected(_) => None,
        }
    }

    /// The exchange's error list, if the call was rejected.
    pub fn errors(&self) -> Option<&[String]> {
        match self {
            ApiResult::Ok(_) => None,
            ApiResult::Rejected(errors) => Some(errors),
        }
    }
}

// ============================================================================
// Adapter Seam
// ============================================================================

/// Normalized REST operation set one exchange adapter provides.
///
/// Public market-data operations turn any error envelope into a fatal error;
/// private operations return it as [`ApiResult::Rejected`]. Symbols are
/// always canonical `BASE-QUOTE` notation on this seam.
#[async_trait::async_trait]
pub trait ExchangeRest: Send + Sync {
    // Market data
    async fn ticker(&self, symbol: &str) -> Result<Ticker>;
    async fn book(&self, symbol: &str) -> Result<BookSnapshot>;
    async fn trades(&self, symbol: &str) -> Result<Vec<Trade>>;

    // Account
    async fn balances(&self) -> Result<ApiResult<Vec<Balance>>>;
    async fn trade_history(
        &self,
        symbol: Option<&str>,
        start: Option<UnixSeconds>,
        end: Option<UnixSeconds>,
    ) -> Result<ApiResult<Vec<Fill>>>;
    async fn ledger(
        &self,
        asset: Option<&str>,
        asset_class: Option<&str>,
        kind: Option<&str>,
        start: Option<UnixSeconds>,
        end: Option<UnixSeconds>,
    ) -> Result<ApiResult<Vec<LedgerEntry>>>;

    // Order management
    async fn open_orders(&self) -> Result<ApiResult<Vec<Order>>>;
    async fn order_status(&self, order_id: &str) -> Result<ApiResult<Order>>;
    async fn place_order(&self, request: OrderRequest) -> Result<ApiResult<OrderPlacement>>;
    async fn cancel_order(&self, order_id: &str) -> Result<ApiResult<Order>>;
}
