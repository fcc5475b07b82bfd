//! Conversion of raw Kraken JSON payloads into canonical records.
//!
//! One mapping function per record kind. Monetary fields arrive as decimal
//! strings and deserialize straight into [`Decimal`]; a missing or malformed
//! field is an input-contract violation and fails the call rather than being
//! silently defaulted.

use std::collections::{BTreeMap, HashMap};

use anyhow::{bail, Context, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;

use crate::kraken::symbols;
use crate::traits::{
    Balance, BookSnapshot, Fill, LedgerEntry, Order, OrderStatus, OrderType, Side, Ticker, Trade,
};

// ============================================================================
// Raw Payload Types
// ============================================================================

/// Ticker entry; price fields arrive as arrays of decimal strings.
#[derive(Debug, Deserialize)]
pub struct RawTicker {
    /// ask [price, whole lot volume, lot volume]
    pub a: Vec<Decimal>,
    /// bid [price, whole lot volume, lot volume]
    pub b: Vec<Decimal>,
}

/// Depth entry for one pair.
#[derive(Debug, Deserialize)]
pub struct RawDepth {
    pub bids: Vec<RawLevel>,
    pub asks: Vec<RawLevel>,
}

/// One book level: `["price", "volume", timestamp]`.
#[derive(Debug, Deserialize)]
pub struct RawLevel(pub Decimal, pub Decimal, pub Value);

/// One page of public trades: rows keyed by pair, plus the server's
/// continuation marker (nanosecond-scale id of the last trade).
#[derive(Debug, Deserialize)]
pub struct RawTradesPage {
    pub last: Option<String>,
    #[serde(flatten)]
    pub pairs: HashMap<String, Vec<Vec<Value>>>,
}

#[derive(Debug, Deserialize)]
pub struct RawOrderDescr {
    pub pair: String,
    #[serde(rename = "type")]
    pub side: String,
    pub ordertype: String,
    pub price: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct RawOrder {
    pub status: String,
    pub descr: RawOrderDescr,
    pub vol: Decimal,
    pub vol_exec: Decimal,
    pub opentm: f64,
}

/// `OpenOrders` wraps its order map in an `open` key.
#[derive(Debug, Deserialize)]
pub struct RawOpenOrders {
    pub open: HashMap<String, RawOrder>,
}

#[derive(Debug, Deserialize)]
pub struct RawTradeHistory {
    pub trades: HashMap<String, RawFill>,
}

#[derive(Debug, Deserialize)]
pub struct RawFill {
    pub ordertxid: String,
    pub pair: String,
    pub time: f64,
    #[serde(rename = "type")]
    pub side: String,
    pub price: Decimal,
    pub vol: Decimal,
    pub fee: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct RawLedger {
    pub ledger: HashMap<String, RawLedgerEntry>,
}

#[derive(Debug, Deserialize)]
pub struct RawLedgerEntry {
    pub refid: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub subtype: String,
    pub aclass: String,
    pub asset: String,
    pub amount: Decimal,
    pub balance: Decimal,
    pub fee: Decimal,
    pub time: f64,
}

// ============================================================================
// Mapping Functions
// ============================================================================

/// Maps Kraken's order lifecycle strings onto the closed canonical set.
///
/// Anything outside the known set is an error: defaulting here would
/// misreport trading state.
pub fn order_status(status: &str) -> Result<OrderStatus> {
    match status {
        "open" => Ok(OrderStatus::Open),
        "closed" => Ok(OrderStatus::Filled),
        "canceled" => Ok(OrderStatus::Canceled),
        other => bail!("unrecognized order status {other:?}"),
    }
}

pub fn side(side: &str) -> Side {
    if side == "sell" {
        Side::Sell
    } else {
        Side::Buy
    }
}

pub fn order_type(ordertype: &str) -> OrderType {
    if ordertype == "limit" {
        OrderType::Limit
    } else {
        OrderType::Market
    }
}

pub fn ticker(symbol: &str, raw: &RawTicker) -> Result<Ticker> {
    let bid = raw.b.first().context("ticker missing bid price")?;
    let ask = raw.a.first().context("ticker missing ask price")?;
    Ok(Ticker {
        symbol: symbol.to_string(),
        bid: *bid,
        ask: *ask,
    })
}

pub fn book(raw: &RawDepth) -> Result<BookSnapshot> {
    Ok(BookSnapshot {
        bids: levels(&raw.bids)?,
        asks: levels(&raw.asks)?,
    })
}

fn levels(rows: &[RawLevel]) -> Result<BTreeMap<Decimal, Decimal>> {
    let mut side = BTreeMap::new();
    for RawLevel(price, volume, _) in rows {
        if *volume < Decimal::ZERO {
            bail!("negative volume {volume} at price level {price}");
        }
        if side.insert(*price, *volume).is_some() {
            bail!("duplicate price level {price}");
        }
    }
    Ok(side)
}

/// One public trade row: `["price", "volume", time, side, ordertype, misc]`;
/// newer servers append the trade id as a seventh element.
pub fn trade(symbol: &str, row: &[Value]) -> Result<Trade> {
    let price = decimal_field(row, 0)?;
    let amount = decimal_field(row, 1)?;
    let timestamp = row
        .get(2)
        .and_then(Value::as_f64)
        .context("trade row missing timestamp")?;
    let side_code = row
        .get(3)
        .and_then(Value::as_str)
        .context("trade row missing side")?;
    if price <= Decimal::ZERO || amount <= Decimal::ZERO {
        bail!("non-positive trade fields: price {price}, volume {amount}");
    }
    Ok(Trade {
        symbol: symbol.to_string(),
        side: if side_code == "s" { Side::Sell } else { Side::Buy },
        amount,
        price,
        timestamp,
        id: row.get(6).and_then(Value::as_i64).map(|id| id.to_string()),
    })
}

fn decimal_field(row: &[Value], index: usize) -> Result<Decimal> {
    let field = row
        .get(index)
        .and_then(Value::as_str)
        .with_context(|| format!("trade row field {index} missing or not a string"))?;
    field
        .parse()
        .with_context(|| format!("trade row field {index} is not a decimal: {field}"))
}

pub fn order(order_id: &str, raw: &RawOrder) -> Result<Order> {
    let status = order_status(&raw.status)?;
    let pending = raw.vol - raw.vol_exec;
    if pending < Decimal::ZERO {
        bail!(
            "executed volume {} exceeds order volume {} for order {}",
            raw.vol_exec,
            raw.vol,
            order_id
        );
    }
    Ok(Order {
        order_id: order_id.to_string(),
        symbol: symbols::exchange_pair_to_symbol(&raw.descr.pair),
        side: side(&raw.descr.side),
        ord_type: order_type(&raw.descr.ordertype),
        price: raw.descr.price,
        total: raw.vol,
        executed: raw.vol_exec,
        pending,
        status,
        timestamp: raw.opentm,
    })
}

/// The balance endpoint reports one total per currency code; free and locked
/// funds are not distinguished.
pub fn balances(raw: &HashMap<String, Decimal>) -> Vec<Balance> {
    raw.iter()
        .map(|(currency, amount)| Balance {
            currency: symbols::canonical_currency(currency).to_string(),
            available: *amount,
            total: *amount,
        })
        .collect()
}

pub fn fill(trade_id: &str, raw: &RawFill) -> Fill {
    let symbol = symbols::private_pair_to_symbol(&raw.pair);
    let fee_currency = symbol
        .split_once('-')
        .map(|(_, quote)| quote)
        .unwrap_or(symbol.as_str())
        .to_string();
    Fill {
        trade_id: trade_id.to_string(),
        order_id: raw.ordertxid.clone(),
        symbol,
        side: side(&raw.side),
        price: raw.price,
        amount: raw.vol,
        fee: raw.fee,
        fee_currency,
        timestamp: raw.time,
    }
}

pub fn ledger_entry(ledger_id: &str, raw: &RawLedgerEntry) -> LedgerEntry {
    LedgerEntry {
        ledger_id: ledger_id.to_string(),
        ref_id: raw.refid.clone(),
        kind: raw.kind.clone(),
        sub_type: raw.subtype.clone(),
        asset: symbols::from_private_pair(&raw.asset),
        asset_class: raw.aclass.clone(),
        amount: raw.amount,
        balance: raw.balance,
        fee: raw.fee,
        timestamp: raw.time,
    }
}
