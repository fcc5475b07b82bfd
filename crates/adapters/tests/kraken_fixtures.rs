//! Deserializes captured Kraken REST payloads through the adapter's envelope
//! and normalizer, end to end minus the network.

use std::collections::HashMap;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use adapters::kraken::account::KrakenResponse;
use adapters::kraken::normalize::{
    self, RawDepth, RawLedger, RawOpenOrders, RawTicker, RawTradeHistory, RawTradesPage,
};
use adapters::traits::{OrderStatus, OrderType, Side};

const TICKER: &str = include_str!("./fixtures/kraken_ticker.json");
const DEPTH: &str = include_str!("./fixtures/kraken_depth.json");
const TRADES: &str = include_str!("./fixtures/kraken_trades.json");
const OPEN_ORDERS: &str = include_str!("./fixtures/kraken_open_orders.json");
const TRADES_HISTORY: &str = include_str!("./fixtures/kraken_trades_history.json");
const LEDGERS: &str = include_str!("./fixtures/kraken_ledgers.json");
const BALANCE: &str = include_str!("./fixtures/kraken_balance.json");

#[test]
fn ticker_fixture_normalizes() {
    let envelope: KrakenResponse<HashMap<String, RawTicker>> =
        serde_json::from_str(TICKER).unwrap();
    let result = envelope.into_result().unwrap();
    let raw = result.values().next().unwrap();

    let ticker = normalize::ticker("BTC-USD", raw).unwrap();
    assert_eq!(ticker.symbol, "BTC-USD");
    assert_eq!(ticker.bid, dec!(52609.50000));
    assert_eq!(ticker.ask, dec!(52609.60000));
    assert!(ticker.bid <= ticker.ask);
}

#[test]
fn depth_fixture_normalizes_both_sides() {
    let envelope: KrakenResponse<HashMap<String, RawDepth>> =
        serde_json::from_str(DEPTH).unwrap();
    let result = envelope.into_result().unwrap();
    let raw = result.values().next().unwrap();

    let book = normalize::book(raw).unwrap();
    assert_eq!(book.bids.len(), 3);
    assert_eq!(book.asks.len(), 3);
    assert_eq!(book.best_bid(), Some((&dec!(52522.90000), &dec!(0.753))));
    assert_eq!(book.best_ask(), Some((&dec!(52523.00000), &dec!(1.199))));
}

#[test]
fn trades_page_fixture_normalizes_rows_and_marker() {
    let envelope: KrakenResponse<RawTradesPage> = serde_json::from_str(TRADES).unwrap();
    let page = envelope.into_result().unwrap();

    let rows = page.pairs.values().next().unwrap();
    let trades: Vec<_> = rows
        .iter()
        .map(|row| normalize::trade("BTC-USD", row).unwrap())
        .collect();

    assert_eq!(trades.len(), 3);
    assert_eq!(trades[0].price, dec!(52478.90000));
    assert_eq!(trades[0].amount, dec!(0.00640000));
    assert_eq!(trades[0].side, Side::Buy);
    assert_eq!(trades[2].side, Side::Sell);
    assert_eq!(trades[2].id.as_deref(), Some("42196103"));

    assert_eq!(page.last.as_deref(), Some("1616663622136576459"));
}

#[test]
fn open_orders_fixture_normalizes_partially_filled_order() {
    let envelope: KrakenResponse<RawOpenOrders> = serde_json::from_str(OPEN_ORDERS).unwrap();
    let result = envelope.into_result().unwrap();

    let (order_id, raw) = result.open.iter().next().unwrap();
    let order = normalize::order(order_id, raw).unwrap();

    assert_eq!(order.order_id, "OQCLML-BW3P3-BUCMWZ");
    assert_eq!(order.symbol, "BTC-USD");
    assert_eq!(order.side, Side::Buy);
    assert_eq!(order.ord_type, OrderType::Limit);
    assert_eq!(order.status, OrderStatus::Open);
    assert_eq!(order.price, dec!(30010.0));
    assert_eq!(order.total, dec!(1.25));
    assert_eq!(order.executed, dec!(0.375));
    assert_eq!(order.pending, order.total - order.executed);
    assert!(order.pending >= Decimal::ZERO);
}

#[test]
fn trades_history_fixture_decodes_private_pairs() {
    let envelope: KrakenResponse<RawTradeHistory> =
        serde_json::from_str(TRADES_HISTORY).unwrap();
    let result = envelope.into_result().unwrap();

    let mut fills: Vec<_> = result
        .trades
        .iter()
        .map(|(trade_id, raw)| normalize::fill(trade_id, raw))
        .collect();
    fills.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));

    assert_eq!(fills.len(), 2);
    assert_eq!(fills[0].symbol, "ETH-GBP");
    assert_eq!(fills[0].fee_currency, "GBP");
    assert_eq!(fills[0].side, Side::Sell);
    assert_eq!(fills[1].symbol, "BTC-USD");
    assert_eq!(fills[1].order_id, "OQCLML-BW3P3-BUCMWZ");
    assert_eq!(fills[1].fee, dec!(0.96032));
    assert_eq!(fills[1].amount, dec!(0.02));
}

#[test]
fn ledgers_fixture_decodes_assets() {
    let envelope: KrakenResponse<RawLedger> = serde_json::from_str(LEDGERS).unwrap();
    let result = envelope.into_result().unwrap();

    let entries: HashMap<_, _> = result
        .ledger
        .iter()
        .map(|(ledger_id, raw)| {
            let entry = normalize::ledger_entry(ledger_id, raw);
            (entry.ledger_id.clone(), entry)
        })
        .collect();

    let gbp = &entries["L4UESK-KG3EQ-UFO4T5"];
    assert_eq!(gbp.asset, "GBP");
    assert_eq!(gbp.kind, "trade");
    assert_eq!(gbp.amount, dec!(-24.5));
    assert_eq!(gbp.balance, dec!(459567.9171));
    assert_eq!(gbp.fee, dec!(0.0490));

    let btc = &entries["LMKZCZ-Z3GVL-CXKK4H"];
    assert_eq!(btc.asset, "XBT");
    assert_eq!(btc.amount, dec!(0.001));
}

#[test]
fn balance_fixture_translates_currencies() {
    let envelope: KrakenResponse<HashMap<String, Decimal>> =
        serde_json::from_str(BALANCE).unwrap();
    let result = envelope.into_result().unwrap();

    let mut balances = normalize::balances(&result);
    balances.sort_by(|a, b| a.currency.cmp(&b.currency));

    let currencies: Vec<_> = balances.iter().map(|b| b.currency.as_str()).collect();
    assert_eq!(currencies, ["ADA", "BTC", "DOGE", "GBP", "USD"]);

    let btc = balances.iter().find(|b| b.currency == "BTC").unwrap();
    assert_eq!(btc.available, dec!(0.5));
    assert_eq!(btc.total, dec!(0.5));
}
