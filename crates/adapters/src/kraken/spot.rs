//! Kraken Spot REST Adapter
//!
//! [`KrakenSpotRest`] composes the signing client, symbol codec, and payload
//! normalizer into the [`ExchangeRest`] operation set.
//!
//! Public market-data operations raise on any error envelope. Private
//! operations return the exchange's application errors to the caller as
//! [`ApiResult::Rejected`]; callers check the variant before trusting a
//! result. Historical trades are exposed separately as a lazy page stream.

use std::collections::HashMap;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use futures_util::stream::Stream;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::kraken::account::{KrakenAuth, KrakenResponse, KrakenRestClient, RetryPolicy};
use crate::kraken::history;
use crate::kraken::normalize::{
    self, RawDepth, RawLedger, RawOpenOrders, RawOrder, RawTicker, RawTradeHistory, RawTradesPage,
};
use crate::kraken::symbols;
use crate::traits::{
    ApiResult, Balance, BookSnapshot, ExchangeRest, Fill, LedgerEntry, Order, OrderFlag,
    OrderPlacement, OrderRequest, OrderType, Side, Ticker, Trade, UnixSeconds,
};

pub struct KrakenSpotRest {
    client: KrakenRestClient,
}

// Order-entry response payloads; record kinds live in `normalize`.
#[derive(Debug, Deserialize)]
struct AddOrderResult {
    txid: Vec<String>,
}

impl KrakenSpotRest {
    pub fn new(api_key: String, api_secret: String) -> Self {
        let auth = KrakenAuth::new(api_key, api_secret);
        Self {
            client: KrakenRestClient::new_spot(Some(auth)),
        }
    }

    /// Adapter with an externally supplied retry/pacing policy (the
    /// requests-per-second budget comes from configuration).
    pub fn with_policy(api_key: String, api_secret: String, policy: RetryPolicy) -> Self {
        let auth = KrakenAuth::new(api_key, api_secret);
        Self {
            client: KrakenRestClient::with_policy(Some(auth), policy),
        }
    }

    /// Market-data-only adapter; private operations will fail.
    pub fn public() -> Self {
        Self {
            client: KrakenRestClient::new_spot(None),
        }
    }

    /// Walks `/0/public/Trades` across `[start, end]` (epoch seconds),
    /// yielding one normalized batch per page. The stream is finite and
    /// forward-only; dropping it stops fetching. Each call re-walks from
    /// `start`.
    pub fn historical_trades(
        &self,
        symbol: &str,
        start: u64,
        end: u64,
    ) -> impl Stream<Item = Result<Vec<Trade>>> + '_ {
        let pair = symbols::to_exchange_pair(symbol);
        history::paginate(symbol.to_string(), start, end, move |cursor| {
            let params = HashMap::from([
                ("pair".to_string(), pair.clone()),
                ("since".to_string(), cursor.to_string()),
            ]);
            async move {
                let envelope: KrakenResponse<RawTradesPage> =
                    self.client.get_public("/0/public/Trades", params).await?;
                envelope.into_result()
            }
        })
    }

    /// Splits a private envelope: application errors go back to the caller
    /// as a value, a present result is normalized by `convert`.
    fn private<T, U>(
        envelope: KrakenResponse<T>,
        convert: impl FnOnce(T) -> Result<U>,
    ) -> Result<ApiResult<U>> {
        if !envelope.error.is_empty() {
            return Ok(ApiResult::Rejected(envelope.error));
        }
        let result = envelope
            .result
            .context("Missing result in API response")?;
        Ok(ApiResult::Ok(convert(result)?))
    }
}

fn order_params(request: &OrderRequest) -> HashMap<String, String> {
    let mut params = HashMap::from([
        (
            "pair".to_string(),
            symbols::to_exchange_pair(&request.symbol),
        ),
        (
            "type".to_string(),
            match request.side {
                Side::Buy => "buy",
                Side::Sell => "sell",
            }
            .to_string(),
        ),
        (
            "ordertype".to_string(),
            match request.ord_type {
                OrderType::Limit => "limit",
                OrderType::Market => "market",
            }
            .to_string(),
        ),
        ("volume".to_string(), request.amount.to_string()),
    ]);

    if let Some(price) = request.price {
        params.insert("price".to_string(), price.to_string());
    }
    if !request.flags.is_empty() {
        let flags: Vec<&str> = request
            .flags
            .iter()
            .map(|flag| match flag {
                OrderFlag::PostOnly => "post",
            })
            .collect();
        params.insert("oflags".to_string(), flags.join(","));
    }

    params
}

#[async_trait]
impl ExchangeRest for KrakenSpotRest {
    async fn ticker(&self, symbol: &str) -> Result<Ticker> {
        let params = HashMap::from([("pair".to_string(), symbols::to_exchange_pair(symbol))]);
        let envelope: KrakenResponse<HashMap<String, RawTicker>> =
            self.client.post_public("/0/public/Ticker", params).await?;
        let result = envelope.into_result()?;
        let (_, raw) = result
            .iter()
            .next()
            .context("ticker response missing pair entry")?;
        normalize::ticker(symbol, raw)
    }

    async fn book(&self, symbol: &str) -> Result<BookSnapshot> {
        let params = HashMap::from([
            ("pair".to_string(), symbols::to_exchange_pair(symbol)),
            ("count".to_string(), "200".to_string()),
        ]);
        let envelope: KrakenResponse<HashMap<String, RawDepth>> =
            self.client.post_public("/0/public/Depth", params).await?;
        let result = envelope.into_result()?;
        let (_, raw) = result
            .iter()
            .next()
            .context("depth response missing pair entry")?;
        normalize::book(raw)
    }

    /// Most recent public trades, one page.
    async fn trades(&self, symbol: &str) -> Result<Vec<Trade>> {
        let params = HashMap::from([("pair".to_string(), symbols::to_exchange_pair(symbol))]);
        let envelope: KrakenResponse<RawTradesPage> =
            self.client.post_public("/0/public/Trades", params).await?;
        let page = envelope.into_result()?;
        let rows = page
            .pairs
            .values()
            .next()
            .context("trades response missing pair entry")?;
        rows.iter().map(|row| normalize::trade(symbol, row)).collect()
    }

    async fn balances(&self) -> Result<ApiResult<Vec<Balance>>> {
        let envelope: KrakenResponse<HashMap<String, Decimal>> = self
            .client
            .post_private("/0/private/Balance", HashMap::new())
            .await?;
        Self::private(envelope, |raw| Ok(normalize::balances(&raw)))
    }

    async fn trade_history(
        &self,
        symbol: Option<&str>,
        start: Option<UnixSeconds>,
        end: Option<UnixSeconds>,
    ) -> Result<ApiResult<Vec<Fill>>> {
        let mut params = HashMap::new();
        if let Some(start) = start {
            params.insert("start".to_string(), start.to_string());
        }
        if let Some(end) = end {
            params.insert("end".to_string(), end.to_string());
        }
        let envelope: KrakenResponse<RawTradeHistory> = self
            .client
            .post_private("/0/private/TradesHistory", params)
            .await?;
        Self::private(envelope, |raw| {
            let mut fills: Vec<Fill> = raw
                .trades
                .iter()
                .map(|(trade_id, fill)| normalize::fill(trade_id, fill))
                .filter(|fill| symbol.map_or(true, |wanted| fill.symbol == wanted))
                .collect();
            fills.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
            Ok(fills)
        })
    }

    async fn ledger(
        &self,
        asset: Option<&str>,
        asset_class: Option<&str>,
        kind: Option<&str>,
        start: Option<UnixSeconds>,
        end: Option<UnixSeconds>,
    ) -> Result<ApiResult<Vec<LedgerEntry>>> {
        let mut params = HashMap::new();
        if let Some(asset) = asset {
            params.insert("asset".to_string(), asset.to_string());
        }
        if let Some(aclass) = asset_class {
            params.insert("aclass".to_string(), aclass.to_string());
        }
        if let Some(kind) = kind {
            params.insert("type".to_string(), kind.to_string());
        }
        if let Some(start) = start {
            params.insert("start".to_string(), start.to_string());
        }
        if let Some(end) = end {
            params.insert("end".to_string(), end.to_string());
        }
        let envelope: KrakenResponse<RawLedger> = self
            .client
            .post_private("/0/private/Ledgers", params)
            .await?;
        Self::private(envelope, |raw| {
            let mut entries: Vec<LedgerEntry> = raw
                .ledger
                .iter()
                .map(|(ledger_id, entry)| normalize::ledger_entry(ledger_id, entry))
                .collect();
            entries.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
            Ok(entries)
        })
    }

    async fn open_orders(&self) -> Result<ApiResult<Vec<Order>>> {
        let envelope: KrakenResponse<RawOpenOrders> = self
            .client
            .post_private("/0/private/OpenOrders", HashMap::new())
            .await?;
        Self::private(envelope, |raw| {
            raw.open
                .iter()
                .map(|(order_id, order)| normalize::order(order_id, order))
                .collect()
        })
    }

    async fn order_status(&self, order_id: &str) -> Result<ApiResult<Order>> {
        let params = HashMap::from([("txid".to_string(), order_id.to_string())]);
        let envelope: KrakenResponse<HashMap<String, RawOrder>> = self
            .client
            .post_private("/0/private/QueryOrders", params)
            .await?;
        Self::private(envelope, |raw| {
            let (order_id, order) = raw
                .iter()
                .next()
                .context("order query returned no entries")?;
            normalize::order(order_id, order)
        })
    }

    async fn place_order(&self, request: OrderRequest) -> Result<ApiResult<OrderPlacement>> {
        let envelope: KrakenResponse<AddOrderResult> = self
            .client
            .post_private("/0/private/AddOrder", order_params(&request))
            .await?;
        if !envelope.error.is_empty() {
            return Ok(ApiResult::Rejected(envelope.error));
        }
        let confirmed = envelope
            .result
            .context("Missing result in API response")?;
        if confirmed.txid.is_empty() {
            bail!("order confirmation carried no transaction ids");
        }

        if let [txid] = confirmed.txid.as_slice() {
            return Ok(match self.order_status(txid).await? {
                ApiResult::Ok(order) => ApiResult::Ok(OrderPlacement::Single(order)),
                ApiResult::Rejected(errors) => ApiResult::Rejected(errors),
            });
        }

        // Partial-fill-driven splitting: one status per confirmed id.
        let mut orders = Vec::with_capacity(confirmed.txid.len());
        for txid in &confirmed.txid {
            match self.order_status(txid).await? {
                ApiResult::Ok(order) => orders.push(order),
                ApiResult::Rejected(errors) => return Ok(ApiResult::Rejected(errors)),
            }
        }
        Ok(ApiResult::Ok(OrderPlacement::Split(orders)))
    }

    async fn cancel_order(&self, order_id: &str) -> Result<ApiResult<Order>> {
        let params = HashMap::from([("txid".to_string(), order_id.to_string())]);
        let envelope: KrakenResponse<serde_json::Value> = self
            .client
            .post_private("/0/private/CancelOrder", params)
            .await?;
        if !envelope.error.is_empty() {
            return Ok(ApiResult::Rejected(envelope.error));
        }
        // The cancel result only carries a count; callers want the order's
        // final state.
        self.order_status(order_id).await
    }
}
