//! Cursor-driven pagination of historical public trades.
//!
//! The exchange serves `/0/public/Trades` pages anchored at a `since` cursor
//! and hands back a nanosecond-scale continuation marker with each page. The
//! walk is exposed as a finite, forward-only stream of normalized batches so
//! callers can consume incrementally and stop early without draining the
//! whole range.

use std::future::Future;

use anyhow::{bail, Context, Result};
use futures_util::stream::{self, Stream};

use crate::kraken::normalize::{self, RawTradesPage};
use crate::traits::Trade;

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Walks trade pages from `start` until the cursor reaches `end` (both epoch
/// seconds). `fetch` is called once per page with the current cursor; it is
/// generic so tests can drive the walk without a network.
///
/// A cursor that fails to strictly advance would loop forever against a
/// misbehaving server and is treated as a fatal protocol violation instead.
pub(crate) fn paginate<F, Fut>(
    symbol: String,
    start: u64,
    end: u64,
    fetch: F,
) -> impl Stream<Item = Result<Vec<Trade>>>
where
    F: FnMut(u64) -> Fut,
    Fut: Future<Output = Result<RawTradesPage>>,
{
    stream::try_unfold((start, fetch), move |(cursor, mut fetch)| {
        let symbol = symbol.clone();
        async move {
            if cursor >= end {
                return Ok(None);
            }
            let page = fetch(cursor).await?;
            let batch = page_trades(&symbol, &page, end)?;
            let next = next_cursor(&page)?;
            if next <= cursor {
                bail!("pagination cursor did not advance past {cursor} (server returned {next})");
            }
            Ok(Some((batch, (next, fetch))))
        }
    })
}

fn page_trades(symbol: &str, page: &RawTradesPage, end: u64) -> Result<Vec<Trade>> {
    let rows = page
        .pairs
        .values()
        .next()
        .context("trades page missing pair data")?;
    let end = end as f64;
    let mut batch = Vec::with_capacity(rows.len());
    for row in rows {
        let trade = normalize::trade(symbol, row)?;
        // Pages are anchored by the cursor only, so the tail of a page may
        // overshoot the requested window.
        if trade.timestamp <= end {
            batch.push(trade);
        }
    }
    Ok(batch)
}

fn next_cursor(page: &RawTradesPage) -> Result<u64> {
    let last = page
        .last
        .as_deref()
        .context("trades page missing continuation marker")?;
    let nanos: u64 = last
        .parse()
        .with_context(|| format!("continuation marker is not an integer: {last}"))?;
    Ok(nanos / NANOS_PER_SEC)
}
