//! Symbol and currency code translation between the canonical `BASE-QUOTE`
//! notation and Kraken's wire spellings.
//!
//! Kraken spells a handful of currencies its own way (`XBT` for BTC, `XDG`
//! for DOGE), and private-endpoint payloads additionally wrap currency codes
//! in a fixed-width asset-class convention (`X` crypto, `Z` fiat) that public
//! endpoints never use.

use tracing::error;

/// Quote currencies recognized when re-deriving a canonical symbol from a
/// wire pair. Longest spellings first so `USDT` wins over `USD`.
const QUOTE_CURRENCIES: &[&str] = &[
    "USDT", "USDC", "XBT", "ETH", "XDG", "USD", "EUR", "GBP", "JPY", "CAD", "CHF", "AUD",
];

/// Canonical currency to Kraken's alternate spelling.
pub fn to_kraken_currency(code: &str) -> &str {
    match code {
        "BTC" => "XBT",
        "DOGE" => "XDG",
        other => other,
    }
}

/// Kraken's alternate spelling back to the canonical currency.
pub fn from_kraken_currency(code: &str) -> &str {
    match code {
        "XBT" => "BTC",
        "XDG" => "DOGE",
        other => other,
    }
}

/// Canonical `BASE-QUOTE` symbol to the wire pair used by public endpoints:
/// strip the separator, uppercase, apply alternate spellings.
/// `BTC-USD` -> `XBTUSD`.
pub fn to_exchange_pair(symbol: &str) -> String {
    let upper = symbol.to_uppercase();
    match upper.split_once('-') {
        Some((base, quote)) => {
            format!("{}{}", to_kraken_currency(base), to_kraken_currency(quote))
        }
        None => upper,
    }
}

/// Wire pair back to canonical notation: `XBTUSD` -> `BTC-USD`. Returns
/// `None` when no known quote currency terminates the pair.
pub fn from_exchange_pair(pair: &str) -> Option<String> {
    for quote in QUOTE_CURRENCIES {
        if let Some(base) = pair.strip_suffix(quote) {
            if base.is_empty() {
                continue;
            }
            return Some(format!(
                "{}-{}",
                from_kraken_currency(base),
                from_kraken_currency(quote)
            ));
        }
    }
    None
}

/// [`from_exchange_pair`] with the codec's log-and-continue posture: an
/// unrecognized pair is reported and passed through so it cannot abort a
/// batch operation.
pub fn exchange_pair_to_symbol(pair: &str) -> String {
    match from_exchange_pair(pair) {
        Some(symbol) => symbol,
        None => {
            error!(pair, "unrecognized wire pair, passing through");
            pair.to_string()
        }
    }
}

/// Decodes the fixed-width currency codes embedded in private-endpoint
/// payloads (trade history, ledger).
///
/// An 8- or 9-character code is a concatenated pair where each leg carries a
/// one-character class prefix followed by the code; both prefixes are
/// dropped: `XETHZGBP` -> `ETHGBP`. A 4-character code is a single prefixed
/// leg: `XETH` -> `ETH`, `ZGBP` -> `GBP`. Any other shape is logged and
/// passed through unchanged so one malformed code cannot abort the batch it
/// appears in.
pub fn from_private_pair(raw: &str) -> String {
    if raw.is_ascii() {
        match raw.len() {
            8 | 9 => return format!("{}{}", &raw[1..4], &raw[5..]),
            4 => return raw[1..].to_string(),
            _ => {}
        }
    }
    error!(code = raw, "unconvertible private symbol code, passing through");
    raw.to_string()
}

/// Full private-pair decode: the fixed-width transform followed by canonical
/// dashed notation. Falls back to the merged code when the quote leg is not
/// recognized.
pub fn private_pair_to_symbol(raw: &str) -> String {
    let merged = from_private_pair(raw);
    from_exchange_pair(&merged).unwrap_or(merged)
}

/// Kraken-specific currency spellings used by the balance endpoint, mapped
/// to canonical codes. Distinct from the positional private-pair rule; only
/// these exact spellings translate, anything else passes through.
pub fn canonical_currency(code: &str) -> &str {
    match code {
        "XXBT" => "BTC",
        "XXDG" => "DOGE",
        "XXLM" => "XLM",
        "XXMR" => "XMR",
        "XXRP" => "XRP",
        "ZUSD" => "USD",
        "ZCAD" => "CAD",
        "ZGBP" => "GBP",
        "ZJPY" => "JPY",
        other => other,
    }
}
