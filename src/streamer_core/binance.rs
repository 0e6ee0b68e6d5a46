//! Binance USD-M futures producers
//!
//! One combined WebSocket stream carries aggTrade, partial depth and mark
//! price for every symbol. Open interest and basis are REST polls, one
//! producer per symbol and endpoint.

use super::error_handler::StreamError;
use super::producer::{Producer, RestPoller, WsProducer};
use crate::pipeline::config::BinanceConfig;
use crate::pipeline::types::Venue;
use std::sync::Arc;
use std::time::Duration;

const STREAM_URL: &str = "wss://fstream.binance.com/stream?streams=";
const REST_URL: &str = "https://fapi.binance.com";

/// Partial book depths the venue offers
const PARTIAL_DEPTHS: [usize; 3] = [5, 10, 20];

/// `BTC` -> `BTCUSDT`
pub fn instrument(symbol: &str) -> String {
    format!("{}USDT", symbol.to_uppercase())
}

/// Smallest partial depth covering `book_depth`, capped at 20
pub fn partial_depth(book_depth: usize) -> usize {
    PARTIAL_DEPTHS.iter().copied().find(|d| *d >= book_depth).unwrap_or(20)
}

pub fn stream_url(symbols: &[String], config: &BinanceConfig, book_depth: usize) -> String {
    let depth = partial_depth(book_depth);
    let mark = if config.mark_price_1s { "@markPrice@1s" } else { "@markPrice" };

    let streams: Vec<String> = symbols
        .iter()
        .flat_map(|symbol| {
            let s = instrument(symbol).to_lowercase();
            [
                format!("{}@aggTrade", s),
                format!("{}@depth{}@{}", s, depth, config.depth_ms),
                format!("{}{}", s, mark),
            ]
        })
        .collect();

    format!("{}{}", STREAM_URL, streams.join("/"))
}

pub fn open_interest_url(symbol: &str) -> String {
    format!("{}/fapi/v1/openInterest?symbol={}", REST_URL, instrument(symbol))
}

pub fn basis_url(symbol: &str, period: &str) -> String {
    format!(
        "{}/futures/data/basis?pair={}&contractType=PERPETUAL&period={}&limit=1",
        REST_URL,
        instrument(symbol),
        period
    )
}

/// Every producer needed to record `symbols` from Binance
pub fn producers(
    symbols: &[String],
    config: &BinanceConfig,
    book_depth: usize,
) -> Result<Vec<Arc<dyn Producer>>, StreamError> {
    let mut producers: Vec<Arc<dyn Producer>> = Vec::new();

    producers.push(Arc::new(WsProducer::new(
        "binance-stream",
        Venue::Binance,
        stream_url(symbols, config, book_depth),
    )));

    for symbol in symbols {
        producers.push(Arc::new(RestPoller::new(
            format!("binance-oi-{}", symbol),
            Venue::Binance,
            open_interest_url(symbol),
            Duration::from_secs_f64(config.oi_poll_s),
        )?));
        producers.push(Arc::new(RestPoller::new(
            format!("binance-basis-{}", symbol),
            Venue::Binance,
            basis_url(symbol, &config.basis_period),
            Duration::from_secs_f64(config.basis_poll_s),
        )?));
    }

    Ok(producers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_depth() {
        assert_eq!(partial_depth(1), 5);
        assert_eq!(partial_depth(5), 5);
        assert_eq!(partial_depth(8), 10);
        assert_eq!(partial_depth(20), 20);
        assert_eq!(partial_depth(100), 20);
    }

    #[test]
    fn test_stream_url() {
        let symbols = vec!["BTC".to_string(), "eth".to_string()];
        let url = stream_url(&symbols, &BinanceConfig::default(), 20);
        assert_eq!(
            url,
            "wss://fstream.binance.com/stream?streams=\
             btcusdt@aggTrade/btcusdt@depth20@100ms/btcusdt@markPrice@1s/\
             ethusdt@aggTrade/ethusdt@depth20@100ms/ethusdt@markPrice@1s"
        );

        let slow = BinanceConfig { mark_price_1s: false, depth_ms: "500ms".to_string(), ..BinanceConfig::default() };
        let url = stream_url(&symbols[..1], &slow, 5);
        assert!(url.ends_with("btcusdt@aggTrade/btcusdt@depth5@500ms/btcusdt@markPrice"));
    }

    #[test]
    fn test_rest_urls() {
        assert_eq!(open_interest_url("BTC"), "https://fapi.binance.com/fapi/v1/openInterest?symbol=BTCUSDT");
        assert_eq!(
            basis_url("SOL", "15m"),
            "https://fapi.binance.com/futures/data/basis?pair=SOLUSDT&contractType=PERPETUAL&period=15m&limit=1"
        );
    }

    #[test]
    fn test_producers_per_symbol() {
        let symbols = vec!["BTC".to_string(), "ETH".to_string()];
        let producers = producers(&symbols, &BinanceConfig::default(), 20).unwrap();
        let names: Vec<String> = producers.iter().map(|p| p.name()).collect();
        assert_eq!(
            names,
            vec!["binance-stream", "binance-oi-BTC", "binance-basis-BTC", "binance-oi-ETH", "binance-basis-ETH"]
        );
    }
}
