//! OKX public WebSocket producer (spot trades and top-5 book)

use super::producer::{Producer, WsProducer};
use crate::pipeline::types::Venue;
use serde_json::{json, Value};
use std::sync::Arc;

const PUBLIC_WS_URL: &str = "wss://ws.okx.com:8443/ws/v5/public";

/// `BTC` -> `BTC-USDT`
pub fn instrument(symbol: &str) -> String {
    format!("{}-USDT", symbol.to_uppercase())
}

pub fn subscribe_frame(symbols: &[String]) -> String {
    let args: Vec<Value> = symbols
        .iter()
        .flat_map(|symbol| {
            let inst_id = instrument(symbol);
            [
                json!({ "channel": "trades", "instId": inst_id }),
                json!({ "channel": "books5", "instId": inst_id }),
            ]
        })
        .collect();
    json!({ "op": "subscribe", "args": args }).to_string()
}

/// Split a multi-trade push into one frame per trade
///
/// The normalizer reads a single trade per message, so a `trades` push with
/// several entries becomes several raw messages in venue order. Everything
/// else passes through untouched.
pub fn split_trades(frame: String) -> Vec<String> {
    let Ok(mut value) = serde_json::from_str::<Value>(&frame) else {
        return vec![frame];
    };
    let is_trades = value
        .get("arg")
        .and_then(|arg| arg.get("channel"))
        .and_then(Value::as_str)
        == Some("trades");
    if !is_trades {
        return vec![frame];
    }

    let trades = match value.get_mut("data").map(Value::take) {
        Some(Value::Array(trades)) if trades.len() > 1 => trades,
        _ => return vec![frame],
    };

    trades
        .into_iter()
        .map(|trade| {
            let mut single = value.clone();
            single["data"] = Value::Array(vec![trade]);
            single.to_string()
        })
        .collect()
}

pub fn producers(symbols: &[String]) -> Vec<Arc<dyn Producer>> {
    let stream = WsProducer::new("okx-public", Venue::Okx, PUBLIC_WS_URL)
        .with_subscribe(vec![subscribe_frame(symbols)])
        .with_keepalive("ping", "pong")
        .with_splitter(split_trades);
    vec![Arc::new(stream)]
}
