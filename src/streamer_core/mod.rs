pub mod binance;
pub mod error_handler;
pub mod okx;
pub mod producer;

pub use error_handler::{ExponentialBackoff, StreamError};
pub use producer::{producer_backoff, spawn_producer, Producer, ProducerSink, RestPoller, WsProducer};
