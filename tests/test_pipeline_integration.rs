//! Integration tests for the full pipeline
//!
//! Tests verify end-to-end behaviour through the public session API:
//! - Snapshot cadence (cold start, per-trade counting, non-trade events)
//! - Feature values on a hand-computed stream
//! - Degenerate field fallback
//! - Window bound, cone ordering and hierarchy monotonicity over longer runs
//! - Live merge loop fed by mock producers

#[cfg(test)]
mod pipeline_integration_tests {
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use particleflow::pipeline::config::{ConeConfig, PipelineConfig};
    use particleflow::pipeline::ingestion::run_record;
    use particleflow::pipeline::runner::run_synthetic;
    use particleflow::pipeline::session::PipelineSession;
    use particleflow::pipeline::snapshot::Snapshot;
    use particleflow::pipeline::types::{
        AggressorSide, BookLevel, BookSide, NormalizedEvent, Payload, PendingEvent, ScalarReading, Venue,
    };
    use particleflow::pipeline::writer_backend::{MemorySink, NullSink};
    use particleflow::streamer_core::{Producer, ProducerSink, StreamError};
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn test_config(snapshot_every: u64) -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.snapshot_every_trades = snapshot_every;
        config.cone = ConeConfig { steps: 30, paths: 200, ..ConeConfig::default() };
        config
    }

    /// Helper to create a pending synthetic trade
    fn make_test_trade(offset: i64, price: f64, size: f64, side: AggressorSide) -> PendingEvent {
        let ts = Utc.timestamp_opt(1_700_000_000 + offset, 0).unwrap();
        PendingEvent {
            venue: Venue::Synthetic,
            symbol: "BTC".to_string(),
            timestamp: Some(ts),
            received_at: ts,
            payload: Payload::TradePrint { price, size, side: Some(side) },
        }
    }

    fn make_test_event(offset: i64, payload: Payload) -> PendingEvent {
        let ts = Utc.timestamp_opt(1_700_000_000 + offset, 0).unwrap();
        PendingEvent { venue: Venue::Synthetic, symbol: "BTC".to_string(), timestamp: Some(ts), received_at: ts, payload }
    }

    fn session(config: PipelineConfig, snapshots: &MemorySink<Snapshot>) -> PipelineSession {
        PipelineSession::new(config, Box::new(NullSink), Box::new(snapshots.clone()), None).unwrap()
    }

    fn assert_cone_ordered(snapshot: &Snapshot) {
        let cone = &snapshot.cone;
        for step in 0..=cone.horizon {
            let values: Vec<f64> = cone.bands.iter().map(|b| b.values[step]).collect();
            assert!(
                values.windows(2).all(|w| w[0] <= w[1]),
                "snapshot {} step {}: {:?}",
                snapshot.sequence_no,
                step,
                values
            );
        }
    }

    #[test]
    fn test_scenario_a_cold_start_cadence() {
        let snapshots = MemorySink::new();
        let mut session = session(test_config(5), &snapshots);

        for i in 0..3 {
            let out = session.ingest_pending(make_test_trade(i, 100.0 + i as f64, 1.0, AggressorSide::Buy)).unwrap();
            assert!(out.is_none());
        }
        assert!(snapshots.is_empty());

        for i in 3..5 {
            session.ingest_pending(make_test_trade(i, 100.0 + i as f64, 1.0, AggressorSide::Buy)).unwrap();
        }
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots.records()[0].sequence_no, 5);
    }

    #[test]
    fn test_scenario_b_cvd_sign() {
        let snapshots = MemorySink::new();
        let mut session = session(test_config(5), &snapshots);

        let prints = [
            (100.0, 1.0, AggressorSide::Buy),
            (101.0, 2.0, AggressorSide::Buy),
            (99.0, 1.0, AggressorSide::Sell),
            (102.0, 1.0, AggressorSide::Buy),
            (100.0, 1.0, AggressorSide::Sell),
        ];
        let mut last = None;
        for (i, (price, size, side)) in prints.into_iter().enumerate() {
            last = session.ingest_pending(make_test_trade(i as i64, price, size, side)).unwrap();
        }

        let snapshot = last.expect("fifth print emits a snapshot");
        let micro = &snapshot.features[0];
        assert_eq!(micro.scale, "micro");
        assert!(micro.defined);
        assert!((micro.cvd.unwrap() - 2.0).abs() < 1e-12);
        assert!(micro.log_return.unwrap().abs() < 1e-12);
    }

    #[test]
    fn test_scenario_c_degenerate_field() {
        let snapshots = MemorySink::new();
        let mut session = session(test_config(3), &snapshots);

        for i in 0..3 {
            session.ingest_pending(make_test_trade(i, 100.0, 1.0, AggressorSide::Buy)).unwrap();
        }

        let snapshot = &snapshots.records()[0];
        assert!(snapshot.field.degenerate);
        assert!(snapshot.cone.fallback);
        assert_eq!(snapshot.cone.bands.len(), 3);
        assert_cone_ordered(snapshot);
    }

    #[test]
    fn test_non_trade_events_never_emit() {
        let snapshots = MemorySink::new();
        let mut session = session(test_config(2), &snapshots);
        let polled_at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();

        session.ingest_pending(make_test_trade(0, 100.0, 1.0, AggressorSide::Buy)).unwrap();
        for i in 0..50 {
            let payload = match i % 4 {
                0 => Payload::BookDelta {
                    levels: vec![
                        BookLevel { side: BookSide::Bid, price: 99.0, size: 3.0 },
                        BookLevel { side: BookSide::Ask, price: 101.0, size: 1.0 },
                    ],
                    snapshot: true,
                },
                1 => Payload::FundingTick(ScalarReading { value: 0.0001 * i as f64, polled_at }),
                2 => Payload::OiTick(ScalarReading { value: 1_000.0 + i as f64, polled_at }),
                _ => Payload::BasisTick(ScalarReading { value: 5.0, polled_at }),
            };
            assert!(session.ingest_pending(make_test_event(i, payload)).unwrap().is_none());
        }
        assert!(snapshots.is_empty());

        session.ingest_pending(make_test_trade(60, 100.5, 1.0, AggressorSide::Sell)).unwrap();
        assert_eq!(snapshots.len(), 1);
        let snapshot = &snapshots.records()[0];
        assert!(!snapshot.field.degenerate);
        assert!(snapshot.features[0].aux.funding.is_some());
    }

    #[test]
    fn test_cadence_exactness_on_synthetic_stream() {
        let snapshots = MemorySink::new();
        let raw = MemorySink::new();
        let stats =
            run_synthetic(test_config(37), 1_000, Box::new(raw.clone()), Box::new(snapshots.clone()), None).unwrap();

        let trades = raw.records().iter().filter(|e: &&NormalizedEvent| e.is_trade()).count() as u64;
        assert_eq!(trades, 1_000);
        assert_eq!(stats.snapshots, trades / 37);
        assert_eq!(snapshots.len() as u64, trades / 37);

        for (i, snapshot) in snapshots.records().iter().enumerate() {
            assert_eq!(snapshot.trades_seen, 37 * (i as u64 + 1));
        }
    }

    #[test]
    fn test_window_bound() {
        let mut config = test_config(30);
        config.scales = BTreeMap::from([("micro".to_string(), 10), ("macro".to_string(), 100)]);

        let run = |perturb: bool| {
            let snapshots = MemorySink::new();
            let mut session = session(config.clone(), &snapshots);
            for i in 0..30 {
                let mut price = 100.0 + (i as f64 * 0.7).sin();
                if perturb && i == 4 {
                    price = 250.0;
                }
                let side = if i % 3 == 0 { AggressorSide::Sell } else { AggressorSide::Buy };
                session.ingest_pending(make_test_trade(i, price, 1.0 + i as f64, side)).unwrap();
            }
            snapshots.records().remove(0)
        };

        let base = run(false);
        let perturbed = run(true);

        assert_eq!(base.features[0].scale, "micro");
        assert_eq!(base.features[0], perturbed.features[0]);
        assert_ne!(base.features[1], perturbed.features[1]);
    }

    #[test]
    fn test_cone_ordering_and_monotonicity_over_session() {
        let mut config = test_config(100);
        config.scales = BTreeMap::from([
            ("micro".to_string(), 50),
            ("minor".to_string(), 200),
            ("major".to_string(), 600),
            ("macro".to_string(), 1_500),
        ]);
        config.field.tick_size = 10.0;

        let snapshots = MemorySink::new();
        let stats = run_synthetic(config, 4_000, Box::new(NullSink), Box::new(snapshots.clone()), None).unwrap();

        assert_eq!(stats.snapshots, 40);
        for snapshot in snapshots.records() {
            assert_cone_ordered(&snapshot);
        }
        let t = stats.transitions;
        assert!(t.kingdom <= t.phylum && t.phylum <= t.class && t.class <= t.family, "{:?}", t);
    }

    /// Mock venue stream: a fixed list of raw bodies, then an idle wait
    struct MockProducer {
        name: String,
        bodies: Vec<String>,
    }

    #[async_trait]
    impl Producer for MockProducer {
        fn name(&self) -> String {
            self.name.clone()
        }

        fn venue(&self) -> Venue {
            Venue::Binance
        }

        async fn run(&self, sink: &ProducerSink) -> Result<(), StreamError> {
            for body in &self.bodies {
                sink.send(body.clone()).await?;
            }
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    fn agg_trade(symbol: &str, price: f64) -> String {
        format!(
            r#"{{"stream":"x@aggTrade","data":{{"e":"aggTrade","E":1700000000000,"s":"{}","p":"{}","q":"1","T":1700000000000,"m":true}}}}"#,
            symbol, price
        )
    }

    #[tokio::test]
    async fn test_live_merge_with_mock_producers() {
        let producers: Vec<Arc<dyn Producer>> = vec![
            Arc::new(MockProducer {
                name: "btc".to_string(),
                bodies: (0..10).map(|i| agg_trade("BTCUSDT", 100.0 + i as f64)).collect(),
            }),
            Arc::new(MockProducer {
                name: "oi".to_string(),
                bodies: vec![
                    "not json".to_string(),
                    r#"{"symbol":"BTCUSDT","openInterest":"1234.5","time":1700000000000}"#.to_string(),
                ],
            }),
        ];

        let raw = MemorySink::new();
        let snapshots = MemorySink::new();
        let stats = run_record(
            test_config(5),
            producers,
            Box::new(raw.clone()),
            Box::new(snapshots.clone()),
            Some(11),
            std::future::pending::<()>(),
        )
        .await
        .unwrap();

        assert_eq!(stats.events, 11);
        assert_eq!(stats.snapshots, 2);
        assert_eq!(stats.malformed, 1);

        let seqs: Vec<u64> = raw.records().iter().map(|e| e.sequence_no).collect();
        assert_eq!(seqs, (1..=11).collect::<Vec<u64>>());
        assert!(raw.records().iter().any(|e| matches!(e.payload, Payload::OiTick(_))));
    }
}
