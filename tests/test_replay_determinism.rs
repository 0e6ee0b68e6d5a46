//! Replay determinism
//!
//! A recorded raw log must reproduce the derived snapshot log byte for byte,
//! both across independent replays and against the run that recorded it.

#[cfg(test)]
mod replay_determinism_tests {
    use particleflow::pipeline::config::{ConeConfig, PipelineConfig};
    use particleflow::pipeline::jsonl_writer::JsonlWriter;
    use particleflow::pipeline::normalizer::RawMessage;
    use particleflow::pipeline::runner::{run_replay, run_synthetic};
    use particleflow::pipeline::session::PipelineSession;
    use particleflow::pipeline::snapshot::Snapshot;
    use particleflow::pipeline::types::{NormalizedEvent, Venue};
    use std::path::Path;
    use tempfile::TempDir;

    fn test_config() -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.snapshot_every_trades = 40;
        config.cone = ConeConfig { steps: 25, paths: 150, ..ConeConfig::default() };
        config
    }

    fn replay_to(raw: &Path, out: &Path) -> u64 {
        let sink: JsonlWriter<Snapshot> = JsonlWriter::new(out).unwrap();
        run_replay(test_config(), raw, Box::new(sink), None).unwrap().snapshots
    }

    fn record_synthetic(dir: &Path, steps: u64) -> (std::path::PathBuf, std::path::PathBuf) {
        let raw_path = dir.join("raw_events.jsonl");
        let live_path = dir.join("live_snapshots.jsonl");
        let raw: JsonlWriter<NormalizedEvent> = JsonlWriter::new(&raw_path).unwrap();
        let live: JsonlWriter<Snapshot> = JsonlWriter::new(&live_path).unwrap();
        run_synthetic(test_config(), steps, Box::new(raw), Box::new(live), None).unwrap();
        (raw_path, live_path)
    }

    #[test]
    fn test_two_replays_are_byte_identical() {
        let dir = TempDir::new().unwrap();
        let (raw_path, _) = record_synthetic(dir.path(), 1_200);

        let first = dir.path().join("replay_a.jsonl");
        let second = dir.path().join("replay_b.jsonl");
        let n_first = replay_to(&raw_path, &first);
        let n_second = replay_to(&raw_path, &second);

        assert_eq!(n_first, 30);
        assert_eq!(n_first, n_second);
        let a = std::fs::read(&first).unwrap();
        let b = std::fs::read(&second).unwrap();
        assert!(!a.is_empty());
        assert_eq!(a, b);
    }

    #[test]
    fn test_replay_matches_recording_run() {
        let dir = TempDir::new().unwrap();
        let (raw_path, live_path) = record_synthetic(dir.path(), 800);

        let replay_path = dir.path().join("replay.jsonl");
        replay_to(&raw_path, &replay_path);

        let live = std::fs::read_to_string(&live_path).unwrap();
        let replay = std::fs::read_to_string(&replay_path).unwrap();
        assert_eq!(live, replay);

        for line in replay.lines() {
            let snapshot = Snapshot::from_jsonl(line).unwrap();
            assert_eq!(snapshot.symbol, "BTC");
        }
    }

    #[test]
    fn test_live_venue_messages_replay_identically() {
        let dir = TempDir::new().unwrap();
        let raw_path = dir.path().join("raw.jsonl");
        let live_path = dir.path().join("live.jsonl");

        let mut config = test_config();
        config.snapshot_every_trades = 4;
        let raw: JsonlWriter<NormalizedEvent> = JsonlWriter::new(&raw_path).unwrap();
        let live: JsonlWriter<Snapshot> = JsonlWriter::new(&live_path).unwrap();
        let mut session = PipelineSession::new(config.clone(), Box::new(raw), Box::new(live), None).unwrap();

        let mut messages = vec![RawMessage::new(
            Venue::Okx,
            r#"{"arg":{"channel":"books5","instId":"BTC-USDT"},"data":[{"bids":[["99.5","4","0","1"],["99","2","0","1"]],"asks":[["100.5","1","0","1"]],"ts":"1700000000000"}]}"#,
        )];
        for i in 0..12 {
            let side = if i % 2 == 0 { "buy" } else { "sell" };
            messages.push(RawMessage::new(
                Venue::Okx,
                format!(
                    r#"{{"arg":{{"channel":"trades","instId":"BTC-USDT"}},"data":[{{"instId":"BTC-USDT","px":"{}","sz":"0.{}","side":"{}","ts":"{}"}}]}}"#,
                    100.0 + (i % 3) as f64 * 0.25,
                    i + 1,
                    side,
                    1_700_000_000_000i64 + i
                ),
            ));
        }
        for message in &messages {
            session.ingest_raw(message).unwrap();
        }
        let stats = session.finish().unwrap();
        assert_eq!(stats.snapshots, 3);

        let replay_path = dir.path().join("replay.jsonl");
        let replay: JsonlWriter<Snapshot> = JsonlWriter::new(&replay_path).unwrap();
        run_replay(config, &raw_path, Box::new(replay), None).unwrap();

        assert_eq!(std::fs::read(&live_path).unwrap(), std::fs::read(&replay_path).unwrap());
    }
}
