//! Crash / restart behaviour of the persisted ledger.

use rust_decimal_macros::dec;
use swingwatch::engine::ledger::{Ledger, LedgerConfig};
use swingwatch::types::{BotMode, SwingError};

use crate::mock_market::{harness, now};

#[tokio::test]
async fn restart_resumes_positions_dedup_and_mode() {
    let h = harness(&["ETH/USDT"]);
    h.market.with_long_setup("ETH/USDT");
    h.scanner.run_cycle(now()).await.unwrap();
    h.ledger.set_mode(BotMode::Paused).await.unwrap();
    h.ledger.register_chat(4242).await.unwrap();
    let before = h.ledger.snapshot().await;

    // Simulated restart: a fresh ledger from the same file
    let restored = Ledger::restore(dec!(10000), LedgerConfig::from_app(&h.cfg)).unwrap();
    let after = restored.snapshot().await;

    assert_eq!(after.portfolio, before.portfolio);
    assert_eq!(after.dedup, before.dedup);
    assert_eq!(after.counters, before.counters);
    assert_eq!(after.mode, BotMode::Paused);
    assert_eq!(after.chat_id, Some(4242));

    // Restored dedup still suppresses the same trigger
    restored.set_mode(BotMode::Active).await.unwrap();
    let candidate = h.scanner.run_cycle(now()).await.unwrap().candidates[0].clone();
    let err = restored.admit(&candidate, now()).await.unwrap_err();
    assert!(matches!(err, SwingError::DuplicateSignal(_)));
}

#[tokio::test]
async fn missing_state_file_is_a_cold_start() {
    let h = harness(&["ETH/USDT"]);
    assert!(!h.state_path.exists());

    let ledger = Ledger::restore(dec!(2500), LedgerConfig::from_app(&h.cfg)).unwrap();
    let snap = ledger.snapshot().await;
    assert_eq!(snap.portfolio.equity, dec!(2500));
    assert!(snap.portfolio.positions.is_empty());
    assert_eq!(snap.mode, BotMode::Active);
}

#[tokio::test]
async fn corrupt_state_file_refuses_to_start() {
    let h = harness(&["ETH/USDT"]);
    std::fs::write(&h.state_path, b"{\"version\": 1, \"portfolio\": tru").unwrap();

    let err = Ledger::restore(dec!(10000), LedgerConfig::from_app(&h.cfg))
        .err()
        .unwrap();
    assert!(matches!(err, SwingError::CorruptState(_)));
    assert!(err.is_fatal());
}
