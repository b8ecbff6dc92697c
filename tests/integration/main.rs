//! End-to-end tests: scan → ledger → supervisor against an in-memory
//! candle source and a recording notifier.

mod mock_market;
mod pipeline;
mod restart;
