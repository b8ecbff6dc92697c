//! Core engine: the ledger plus the three tasks that drive it
//! (hourly scan, 5-minute supervisor, chat commands).

pub mod commands;
pub mod ledger;
pub mod scanner;
pub mod supervisor;
