//! Import broker and exchange transaction exports into a double-entry
//! bookkeeping ledger.
//!
//! An import run loads one export file, groups its rows into logical
//! events, classifies each group, synthesizes balanced entries with
//! weighted-average cost-basis tracking, and writes the resulting
//! documents into a Tilitin sqlite ledger exactly once. Cost-basis
//! state persists in a snapshot side table next to the ledger;
//! descriptions are written in a fixed Finnish free-text format that
//! embeds the same quantities and average prices, and decoding them
//! back seeds state for ledgers that predate the table.

pub mod amount;
pub mod cli;
pub mod config;
pub mod describe;
pub mod engine;
pub mod entries;
pub mod error;
pub mod format;
pub mod loans;
pub mod position;
pub mod record;
pub mod store;
pub mod txo;
pub mod writer;
