//! Infrastructure for the admission layer: layered configuration, the
//! alpha-budget ledger with snapshot persistence, and the background
//! snapshot scanner.

#![forbid(unsafe_code)]

pub mod config;
pub mod ledger;
pub mod scanner;
