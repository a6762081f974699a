//! Encrypted-at-rest ballot casting, voter receipts and tallying.
//!
//! Every accepted ballot is sealed with a process-wide AES-256-GCM key and stored
//! alongside a key-independent integrity hash and a random receipt id. Results are
//! recomputed on demand by decrypting the whole store for a poll; no plaintext
//! tally is ever kept.

#[macro_use]
extern crate serde;

mod audit;
mod ballot;
mod cast;
mod cipher;
mod config;
mod eligibility;
mod error;
mod poll;
mod sqlite;
mod store;
mod tally;

pub use audit::*;
pub use ballot::*;
pub use cast::*;
pub use cipher::*;
pub use config::*;
pub use eligibility::*;
pub use error::*;
pub use poll::*;
pub use sqlite::*;
pub use store::*;
pub use tally::*;
