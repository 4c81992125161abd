pub mod abi;
pub mod config;
pub mod db;
pub mod indexer;

pub use abi::EventRegistry;
pub use config::Config;
pub use indexer::types::{DecodedEvent, SyncReport};
