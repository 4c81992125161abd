pub mod decoder;
pub mod fetcher;
pub mod sync;
pub mod types;
