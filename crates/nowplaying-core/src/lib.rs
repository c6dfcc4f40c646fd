//! Now-playing tracking for internet radio streams.
//!
//! The crate speaks the ICY metadata side-channel of MP3/AAC HTTP streams
//! (`icy`), turns `StreamTitle` payloads into artist/song pairs (`title`),
//! decides which observations are worth keeping (`policy`) and runs one
//! long-lived monitor per station (`monitor`, `supervisor`) that records
//! song changes into a [`store::HistoryStore`].

pub mod config;
pub mod error;
pub mod icy;
pub mod monitor;
pub mod platform;
pub mod policy;
pub mod store;
pub mod supervisor;
pub mod title;

pub use error::{Error, Result};
