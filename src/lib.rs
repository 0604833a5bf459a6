//! Whale Feed Library
//!
//! This crate scans a rolling window of recent blocks on a chain node, picks out
//! transaction outputs above a value threshold, remembers which transactions were
//! already reported, and publishes the new ones as an RSS feed.

pub mod config;
pub mod feed;
pub mod filter;
pub mod node;
pub mod processed;
pub mod scanner;
pub mod types;
pub mod watcher;

// Re-export commonly used types
pub use config::{ConfigError, WatcherConfig};
pub use feed::{EventFormatter, FeedBuilder, FeedDocument, PhraseFormatter, PlainFormatter};
pub use filter::ThresholdFilter;
pub use node::{NodeClient, NodeConfig, NodeQueries, NodeRpc, RpcMethod};
pub use processed::ProcessedSet;
pub use scanner::{BlockScanner, ScanOutcome, ScanWindow};
pub use types::{BlockSummary, ChainHeight, Output, QualifyingEvent, RawTransaction};
pub use watcher::{RunError, RunReport, Watcher};
