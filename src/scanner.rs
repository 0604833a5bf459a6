//! Block Window Scanner
//!
//! Walks the most recent blocks from the chain tip downward, resolving each height to a
//! block hash and then to a block body. A failure at one height only skips that height.

use std::fmt;

use tracing::{info, warn};

use crate::node::{NodeQueries, NodeRpc};
use crate::types::{BlockSummary, ChainHeight};

/// Default number of blocks scanned per run
pub const DEFAULT_WINDOW_SIZE: u64 = 100;

/// Why a height produced no block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// `getblockhash` failed or returned nothing usable
    HashLookupFailed,
    /// `getblock` failed or returned a malformed body
    BlockFetchFailed,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::HashLookupFailed => write!(f, "hash lookup failed"),
            SkipReason::BlockFetchFailed => write!(f, "block fetch failed"),
        }
    }
}

/// Result of scanning a single height
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    Block(BlockSummary),
    Skipped { height: ChainHeight, reason: SkipReason },
}

/// The contiguous range of heights covered by one run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanWindow {
    /// Highest height, inclusive
    pub tip: ChainHeight,
    /// Lowest height, inclusive
    pub lowest: ChainHeight,
}

impl ScanWindow {
    /// Window of `size` blocks ending at `tip`, clamped at genesis
    ///
    /// A size of 0 is treated as 1 so the tip block is always covered.
    pub fn ending_at(tip: ChainHeight, size: u64) -> Self {
        let span = size.max(1) - 1;
        Self {
            tip,
            lowest: tip.saturating_sub(span),
        }
    }

    /// Heights from newest to oldest
    pub fn heights(&self) -> impl Iterator<Item = ChainHeight> {
        (self.lowest..=self.tip).rev()
    }
}

impl fmt::Display for ScanWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.lowest, self.tip)
    }
}

/// Fetches blocks for a window through the node
pub struct BlockScanner<'a, R: NodeRpc + ?Sized> {
    rpc: &'a R,
}

impl<'a, R: NodeRpc + ?Sized> BlockScanner<'a, R> {
    pub fn new(rpc: &'a R) -> Self {
        Self { rpc }
    }

    /// Resolve one height to its block
    ///
    /// Two sequential calls: height to hash, then hash to body.
    pub async fn scan_height(&self, height: ChainHeight) -> ScanOutcome {
        info!("Fetching block at height {}", height);

        let Some(hash) = self.rpc.block_hash_at(height).await else {
            warn!("Failed to resolve block hash at height {}, skipping", height);
            return ScanOutcome::Skipped {
                height,
                reason: SkipReason::HashLookupFailed,
            };
        };

        match self.rpc.block_by_hash(&hash, height).await {
            Some(block) => {
                info!(
                    "Block height: {}, transactions: {}",
                    block.height,
                    block.txids.len()
                );
                ScanOutcome::Block(block)
            }
            None => {
                warn!("Failed to fetch block {} at height {}, skipping", hash, height);
                ScanOutcome::Skipped {
                    height,
                    reason: SkipReason::BlockFetchFailed,
                }
            }
        }
    }
}
