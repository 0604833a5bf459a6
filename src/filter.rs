//! Threshold Filtering
//!
//! Selects transaction outputs whose value strictly exceeds a configured threshold,
//! skipping transactions that an earlier run already examined.

use std::collections::HashSet;

use futures::stream::{self, StreamExt};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::node::{NodeQueries, NodeRpc};
use crate::processed::ProcessedSet;
use crate::types::{BlockSummary, QualifyingEvent, RawTransaction};

/// Default value threshold in node-native units
pub const DEFAULT_THRESHOLD: i64 = 1_000_000;

/// Default number of transaction fetches in flight per block
pub const DEFAULT_FETCH_CONCURRENCY: usize = 1;

/// Counters and events produced by filtering one block
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockFilterOutcome {
    /// Qualifying events in block order
    pub events: Vec<QualifyingEvent>,
    /// Transactions fetched and examined
    pub examined: usize,
    /// Transactions skipped because their fetch failed
    pub fetch_failures: usize,
    /// Transactions skipped because an earlier run processed them
    pub already_processed: usize,
}

/// Output value filter
#[derive(Debug, Clone)]
pub struct ThresholdFilter {
    threshold: Decimal,
    concurrency: usize,
}

impl Default for ThresholdFilter {
    fn default() -> Self {
        Self::new(Decimal::from(DEFAULT_THRESHOLD))
    }
}

impl ThresholdFilter {
    pub fn new(threshold: Decimal) -> Self {
        Self {
            threshold,
            concurrency: DEFAULT_FETCH_CONCURRENCY,
        }
    }

    /// Allow up to `concurrency` transaction fetches in flight within a block
    ///
    /// Results are still consumed in block order.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn threshold(&self) -> Decimal {
        self.threshold
    }

    /// Strict greater-than: a value equal to the threshold does not qualify
    pub fn exceeds_threshold(&self, value: Decimal) -> bool {
        value > self.threshold
    }

    /// Events for every output of `tx` above the threshold
    ///
    /// # Arguments
    /// * `txid` - Identifier the block listed the transaction under
    /// * `tx` - The fetched transaction
    /// * `block_time` - Timestamp of the containing block
    pub fn qualifying_events(
        &self,
        txid: &str,
        tx: &RawTransaction,
        block_time: i64,
    ) -> Vec<QualifyingEvent> {
        tx.outputs
            .iter()
            .filter_map(|output| match output.value {
                Some(value) => Some(value),
                None => {
                    debug!("Transaction {} output {:?} has no parseable value", txid, output.index);
                    None
                }
            })
            .filter(|value| self.exceeds_threshold(*value))
            .map(|amount| {
                info!(
                    "Transaction {} has an output of {}, exceeding the threshold",
                    txid, amount
                );
                QualifyingEvent {
                    txid: txid.to_string(),
                    amount,
                    block_time,
                }
            })
            .collect()
    }

    /// Examine every unprocessed transaction in `block`
    ///
    /// Each examined transaction is recorded in `processed`, qualifying or not.
    /// A transaction whose fetch fails is left unrecorded so a later run retries it.
    pub async fn filter_block<R: NodeRpc + ?Sized>(
        &self,
        rpc: &R,
        block: &BlockSummary,
        processed: &mut ProcessedSet,
    ) -> BlockFilterOutcome {
        let mut outcome = BlockFilterOutcome::default();

        let mut listed = HashSet::new();
        let mut pending = Vec::with_capacity(block.txids.len());
        for txid in &block.txids {
            if processed.contains(txid) {
                debug!("Transaction {} already processed", txid);
                outcome.already_processed += 1;
            } else if listed.insert(txid.as_str()) {
                pending.push(txid.as_str());
            }
        }

        let fetches = stream::iter(pending)
            .map(|txid| async move { (txid, rpc.transaction_by_id(txid).await) })
            .buffered(self.concurrency);
        futures::pin_mut!(fetches);

        while let Some((txid, fetched)) = fetches.next().await {
            debug!("Processing transaction {}", txid);
            let Some(tx) = fetched else {
                warn!("Failed to fetch transaction {}, skipping", txid);
                outcome.fetch_failures += 1;
                continue;
            };

            outcome.examined += 1;
            if tx.has_outputs() {
                let events = self.qualifying_events(txid, &tx, block.timestamp);
                outcome.events.extend(events);
            } else {
                warn!("Transaction {} has no outputs", txid);
            }
            processed.insert(txid);
        }

        outcome
    }
}
