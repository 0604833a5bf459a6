//! Run Orchestration
//!
//! Wires the node client, scanner, filter, processed-transaction store and feed builder
//! into a single run:
//!
//! `Init -> Scanning -> Filtering -> Persisting -> Rendering -> Done`
//!
//! The only fatal condition is an unobtainable tip height during `Init`. Everything else
//! is absorbed where it happens and only shows up as missing output.

use std::fmt;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::WatcherConfig;
use crate::feed::{EventFormatter, FeedBuilder, FeedError};
use crate::filter::ThresholdFilter;
use crate::node::{NodeQueries, NodeRpc};
use crate::processed::{ProcessedSet, StoreError};
use crate::scanner::{BlockScanner, ScanOutcome, ScanWindow};
use crate::types::{ChainHeight, QualifyingEvent};

/// Errors that end a run with a non-zero exit
#[derive(Error, Debug)]
pub enum RunError {
    #[error("Failed to get the latest block height")]
    TipUnavailable,

    #[error("Failed to persist processed transactions: {0}")]
    Store(#[from] StoreError),

    #[error("Failed to write feed: {0}")]
    Feed(#[from] FeedError),
}

/// Phases of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Init,
    Scanning,
    Filtering,
    Persisting,
    Rendering,
    Done,
    Aborted,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Init => "init",
            RunState::Scanning => "scanning",
            RunState::Filtering => "filtering",
            RunState::Persisting => "persisting",
            RunState::Rendering => "rendering",
            RunState::Done => "done",
            RunState::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// What a completed run did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub tip: ChainHeight,
    pub window: ScanWindow,
    pub blocks_scanned: usize,
    pub heights_skipped: Vec<ChainHeight>,
    pub transactions_examined: usize,
    pub transaction_fetch_failures: usize,
    pub already_processed: usize,
    /// Qualifying events, newest block first
    pub events: Vec<QualifyingEvent>,
    pub state_written: bool,
    pub feed_written: bool,
}

impl RunReport {
    fn new(tip: ChainHeight, window: ScanWindow) -> Self {
        Self {
            tip,
            window,
            blocks_scanned: 0,
            heights_skipped: Vec::new(),
            transactions_examined: 0,
            transaction_fetch_failures: 0,
            already_processed: 0,
            events: Vec::new(),
            state_written: false,
            feed_written: false,
        }
    }
}

/// One-shot large-transaction watcher
pub struct Watcher<R: NodeRpc> {
    config: WatcherConfig,
    rpc: R,
    filter: ThresholdFilter,
    feed: FeedBuilder,
}

impl<R: NodeRpc> Watcher<R> {
    /// Create a watcher with an explicit title formatter
    pub fn new(config: WatcherConfig, rpc: R, formatter: Box<dyn EventFormatter>) -> Self {
        let filter =
            ThresholdFilter::new(config.threshold).with_concurrency(config.fetch_concurrency);
        let feed = FeedBuilder::new(config.feed.clone(), formatter);
        Self {
            config,
            rpc,
            filter,
            feed,
        }
    }

    pub fn config(&self) -> &WatcherConfig {
        &self.config
    }

    /// Execute one complete run
    pub async fn run(&self) -> Result<RunReport, RunError> {
        let mut state = RunState::Init;
        info!("Run state: {}", state);

        let mut processed = ProcessedSet::load(&self.config.state_path);

        let Some(tip) = self.rpc.tip_height().await else {
            state = RunState::Aborted;
            error!("Failed to get the latest block height, run {}", state);
            return Err(RunError::TipUnavailable);
        };

        let window = ScanWindow::ending_at(tip, self.config.window_size);
        info!("Chain tip at {}, scanning window {}", tip, window);
        let mut report = RunReport::new(tip, window);

        let scanner = BlockScanner::new(&self.rpc);
        for height in window.heights() {
            state = self.transition(state, RunState::Scanning);
            let block = match scanner.scan_height(height).await {
                ScanOutcome::Block(block) => block,
                ScanOutcome::Skipped { height, reason } => {
                    warn!("No data for block height {} ({}), skipping", height, reason);
                    report.heights_skipped.push(height);
                    continue;
                }
            };
            report.blocks_scanned += 1;

            state = self.transition(state, RunState::Filtering);
            let outcome = self
                .filter
                .filter_block(&self.rpc, &block, &mut processed)
                .await;
            report.transactions_examined += outcome.examined;
            report.transaction_fetch_failures += outcome.fetch_failures;
            report.already_processed += outcome.already_processed;
            report.events.extend(outcome.events);
        }

        if report.events.is_empty() {
            info!(
                "No transactions found over {}. No RSS feed will be created.",
                self.filter.threshold()
            );
            state = self.transition(state, RunState::Done);
            self.log_summary(&report, state);
            return Ok(report);
        }

        state = self.transition(state, RunState::Persisting);
        processed.save(&self.config.state_path)?;
        report.state_written = true;

        state = self.transition(state, RunState::Rendering);
        let document = self.feed.build(&report.events);
        document.write_to(&self.config.feed_path)?;
        report.feed_written = true;

        state = self.transition(state, RunState::Done);
        self.log_summary(&report, state);
        Ok(report)
    }

    fn transition(&self, from: RunState, to: RunState) -> RunState {
        if from != to {
            debug!("Run state: {} -> {}", from, to);
        }
        to
    }

    fn log_summary(&self, report: &RunReport, state: RunState) {
        info!(
            "Run {}: {} qualifying events, {} blocks scanned, {} heights skipped, {} transactions examined, {} fetch failures",
            state,
            report.events.len(),
            report.blocks_scanned,
            report.heights_skipped.len(),
            report.transactions_examined,
            report.transaction_fetch_failures
        );
    }
}
