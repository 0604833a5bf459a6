//! Node RPC Client
//!
//! Issues JSON-RPC calls against the chain node over authenticated HTTP.
//! Every failure mode (timeout, refused connection, bad status, bad body, RPC error)
//! is logged and reported to the caller as absence, so one bad call never aborts a run.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::types::{
    decode_block, decode_block_hash, decode_height, decode_transaction, BlockSummary,
    ChainHeight, RawTransaction,
};

/// Default node RPC endpoint
pub const DEFAULT_RPC_URL: &str = "http://127.0.0.1:11111";

/// Default RPC user
pub const DEFAULT_RPC_USER: &str = "daemonrpcuser";

/// Default RPC password
pub const DEFAULT_RPC_PASSWORD: &str = "daemonrpcpassword";

/// Per-request timeout in milliseconds
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

/// Connect timeout in milliseconds
pub const CONNECT_TIMEOUT_MS: u64 = 5_000;

/// JSON-RPC request id sent with every call
pub const REQUEST_ID_PREFIX: &str = "whale-feed";

/// Errors that can occur during a single node call
#[derive(Error, Debug)]
pub enum NodeError {
    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(String),

    #[error("Request timed out after {0}ms")]
    Timeout(u64),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Node returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed response body: {0}")]
    MalformedBody(String),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Response has no result")]
    MissingResult,
}

/// The fixed vocabulary of node queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpcMethod {
    /// Height of the current chain tip
    TipHeight,
    /// Block hash at a given height
    BlockHashAtHeight,
    /// Block body by hash
    BlockByHash,
    /// Verbose transaction by identifier
    TransactionById,
}

impl RpcMethod {
    /// Returns the method name on the wire
    pub fn wire_name(&self) -> &'static str {
        match self {
            RpcMethod::TipHeight => "getblockcount",
            RpcMethod::BlockHashAtHeight => "getblockhash",
            RpcMethod::BlockByHash => "getblock",
            RpcMethod::TransactionById => "getrawtransaction",
        }
    }
}

/// Connection settings for the node
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// RPC endpoint URL
    pub url: String,
    /// Basic auth user
    pub user: String,
    /// Basic auth password
    pub password: String,
    /// Per-request timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_RPC_URL.to_string(),
            user: DEFAULT_RPC_USER.to_string(),
            password: DEFAULT_RPC_PASSWORD.to_string(),
            timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
        }
    }
}

impl NodeConfig {
    /// Create a config pointing at the given endpoint with default credentials
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Request/response access to the node
///
/// `call` returns `None` whenever the node could not produce a result. The caller
/// decides whether that absence is fatal.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NodeRpc: Send + Sync {
    async fn call(&self, method: RpcMethod, params: Vec<Value>) -> Option<Value>;
}

/// Typed queries layered over `NodeRpc`
#[async_trait]
pub trait NodeQueries {
    async fn tip_height(&self) -> Option<ChainHeight>;
    async fn block_hash_at(&self, height: ChainHeight) -> Option<String>;
    async fn block_by_hash(&self, hash: &str, height: ChainHeight) -> Option<BlockSummary>;
    async fn transaction_by_id(&self, txid: &str) -> Option<RawTransaction>;
}

#[async_trait]
impl<T: NodeRpc + ?Sized> NodeQueries for T {
    async fn tip_height(&self) -> Option<ChainHeight> {
        let result = self.call(RpcMethod::TipHeight, vec![]).await?;
        decode_height(&result)
            .map_err(|e| warn!("Discarding tip height: {}", e))
            .ok()
    }

    async fn block_hash_at(&self, height: ChainHeight) -> Option<String> {
        let result = self.call(RpcMethod::BlockHashAtHeight, vec![json!(height)]).await?;
        decode_block_hash(result)
            .map_err(|e| warn!("Discarding block hash at height {}: {}", height, e))
            .ok()
    }

    async fn block_by_hash(&self, hash: &str, height: ChainHeight) -> Option<BlockSummary> {
        let result = self.call(RpcMethod::BlockByHash, vec![json!(hash)]).await?;
        decode_block(result, height)
            .map_err(|e| warn!("Discarding block {} at height {}: {}", hash, height, e))
            .ok()
    }

    async fn transaction_by_id(&self, txid: &str) -> Option<RawTransaction> {
        let result = self
            .call(RpcMethod::TransactionById, vec![json!(txid), json!(true)])
            .await?;
        decode_transaction(result, txid)
            .map_err(|e| warn!("Discarding transaction {}: {}", txid, e))
            .ok()
    }
}

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: String,
    method: &'a str,
    params: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

/// HTTP JSON-RPC client for the node
pub struct NodeClient {
    http: reqwest::Client,
    config: NodeConfig,
    request_id: AtomicU64,
}

impl NodeClient {
    /// Create a client from connection settings
    ///
    /// # Returns
    /// An error only if the underlying HTTP client cannot be constructed
    pub fn new(config: NodeConfig) -> Result<Self, NodeError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .connect_timeout(Duration::from_millis(CONNECT_TIMEOUT_MS.min(config.timeout_ms)))
            .build()
            .map_err(|e| NodeError::ClientBuild(e.to_string()))?;

        Ok(Self {
            http,
            config,
            request_id: AtomicU64::new(1),
        })
    }

    /// Get the endpoint URL
    pub fn url(&self) -> &str {
        &self.config.url
    }

    /// Perform one round-trip and translate every failure into a `NodeError`
    pub async fn try_call(&self, method: RpcMethod, params: Vec<Value>) -> Result<Value, NodeError> {
        let id = self.request_id.fetch_add(1, Ordering::Relaxed);
        let request = RpcRequest {
            jsonrpc: "1.0",
            id: format!("{}-{}", REQUEST_ID_PREFIX, id),
            method: method.wire_name(),
            params,
        };

        let response = self
            .http
            .post(&self.config.url)
            .basic_auth(&self.config.user, Some(&self.config.password))
            .json(&request)
            .send()
            .await
            .map_err(|e| self.translate(e))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| self.translate(e))?;

        // Bitcoin-style nodes answer RPC errors with HTTP 500 and a JSON error body
        let parsed: Result<RpcResponse, _> = serde_json::from_str(&body);
        if let Ok(RpcResponse {
            error: Some(err), ..
        }) = &parsed
        {
            return Err(NodeError::Rpc {
                code: err.code,
                message: err.message.clone(),
            });
        }

        if !status.is_success() {
            return Err(NodeError::Status {
                status: status.as_u16(),
                body: truncate(&body, 200),
            });
        }

        match parsed {
            Ok(RpcResponse {
                result: Some(result),
                ..
            }) if !result.is_null() => Ok(result),
            Ok(_) => Err(NodeError::MissingResult),
            Err(e) => Err(NodeError::MalformedBody(e.to_string())),
        }
    }

    fn translate(&self, err: reqwest::Error) -> NodeError {
        if err.is_timeout() {
            NodeError::Timeout(self.config.timeout_ms)
        } else {
            NodeError::Transport(err.to_string())
        }
    }
}

#[async_trait]
impl NodeRpc for NodeClient {
    async fn call(&self, method: RpcMethod, params: Vec<Value>) -> Option<Value> {
        debug!("RPC {} {:?}", method.wire_name(), params);
        match self.try_call(method, params).await {
            Ok(result) => Some(result),
            Err(e) => {
                warn!("RPC call {} failed: {}", method.wire_name(), e);
                None
            }
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
