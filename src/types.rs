//! Chain Payload Types
//!
//! Decodes block and transaction payloads returned by the node into typed values.
//! Output values are parsed into exact decimals so threshold comparisons never lose
//! precision to floating point rounding.

use std::str::FromStr;

use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Position of a block in the chain
pub type ChainHeight = u64;

/// Errors that can occur while decoding node payloads
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Malformed block payload: {0}")]
    MalformedBlock(String),

    #[error("Malformed transaction payload: {0}")]
    MalformedTransaction(String),

    #[error("Unexpected result shape for {method}: {found}")]
    UnexpectedShape { method: &'static str, found: String },
}

/// Block header fields and transaction list for one height
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockSummary {
    /// Block height
    pub height: ChainHeight,
    /// Block time in seconds since the Unix epoch
    pub timestamp: i64,
    /// Transaction identifiers in block order
    pub txids: Vec<String>,
}

/// A single transaction output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Output {
    /// Output index within the transaction, when reported by the node
    pub index: Option<u32>,
    /// Output value in node-native units, `None` if the node sent something unparseable
    pub value: Option<Decimal>,
}

/// A fully fetched transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTransaction {
    /// Transaction identifier
    pub txid: String,
    /// Outputs in transaction order
    pub outputs: Vec<Output>,
}

impl RawTransaction {
    pub fn has_outputs(&self) -> bool {
        !self.outputs.is_empty()
    }
}

/// A transaction output that crossed the threshold and has not been reported before
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualifyingEvent {
    /// Transaction identifier
    pub txid: String,
    /// Value of the qualifying output
    pub amount: Decimal,
    /// Timestamp of the containing block
    pub block_time: i64,
}

#[derive(Deserialize)]
struct BlockPayload {
    height: Option<ChainHeight>,
    time: Option<i64>,
    tx: Vec<String>,
}

#[derive(Deserialize)]
struct TransactionPayload {
    txid: Option<String>,
    #[serde(default)]
    vout: Vec<OutputPayload>,
}

#[derive(Deserialize)]
struct OutputPayload {
    n: Option<u32>,
    #[serde(default)]
    value: Value,
}

/// Decode a `getblock` result into a `BlockSummary`
///
/// # Arguments
/// * `result` - The JSON result returned by the node
/// * `requested_height` - The height the block was requested for, used when the payload omits it
///
/// # Returns
/// The decoded block. A missing or null `time` field decodes as 0, a missing `tx` list is an error.
pub fn decode_block(result: Value, requested_height: ChainHeight) -> Result<BlockSummary, DecodeError> {
    let payload: BlockPayload =
        serde_json::from_value(result).map_err(|e| DecodeError::MalformedBlock(e.to_string()))?;

    Ok(BlockSummary {
        height: payload.height.unwrap_or(requested_height),
        timestamp: payload.time.unwrap_or(0),
        txids: payload.tx,
    })
}

/// Decode a verbose `getrawtransaction` result into a `RawTransaction`
///
/// # Arguments
/// * `result` - The JSON result returned by the node
/// * `requested_txid` - The identifier that was requested, used when the payload omits it
pub fn decode_transaction(result: Value, requested_txid: &str) -> Result<RawTransaction, DecodeError> {
    let payload: TransactionPayload = serde_json::from_value(result)
        .map_err(|e| DecodeError::MalformedTransaction(e.to_string()))?;

    let outputs = payload
        .vout
        .into_iter()
        .map(|out| Output {
            index: out.n,
            value: parse_amount(&out.value),
        })
        .collect();

    Ok(RawTransaction {
        txid: payload.txid.unwrap_or_else(|| requested_txid.to_string()),
        outputs,
    })
}

/// Decode a `getblockcount` result
pub fn decode_height(result: &Value) -> Result<ChainHeight, DecodeError> {
    result.as_u64().ok_or_else(|| DecodeError::UnexpectedShape {
        method: "getblockcount",
        found: result.to_string(),
    })
}

/// Decode a `getblockhash` result
pub fn decode_block_hash(result: Value) -> Result<String, DecodeError> {
    match result {
        Value::String(hash) if !hash.is_empty() => Ok(hash),
        other => Err(DecodeError::UnexpectedShape {
            method: "getblockhash",
            found: other.to_string(),
        }),
    }
}

/// Parse an output value in whatever numeric form the node emits
///
/// Accepts JSON integers, fixed or floating decimals, scientific notation and
/// decimal strings. Anything else yields `None`.
pub fn parse_amount(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => parse_decimal_str(&n.to_string()),
        Value::String(s) => parse_decimal_str(s.trim()),
        _ => None,
    }
}

fn parse_decimal_str(s: &str) -> Option<Decimal> {
    if s.is_empty() {
        return None;
    }
    Decimal::from_str(s)
        .or_else(|_| Decimal::from_scientific(s))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::prelude::FromPrimitive;
    use serde_json::json;

    // ==================== parse_amount tests ====================

    #[test]
    fn test_parse_amount_integer() {
        assert_eq!(parse_amount(&json!(2500000)), Some(Decimal::from(2_500_000)));
    }

    #[test]
    fn test_parse_amount_fixed_decimal() {
        assert_eq!(
            parse_amount(&json!(1000000.00000001)),
            Some(Decimal::from_str("1000000.00000001").unwrap())
        );
    }

    #[test]
    fn test_parse_amount_float_with_trailing_zero() {
        assert_eq!(parse_amount(&json!(12.5)), Decimal::from_f64(12.5));
    }

    #[test]
    fn test_parse_amount_string() {
        assert_eq!(
            parse_amount(&json!("42.00000000")),
            Some(Decimal::from_str("42").unwrap())
        );
    }

    #[test]
    fn test_parse_amount_scientific_string() {
        assert_eq!(parse_amount(&json!("2.5e6")), Some(Decimal::from(2_500_000)));
    }

    #[test]
    fn test_parse_amount_rejects_garbage() {
        assert_eq!(parse_amount(&json!("lots")), None);
        assert_eq!(parse_amount(&json!("")), None);
        assert_eq!(parse_amount(&json!(null)), None);
        assert_eq!(parse_amount(&json!(true)), None);
        assert_eq!(parse_amount(&json!({"value": 1})), None);
    }

    // ==================== decode_block tests ====================

    #[test]
    fn test_decode_block_full_payload() {
        let block = decode_block(
            json!({"height": 11, "time": 1700000000, "tx": ["abc", "def"], "hash": "00ff"}),
            11,
        )
        .unwrap();

        assert_eq!(block.height, 11);
        assert_eq!(block.timestamp, 1700000000);
        assert_eq!(block.txids, vec!["abc".to_string(), "def".to_string()]);
    }

    #[test]
    fn test_decode_block_missing_time_defaults_to_zero() {
        let block = decode_block(json!({"height": 5, "tx": []}), 5).unwrap();
        assert_eq!(block.timestamp, 0);
        assert!(block.txids.is_empty());
    }

    #[test]
    fn test_decode_block_null_time_defaults_to_zero() {
        let block = decode_block(json!({"height": 5, "time": null, "tx": ["a"]}), 5).unwrap();
        assert_eq!(block.timestamp, 0);
        assert_eq!(block.txids, vec!["a".to_string()]);
    }

    #[test]
    fn test_decode_block_missing_height_uses_requested() {
        let block = decode_block(json!({"time": 1, "tx": ["a"]}), 77).unwrap();
        assert_eq!(block.height, 77);
    }

    #[test]
    fn test_decode_block_missing_tx_is_error() {
        let result = decode_block(json!({"height": 5, "time": 1}), 5);
        assert!(matches!(result, Err(DecodeError::MalformedBlock(_))));
    }

    #[test]
    fn test_decode_block_non_object_is_error() {
        assert!(decode_block(json!("00ff"), 5).is_err());
    }

    // ==================== decode_transaction tests ====================

    #[test]
    fn test_decode_transaction_outputs_in_order() {
        let tx = decode_transaction(
            json!({
                "txid": "abc",
                "vout": [
                    {"value": 1.5, "n": 0},
                    {"value": 2500000, "n": 1}
                ]
            }),
            "abc",
        )
        .unwrap();

        assert_eq!(tx.txid, "abc");
        assert_eq!(tx.outputs.len(), 2);
        assert_eq!(tx.outputs[0].index, Some(0));
        assert_eq!(tx.outputs[1].value, Some(Decimal::from(2_500_000)));
    }

    #[test]
    fn test_decode_transaction_without_vout_has_no_outputs() {
        let tx = decode_transaction(json!({"txid": "abc"}), "abc").unwrap();
        assert!(!tx.has_outputs());
    }

    #[test]
    fn test_decode_transaction_keeps_unparseable_value_as_none() {
        let tx = decode_transaction(json!({"vout": [{"value": "n/a"}]}), "xyz").unwrap();
        assert_eq!(tx.txid, "xyz");
        assert_eq!(tx.outputs[0].value, None);
        assert_eq!(tx.outputs[0].index, None);
    }

    #[test]
    fn test_decode_transaction_malformed_vout_is_error() {
        let result = decode_transaction(json!({"txid": "abc", "vout": 3}), "abc");
        assert!(matches!(result, Err(DecodeError::MalformedTransaction(_))));
    }

    // ==================== scalar result tests ====================

    #[test]
    fn test_decode_height() {
        assert_eq!(decode_height(&json!(12)).unwrap(), 12);
        assert!(decode_height(&json!("12")).is_err());
        assert!(decode_height(&json!(-1)).is_err());
    }

    #[test]
    fn test_decode_block_hash() {
        assert_eq!(decode_block_hash(json!("00ab")).unwrap(), "00ab");
        assert!(decode_block_hash(json!("")).is_err());
        assert!(decode_block_hash(json!(5)).is_err());
    }

    #[test]
    fn test_decode_error_display() {
        let err = DecodeError::UnexpectedShape {
            method: "getblockhash",
            found: "5".to_string(),
        };
        assert!(err.to_string().contains("getblockhash"));
    }
}
