use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::LedgerError;
use crate::transaction::TransactionPayload;

/// A pre-mined candidate block as a miner sends it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockSubmission {
    pub index: u64,
    pub timestamp: i64,
    pub previous_hash: String,
    pub nonce: u64,
    pub hash: String,
    pub miner_address: String,
    pub transactions: Vec<TransactionPayload>,
}

impl BlockSubmission {
    /// Shape check on an untyped body: integer header fields, string hashes,
    /// a transaction list and a non-empty miner address. An empty list is
    /// left to the coinbase rules.
    pub fn from_value(value: Value) -> Result<Self, LedgerError> {
        let submission: BlockSubmission = serde_json::from_value(value)
            .map_err(|e| LedgerError::Validation(format!("block submission: {e}")))?;
        if submission.miner_address.trim().is_empty() {
            return Err(LedgerError::Validation("minerAddress is required".into()));
        }
        Ok(submission)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body() -> Value {
        json!({
            "index": 1,
            "timestamp": 1700000000000i64,
            "previousHash": "00",
            "nonce": 3,
            "hash": "ab",
            "minerAddress": "miner",
            "transactions": [{
                "hash": "h",
                "type": "coinbase",
                "inputs": [],
                "outputs": [{"amount": 10, "address": "miner"}],
                "timestamp": 1
            }]
        })
    }

    #[test]
    fn accepts_well_formed_body() {
        let s = BlockSubmission::from_value(body()).unwrap();
        assert_eq!(s.index, 1);
        assert_eq!(s.transactions.len(), 1);
    }

    #[test]
    fn rejects_non_integer_fields() {
        let mut v = body();
        v["nonce"] = json!("3");
        assert!(matches!(
            BlockSubmission::from_value(v),
            Err(LedgerError::Validation(_))
        ));

        let mut v = body();
        v["index"] = json!(1.5);
        assert!(BlockSubmission::from_value(v).is_err());
    }

    #[test]
    fn rejects_missing_miner() {
        let mut v = body();
        v["minerAddress"] = json!("  ");
        assert!(matches!(
            BlockSubmission::from_value(v),
            Err(LedgerError::Validation(m)) if m.contains("minerAddress")
        ));

        let mut v = body();
        v.as_object_mut().unwrap().remove("minerAddress");
        assert!(BlockSubmission::from_value(v).is_err());
    }
}
