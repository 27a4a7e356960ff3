//! Untrusted wire shapes and the single validated step that turns them into
//! [`Transaction`]s.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::model::{Amount, Transaction, TxBody, TxInput, TxOutput, script_pub_key, transaction_hash};
use crate::error::LedgerError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputPayload {
    pub previous_tx_hash: String,
    pub output_index: u32,
    #[serde(default)]
    pub signature: String,
    #[serde(default)]
    pub public_key: String,
    #[serde(default)]
    pub sequence: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputPayload {
    pub amount: Amount,
    pub address: String,
    #[serde(default)]
    pub script_pub_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionPayload {
    pub hash: String,
    /// `"coinbase"` or `"transfer"`; absent means transfer.
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub inputs: Vec<InputPayload>,
    pub outputs: Vec<OutputPayload>,
    pub timestamp: i64,
}

impl From<InputPayload> for TxInput {
    fn from(p: InputPayload) -> Self {
        TxInput {
            previous_tx_hash: p.previous_tx_hash,
            output_index: p.output_index,
            signature: p.signature,
            public_key: p.public_key,
            sequence: p.sequence,
        }
    }
}

impl TryFrom<OutputPayload> for TxOutput {
    type Error = LedgerError;

    fn try_from(p: OutputPayload) -> Result<Self, Self::Error> {
        if p.address.trim().is_empty() {
            return Err(LedgerError::Validation("output address is empty".into()));
        }
        let out = TxOutput::new(p.amount, p.address);
        if let Some(script) = p.script_pub_key {
            if !script.is_empty() && script != out.script_pub_key {
                return Err(LedgerError::Validation(format!(
                    "scriptPubKey does not match address {}",
                    out.address
                )));
            }
        }
        Ok(out)
    }
}

impl TryFrom<TransactionPayload> for Transaction {
    type Error = LedgerError;

    fn try_from(p: TransactionPayload) -> Result<Self, Self::Error> {
        let coinbase = match p.kind.as_deref() {
            None | Some("transfer") => false,
            Some("coinbase") => true,
            Some(other) => {
                return Err(LedgerError::Validation(format!(
                    "unknown transaction type {other:?}"
                )));
            }
        };

        if p.outputs.is_empty() {
            return Err(LedgerError::Validation(format!(
                "transaction {} has no outputs",
                p.hash
            )));
        }
        if p.inputs.is_empty() {
            return Err(LedgerError::Validation(format!(
                "transaction {} has no inputs",
                p.hash
            )));
        }

        let inputs: Vec<TxInput> = p.inputs.into_iter().map(TxInput::from).collect();
        let outputs = p
            .outputs
            .into_iter()
            .map(TxOutput::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        let mut seen = HashSet::with_capacity(inputs.len());
        if !inputs.iter().all(|i| seen.insert(i.outpoint())) {
            return Err(LedgerError::Validation(format!(
                "transaction {} spends the same output twice",
                p.hash
            )));
        }

        if coinbase && !(inputs.len() == 1 && inputs[0].is_coinbase()) {
            return Err(LedgerError::Validation(format!(
                "coinbase {} must have exactly one sentinel input",
                p.hash
            )));
        }

        let expected = transaction_hash(&inputs, &outputs, p.timestamp);
        if expected != p.hash {
            return Err(LedgerError::Validation(format!(
                "transaction hash mismatch: provided {}, calculated {expected}",
                p.hash
            )));
        }

        let body = TxBody {
            hash: p.hash,
            inputs,
            outputs,
            timestamp: p.timestamp,
        };
        Ok(if coinbase {
            Transaction::Coinbase(body)
        } else {
            Transaction::Transfer(body)
        })
    }
}

impl From<&Transaction> for TransactionPayload {
    fn from(tx: &Transaction) -> Self {
        TransactionPayload {
            hash: tx.hash().to_string(),
            kind: Some(tx.kind().to_string()),
            inputs: tx
                .inputs()
                .iter()
                .map(|i| InputPayload {
                    previous_tx_hash: i.previous_tx_hash.clone(),
                    output_index: i.output_index,
                    signature: i.signature.clone(),
                    public_key: i.public_key.clone(),
                    sequence: i.sequence,
                })
                .collect(),
            outputs: tx
                .outputs()
                .iter()
                .map(|o| OutputPayload {
                    amount: o.amount,
                    address: o.address.clone(),
                    script_pub_key: Some(o.script_pub_key.clone()),
                })
                .collect(),
            timestamp: tx.timestamp(),
        }
    }
}
