use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::utxo::OutPoint;
use crate::wallet::verify_signature_hex;

/// Integer base units. Nothing that is hashed ever goes through a float.
pub type Amount = u64;

/// `previousTxHash` carried by the single input of every coinbase.
pub const NULL_TX_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// `outputIndex` carried by the single input of every coinbase.
pub const COINBASE_OUTPUT_INDEX: u32 = u32::MAX;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxInput {
    /// Transaction that created the output being spent.
    pub previous_tx_hash: String,
    pub output_index: u32,
    /// Hex ECDSA signature (64-byte compact, or DER).
    pub signature: String,
    /// Hex SEC1 public key of the signer.
    pub public_key: String,
    /// Stored and hashed into the block, never enforced.
    pub sequence: u32,
}

impl TxInput {
    pub fn new(outpoint: OutPoint) -> Self {
        Self {
            previous_tx_hash: outpoint.tx_hash,
            output_index: outpoint.output_index,
            signature: String::new(),
            public_key: String::new(),
            sequence: 0,
        }
    }

    fn coinbase(block_height: u64) -> Self {
        Self {
            previous_tx_hash: NULL_TX_HASH.to_string(),
            output_index: COINBASE_OUTPUT_INDEX,
            signature: String::new(),
            public_key: String::new(),
            sequence: u32::try_from(block_height).unwrap_or(u32::MAX),
        }
    }

    /// True for the sentinel input that claims no prior output.
    pub fn is_coinbase(&self) -> bool {
        self.previous_tx_hash == NULL_TX_HASH && self.output_index == COINBASE_OUTPUT_INDEX
    }

    pub fn outpoint(&self) -> OutPoint {
        OutPoint::new(self.previous_tx_hash.clone(), self.output_index)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxOutput {
    pub amount: Amount,
    pub address: String,
    pub script_pub_key: String,
}

impl TxOutput {
    pub fn new(amount: Amount, address: impl Into<String>) -> Self {
        let address = address.into();
        let script_pub_key = script_pub_key(&address);
        Self {
            amount,
            address,
            script_pub_key,
        }
    }
}

/// Fixed ownership template attached to every output. Compared, never run.
pub fn script_pub_key(address: &str) -> String {
    format!("OP_DUP OP_HASH160 {address} OP_EQUALVERIFY OP_CHECKSIG")
}

/// Fields shared by both transaction kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxBody {
    pub hash: String,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    /// Unix milliseconds.
    pub timestamp: i64,
}

/// A ledger transaction, tagged on the wire by `"type"`.
///
/// The serialized key order (`type`, `hash`, `inputs`, `outputs`,
/// `timestamp`) is part of the block hash preimage and must not change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Transaction {
    Coinbase(TxBody),
    Transfer(TxBody),
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InputRef<'a> {
    previous_tx_hash: &'a str,
    output_index: u32,
}

/// Digest over input references (signatures excluded), full outputs and
/// the timestamp.
pub fn transaction_hash(inputs: &[TxInput], outputs: &[TxOutput], timestamp: i64) -> String {
    let refs: Vec<InputRef<'_>> = inputs
        .iter()
        .map(|i| InputRef {
            previous_tx_hash: &i.previous_tx_hash,
            output_index: i.output_index,
        })
        .collect();
    let inputs_json = serde_json::to_string(&refs).expect("serialize input refs");
    let outputs_json = serde_json::to_string(outputs).expect("serialize outputs");

    let mut hasher = Sha256::new();
    hasher.update(inputs_json.as_bytes());
    hasher.update(outputs_json.as_bytes());
    hasher.update(timestamp.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

impl Transaction {
    /// Build an (unsigned) transfer and derive its hash from its content.
    pub fn transfer(inputs: Vec<TxInput>, outputs: Vec<TxOutput>, timestamp: i64) -> Self {
        let hash = transaction_hash(&inputs, &outputs, timestamp);
        Transaction::Transfer(TxBody {
            hash,
            inputs,
            outputs,
            timestamp,
        })
    }

    /// Reward transaction crediting `miner_address` with `amount`.
    pub fn coinbase(miner_address: &str, amount: Amount, block_height: u64) -> Self {
        Self::coinbase_at(
            miner_address,
            amount,
            block_height,
            Utc::now().timestamp_millis(),
        )
    }

    pub fn coinbase_at(
        miner_address: &str,
        amount: Amount,
        block_height: u64,
        timestamp: i64,
    ) -> Self {
        let inputs = vec![TxInput::coinbase(block_height)];
        let outputs = vec![TxOutput::new(amount, miner_address)];
        let hash = transaction_hash(&inputs, &outputs, timestamp);
        Transaction::Coinbase(TxBody {
            hash,
            inputs,
            outputs,
            timestamp,
        })
    }

    pub fn body(&self) -> &TxBody {
        match self {
            Transaction::Coinbase(body) | Transaction::Transfer(body) => body,
        }
    }

    pub fn body_mut(&mut self) -> &mut TxBody {
        match self {
            Transaction::Coinbase(body) | Transaction::Transfer(body) => body,
        }
    }

    pub fn hash(&self) -> &str {
        &self.body().hash
    }

    pub fn inputs(&self) -> &[TxInput] {
        &self.body().inputs
    }

    pub fn outputs(&self) -> &[TxOutput] {
        &self.body().outputs
    }

    pub fn timestamp(&self) -> i64 {
        self.body().timestamp
    }

    pub fn is_coinbase(&self) -> bool {
        matches!(self, Transaction::Coinbase(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Transaction::Coinbase(_) => "coinbase",
            Transaction::Transfer(_) => "transfer",
        }
    }

    /// Hash recomputed from the current content.
    pub fn compute_hash(&self) -> String {
        let body = self.body();
        transaction_hash(&body.inputs, &body.outputs, body.timestamp)
    }

    pub fn total_output_amount(&self) -> u128 {
        self.outputs().iter().map(|o| o.amount as u128).sum()
    }

    /// `Σ input_values − Σ outputs`, or `None` when the transaction would
    /// create value.
    pub fn calculate_fee(&self, input_values: &[Amount]) -> Option<Amount> {
        let inputs: u128 = input_values.iter().map(|v| *v as u128).sum();
        inputs
            .checked_sub(self.total_output_amount())
            .map(|fee| Amount::try_from(fee).unwrap_or(Amount::MAX))
    }

    /// SHA-256 of `hash ‖ previousTxHash ‖ outputIndex`, the digest each
    /// input owner signs.
    pub fn signature_message(&self, input: &TxInput) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.hash().as_bytes());
        hasher.update(input.previous_tx_hash.as_bytes());
        hasher.update(input.output_index.to_string().as_bytes());
        let digest = hasher.finalize();
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest[..]);
        out
    }

    /// Coinbase is always valid. Otherwise every input signature must
    /// verify; any decoding failure counts as a failed verification.
    pub fn is_valid(&self) -> bool {
        if self.is_coinbase() {
            return true;
        }
        self.inputs().iter().all(|input| {
            verify_signature_hex(
                &input.public_key,
                &input.signature,
                self.signature_message(input),
            )
            .unwrap_or(false)
        })
    }
}


#[cfg(test)]
mod tests {
    use super::testutil::{secret_key, signed_transfer};
    use super::*;

    #[test]
    fn hash_excludes_signatures() {
        let sk = secret_key(7);
        let tx = signed_transfer(
            &[(OutPoint::new("aa".repeat(32), 0), &sk)],
            vec![TxOutput::new(5, "bob")],
            1_700_000_000_000,
        );
        let mut stripped = tx.clone();
        for input in &mut stripped.body_mut().inputs {
            input.signature.clear();
            input.public_key.clear();
        }
        assert_eq!(tx.hash(), stripped.compute_hash());
        assert_eq!(tx.hash(), tx.compute_hash());
    }

    #[test]
    fn hash_covers_outputs_and_timestamp() {
        let input = TxInput::new(OutPoint::new("bb".repeat(32), 1));
        let a = Transaction::transfer(vec![input.clone()], vec![TxOutput::new(5, "bob")], 1);
        let b = Transaction::transfer(vec![input.clone()], vec![TxOutput::new(6, "bob")], 1);
        let c = Transaction::transfer(vec![input], vec![TxOutput::new(5, "bob")], 2);
        assert_ne!(a.hash(), b.hash());
        assert_ne!(a.hash(), c.hash());
    }

    #[test]
    fn coinbase_shape() {
        let cb = Transaction::coinbase_at("miner", 10, 3, 42);
        assert!(cb.is_coinbase());
        assert!(cb.is_valid());
        assert_eq!(cb.inputs().len(), 1);
        assert!(cb.inputs()[0].is_coinbase());
        assert_eq!(cb.inputs()[0].previous_tx_hash.len(), 64);
        assert_eq!(cb.outputs()[0].amount, 10);
        assert_eq!(cb.outputs()[0].address, "miner");
        assert_eq!(cb.outputs()[0].script_pub_key, script_pub_key("miner"));
    }

    #[test]
    fn signed_transfer_verifies() {
        let sk = secret_key(9);
        let tx = signed_transfer(
            &[
                (OutPoint::new("cc".repeat(32), 0), &sk),
                (OutPoint::new("dd".repeat(32), 2), &sk),
            ],
            vec![TxOutput::new(5, "bob")],
            100,
        );
        assert!(tx.is_valid());
    }

    #[test]
    fn tampered_signature_fails_closed() {
        let sk = secret_key(9);
        let mut tx = signed_transfer(
            &[(OutPoint::new("cc".repeat(32), 0), &sk)],
            vec![TxOutput::new(5, "bob")],
            100,
        );
        tx.body_mut().inputs[0].signature = "zz-not-hex".into();
        assert!(!tx.is_valid());

        let mut wrong_key = tx.clone();
        wrong_key.body_mut().inputs[0].public_key = super::testutil::public_key_hex(&secret_key(3));
        assert!(!wrong_key.is_valid());
    }

    #[test]
    fn signature_bound_to_hash() {
        let sk = secret_key(4);
        let signed = signed_transfer(
            &[(OutPoint::new("ee".repeat(32), 0), &sk)],
            vec![TxOutput::new(5, "bob")],
            100,
        );
        // Same signature replayed onto a transaction paying someone else.
        let mut forged = Transaction::transfer(
            signed.inputs().to_vec(),
            vec![TxOutput::new(5, "mallory")],
            100,
        );
        forged.body_mut().inputs[0].signature = signed.inputs()[0].signature.clone();
        assert!(!forged.is_valid());
    }

    #[test]
    fn fee_is_input_minus_output() {
        let tx = Transaction::transfer(
            vec![TxInput::new(OutPoint::new("ff".repeat(32), 0))],
            vec![TxOutput::new(7, "a"), TxOutput::new(2, "b")],
            1,
        );
        assert_eq!(tx.calculate_fee(&[10]), Some(1));
        assert_eq!(tx.calculate_fee(&[9]), Some(0));
        assert_eq!(tx.calculate_fee(&[8]), None);
    }

    #[test]
    fn wire_form_is_tagged() {
        let cb = Transaction::coinbase_at("miner", 10, 1, 5);
        let json = serde_json::to_string(&cb).unwrap();
        assert!(json.starts_with(r#"{"type":"coinbase","hash":""#));
        let back: Transaction = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cb);
    }
}
