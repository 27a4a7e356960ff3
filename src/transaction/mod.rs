pub mod model;
pub mod payload;
pub mod utxo;

pub use model::{
    Amount, COINBASE_OUTPUT_INDEX, NULL_TX_HASH, Transaction, TxBody, TxInput, TxOutput,
    script_pub_key, transaction_hash,
};
pub use payload::{InputPayload, OutputPayload, TransactionPayload};
pub use utxo::{OutPoint, Utxo, UtxoSet};
