//! Models for `getblock <hash> 2` (block with decoded transactions).
//!
//! Integers stay signed as the node reports them; decoding narrows them.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcBlock {
    pub hash: String,
    pub height: i64,
    pub version: i64,
    #[serde(rename = "merkleroot")]
    pub merkle_root: String,
    pub time: i64,
    pub nonce: i64,
    pub bits: String,
    pub difficulty: f64,
    pub size: i64,
    #[serde(rename = "nTx", default)]
    pub n_tx: Option<i64>,
    #[serde(default)]
    pub tx: Vec<RpcTransaction>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcTransaction {
    pub txid: String,
    pub version: i64,
    pub size: i64,
    /// Absent on pre-segwit nodes; falls back to `size`.
    #[serde(default)]
    pub vsize: Option<i64>,
    pub locktime: i64,
    pub vin: Vec<RpcInput>,
    pub vout: Vec<RpcOutput>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcInput {
    /// Coinbase script; present only on the coinbase input.
    #[serde(default)]
    pub coinbase: Option<String>,
    #[serde(default)]
    pub txid: Option<String>,
    #[serde(default)]
    pub vout: Option<i64>,
    #[serde(rename = "scriptSig", default)]
    pub script_sig: Option<RpcScriptSig>,
    #[serde(rename = "txinwitness", default)]
    pub witness: Vec<String>,
    pub sequence: i64,
}

impl RpcInput {
    pub fn is_coinbase(&self) -> bool {
        self.coinbase.is_some()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RpcScriptSig {
    pub asm: String,
    pub hex: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcOutput {
    /// Amount in coins.
    pub value: f64,
    pub n: i64,
    #[serde(rename = "scriptPubKey")]
    pub script_pub_key: RpcScriptPubKey,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcScriptPubKey {
    pub asm: String,
    pub hex: String,
    #[serde(rename = "type")]
    pub kind: String,
    /// Bitcoin Core 22+.
    #[serde(default)]
    pub address: Option<String>,
    /// Older nodes and multisig outputs.
    #[serde(default)]
    pub addresses: Option<Vec<String>>,
}

impl RpcScriptPubKey {
    /// Every address the script pays to, in node order.
    pub fn addresses(&self) -> Vec<String> {
        match (&self.address, &self.addresses) {
            (Some(address), _) => vec![address.clone()],
            (None, Some(addresses)) => addresses.clone(),
            (None, None) => Vec::new(),
        }
    }
}
