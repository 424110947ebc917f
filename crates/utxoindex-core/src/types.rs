//! Row types shared by every ingestion pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Placeholder value used for zeroed hashes and merkle roots.
pub const ZERO_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

// ─── ChainScope ───────────────────────────────────────────────────────────────

/// The `(coin, network)` pair that scopes every stored row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChainScope {
    pub coin: String,
    pub network: String,
}

impl ChainScope {
    pub fn new(coin: impl Into<String>, network: impl Into<String>) -> Self {
        Self {
            coin: coin.into(),
            network: network.into(),
        }
    }

    /// Returns `true` if the given row scope belongs to this pair.
    pub fn matches(&self, coin: &str, network: &str) -> bool {
        self.coin == coin && self.network == network
    }
}

impl std::fmt::Display for ChainScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.coin, self.network)
    }
}

// ─── BlockStatus ──────────────────────────────────────────────────────────────

/// Lifecycle of a block height: `new` → `unprocessed` → `processed`.
///
/// The store resolves a height with `argMax(status, updated_at)`, so the most
/// recently written row wins. Writers only ever move a height forward in this
/// ordering.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum BlockStatus {
    /// Placeholder written by the follower.
    New = 1,
    /// Header, transactions and outputs written by history.
    Unprocessed = 2,
    /// Inputs resolved and written by backfill.
    Processed = 3,
}

impl BlockStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Unprocessed => "unprocessed",
            Self::Processed => "processed",
        }
    }

    /// Numeric value stored in the status column.
    pub fn value(&self) -> u8 {
        *self as u8
    }
}

impl std::fmt::Display for BlockStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Rows ─────────────────────────────────────────────────────────────────────

/// One block header row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub coin: String,
    pub network: String,
    pub height: u64,
    pub hash: String,
    pub timestamp: DateTime<Utc>,
    pub version: u32,
    pub merkle_root: String,
    pub bits: u32,
    pub nonce: u32,
    pub difficulty: f64,
    pub size: u32,
    pub tx_count: u32,
    pub status: BlockStatus,
    /// Insertion time; the tie-breaker of the status winner.
    pub updated_at: DateTime<Utc>,
}

impl Block {
    /// A zeroed placeholder row marking a discovered height.
    pub fn placeholder(scope: &ChainScope, height: u64) -> Self {
        Self {
            coin: scope.coin.clone(),
            network: scope.network.clone(),
            height,
            hash: ZERO_HASH.to_string(),
            timestamp: DateTime::UNIX_EPOCH,
            version: 0,
            merkle_root: ZERO_HASH.to_string(),
            bits: 0,
            nonce: 0,
            difficulty: 0.0,
            size: 0,
            tx_count: 0,
            status: BlockStatus::New,
            updated_at: Utc::now(),
        }
    }

    /// Returns a copy of this row promoted to `status`, stamped with a fresh `updated_at`.
    pub fn with_status(mut self, status: BlockStatus) -> Self {
        self.status = status;
        self.updated_at = Utc::now();
        self
    }
}

/// One transaction row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub coin: String,
    pub network: String,
    pub txid: String,
    pub block_height: u64,
    pub timestamp: DateTime<Utc>,
    pub size: u32,
    pub vsize: u32,
    pub version: u32,
    pub lock_time: u32,
    pub input_count: u32,
    pub output_count: u32,
}

/// One transaction output row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionOutput {
    pub coin: String,
    pub network: String,
    pub block_height: u64,
    pub block_time: DateTime<Utc>,
    pub txid: String,
    pub output_index: u32,
    /// Value in base units (satoshis).
    pub value: u64,
    pub script_type: String,
    pub script_hex: String,
    pub script_asm: String,
    pub addresses: Vec<String>,
}

/// Projection of [`TransactionOutput`] used to resolve previous outputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionOutputLookup {
    pub coin: String,
    pub network: String,
    pub txid: String,
    pub output_index: u32,
    pub value: u64,
    pub addresses: Vec<String>,
}

impl From<&TransactionOutput> for TransactionOutputLookup {
    fn from(out: &TransactionOutput) -> Self {
        Self {
            coin: out.coin.clone(),
            network: out.network.clone(),
            txid: out.txid.clone(),
            output_index: out.output_index,
            value: out.value,
            addresses: out.addresses.clone(),
        }
    }
}

/// One transaction input row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionInput {
    pub coin: String,
    pub network: String,
    pub block_height: u64,
    pub block_time: DateTime<Utc>,
    pub txid: String,
    pub input_index: u32,
    /// Empty for coinbase inputs.
    pub prev_txid: String,
    pub prev_vout: u32,
    pub sequence: u32,
    pub is_coinbase: bool,
    /// Copied from the referenced output; zero until resolved.
    pub value: u64,
    pub script_sig_hex: String,
    pub script_sig_asm: String,
    pub witness: Vec<String>,
    pub addresses: Vec<String>,
}

// ─── Bundles ──────────────────────────────────────────────────────────────────

/// Transient grouping of a block with the rows derived from it.
///
/// Never persisted as one unit: writers explode it into row families.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertBlock {
    pub block: Block,
    pub transactions: Vec<Transaction>,
    pub outputs: Vec<TransactionOutput>,
    pub inputs: Vec<TransactionInput>,
}

impl InsertBlock {
    /// A bundle carrying only a block header.
    pub fn header(block: Block) -> Self {
        Self {
            block,
            transactions: Vec::new(),
            outputs: Vec::new(),
            inputs: Vec::new(),
        }
    }

    pub fn height(&self) -> u64 {
        self.block.height
    }
}

/// What a history source returns for one height.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryBlock {
    pub block: Block,
    pub transactions: Vec<Transaction>,
    pub outputs: Vec<TransactionOutput>,
}

impl From<HistoryBlock> for InsertBlock {
    fn from(b: HistoryBlock) -> Self {
        Self {
            block: b.block,
            transactions: b.transactions,
            outputs: b.outputs,
            inputs: Vec::new(),
        }
    }
}

/// A transaction as seen by the backfill path: its inputs still need
/// prev-output resolution, its outputs seed the per-block cache.
#[derive(Debug, Clone, PartialEq)]
pub struct BackfillTransaction {
    pub txid: String,
    pub inputs: Vec<TransactionInput>,
    pub outputs: Vec<TransactionOutputLookup>,
}

/// What a backfill source returns for one height.
#[derive(Debug, Clone, PartialEq)]
pub struct BackfillBlock {
    pub block: Block,
    pub transactions: Vec<BackfillTransaction>,
}
