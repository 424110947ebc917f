//! utxoindex-bitcoin: Bitcoin-family chain adapter for UtxoIndex.
//!
//! Turns `getblock <hash> 2` responses into the engine's history and
//! backfill bundles. The RPC transport itself stays behind
//! [`BitcoinRpcClient`]; bring your own HTTP client.

pub mod amount;
pub mod bits;
pub mod decode;
pub mod rpc;
pub mod source;

pub use amount::{format_amount, from_base, parse_amount, to_base, COIN};
pub use bits::parse_bits;
pub use decode::{backfill_block, block_header, history_block};
pub use rpc::{RpcBlock, RpcInput, RpcOutput, RpcScriptPubKey, RpcScriptSig, RpcTransaction};
pub use source::{BitcoinRpcClient, BitcoinSource};
