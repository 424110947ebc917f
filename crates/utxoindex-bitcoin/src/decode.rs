//! `getblock` verbosity-2 → engine rows.
//!
//! Every RPC integer is narrowed through `utxoindex_core::convert`, so an
//! out-of-range value fails the height with `Overflow` instead of wrapping.

use chrono::{DateTime, Utc};

use utxoindex_core::convert::{to_u32, to_u64};
use utxoindex_core::{
    BackfillBlock, BackfillTransaction, Block, BlockStatus, ChainScope, HistoryBlock,
    IngestError, Transaction, TransactionInput, TransactionOutput, TransactionOutputLookup,
};

use crate::amount::to_base;
use crate::bits::parse_bits;
use crate::rpc::{RpcBlock, RpcInput, RpcOutput, RpcTransaction};

fn timestamp(secs: i64) -> Result<DateTime<Utc>, IngestError> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| IngestError::Other(format!("invalid block time {secs}")))
}

/// The block header row. Status is `new`; writers set the real one.
pub fn block_header(scope: &ChainScope, block: &RpcBlock) -> Result<Block, IngestError> {
    let tx_count = match block.n_tx {
        Some(n) => to_u32(n)?,
        None => to_u32(block.tx.len())?,
    };
    Ok(Block {
        coin: scope.coin.clone(),
        network: scope.network.clone(),
        height: to_u64(block.height)?,
        hash: block.hash.clone(),
        timestamp: timestamp(block.time)?,
        version: to_u32(block.version)?,
        merkle_root: block.merkle_root.clone(),
        bits: parse_bits(&block.bits)?,
        nonce: to_u32(block.nonce)?,
        difficulty: block.difficulty,
        size: to_u32(block.size)?,
        tx_count,
        status: BlockStatus::New,
        updated_at: Utc::now(),
    })
}

fn transaction_row(
    scope: &ChainScope,
    height: u64,
    time: DateTime<Utc>,
    tx: &RpcTransaction,
) -> Result<Transaction, IngestError> {
    Ok(Transaction {
        coin: scope.coin.clone(),
        network: scope.network.clone(),
        txid: tx.txid.clone(),
        block_height: height,
        timestamp: time,
        size: to_u32(tx.size)?,
        vsize: to_u32(tx.vsize.unwrap_or(tx.size))?,
        version: to_u32(tx.version)?,
        lock_time: to_u32(tx.locktime)?,
        input_count: to_u32(tx.vin.len())?,
        output_count: to_u32(tx.vout.len())?,
    })
}

fn output_row(
    scope: &ChainScope,
    height: u64,
    time: DateTime<Utc>,
    txid: &str,
    out: &RpcOutput,
) -> Result<TransactionOutput, IngestError> {
    Ok(TransactionOutput {
        coin: scope.coin.clone(),
        network: scope.network.clone(),
        block_height: height,
        block_time: time,
        txid: txid.to_string(),
        output_index: to_u32(out.n)?,
        value: to_base(out.value)?,
        script_type: out.script_pub_key.kind.clone(),
        script_hex: out.script_pub_key.hex.clone(),
        script_asm: out.script_pub_key.asm.clone(),
        addresses: out.script_pub_key.addresses(),
    })
}

/// An input row with `value` and `addresses` left for resolution.
fn input_row(
    scope: &ChainScope,
    height: u64,
    time: DateTime<Utc>,
    txid: &str,
    index: usize,
    input: &RpcInput,
) -> Result<TransactionInput, IngestError> {
    let (prev_txid, prev_vout, script_sig_hex, script_sig_asm) = match &input.coinbase {
        Some(script) => (String::new(), 0, script.clone(), String::new()),
        None => {
            let prev_txid = input.txid.clone().ok_or_else(|| {
                IngestError::Other(format!("input {index} of {txid} has no prev txid"))
            })?;
            let prev_vout = to_u32(input.vout.unwrap_or_default())?;
            let sig = input.script_sig.clone().unwrap_or_default();
            (prev_txid, prev_vout, sig.hex, sig.asm)
        }
    };
    Ok(TransactionInput {
        coin: scope.coin.clone(),
        network: scope.network.clone(),
        block_height: height,
        block_time: time,
        txid: txid.to_string(),
        input_index: to_u32(index)?,
        prev_txid,
        prev_vout,
        sequence: to_u32(input.sequence)?,
        is_coinbase: input.is_coinbase(),
        value: 0,
        script_sig_hex,
        script_sig_asm,
        witness: input.witness.clone(),
        addresses: Vec::new(),
    })
}

/// Header, transactions and outputs for the history path.
pub fn history_block(scope: &ChainScope, block: &RpcBlock) -> Result<HistoryBlock, IngestError> {
    let header = block_header(scope, block)?;
    let (height, time) = (header.height, header.timestamp);

    let mut transactions = Vec::with_capacity(block.tx.len());
    let mut outputs = Vec::new();
    for tx in &block.tx {
        transactions.push(transaction_row(scope, height, time, tx)?);
        for out in &tx.vout {
            outputs.push(output_row(scope, height, time, &tx.txid, out)?);
        }
    }

    Ok(HistoryBlock {
        block: header,
        transactions,
        outputs,
    })
}

/// Header plus unresolved inputs, with each transaction's own outputs for
/// in-block spends.
pub fn backfill_block(scope: &ChainScope, block: &RpcBlock) -> Result<BackfillBlock, IngestError> {
    let header = block_header(scope, block)?;
    let (height, time) = (header.height, header.timestamp);

    let mut transactions = Vec::with_capacity(block.tx.len());
    for tx in &block.tx {
        let inputs = tx
            .vin
            .iter()
            .enumerate()
            .map(|(i, input)| input_row(scope, height, time, &tx.txid, i, input))
            .collect::<Result<Vec<_>, _>>()?;
        let outputs = tx
            .vout
            .iter()
            .map(|out| {
                output_row(scope, height, time, &tx.txid, out)
                    .map(|o| TransactionOutputLookup::from(&o))
            })
            .collect::<Result<Vec<_>, _>>()?;
        transactions.push(BackfillTransaction {
            txid: tx.txid.clone(),
            inputs,
            outputs,
        });
    }

    Ok(BackfillBlock {
        block: header,
        transactions,
    })
}
