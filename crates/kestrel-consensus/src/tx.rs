use std::collections::HashSet;

use kestrel_crypto::sha256d;

use crate::encode::tx_bytes;
use crate::error::{ConsensusError, ErrorCode};
use crate::{
    COINBASE_PREVOUT_INDEX, LOCKTIME_THRESHOLD, MAX_COINBASE_SCRIPT, MAX_MONEY,
    MIN_COINBASE_SCRIPT, SEQUENCE_FINAL,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutPoint {
    pub tx_hash: [u8; 32],
    pub index: u32,
}

impl OutPoint {
    pub fn is_null(&self) -> bool {
        self.tx_hash == [0u8; 32] && self.index == COINBASE_PREVOUT_INDEX
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxInput {
    pub prev_out: OutPoint,
    pub script: Vec<u8>,
    pub sequence: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxOutput {
    pub value: u64,
    pub script: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tx {
    pub version: u32,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub lock_time: u32,
}

/// Double SHA-256 over the serialized transaction.
pub fn tx_hash(tx: &Tx) -> [u8; 32] {
    sha256d(&tx_bytes(tx))
}

/// A transaction is coinbase when its single input spends the null outpoint.
pub fn is_coinbase(tx: &Tx) -> bool {
    tx.inputs.len() == 1 && tx.inputs[0].prev_out.is_null()
}

/// Lock-time rule: a transaction is final when its lock time has passed for
/// the block being built, or when every input opted out with a final
/// sequence number.
pub fn is_final(tx: &Tx, block_time: u32, block_height: u32) -> bool {
    if tx.lock_time == 0 {
        return true;
    }
    let limit = if tx.lock_time < LOCKTIME_THRESHOLD {
        block_height
    } else {
        block_time
    };
    if tx.lock_time < limit {
        return true;
    }
    tx.inputs.iter().all(|i| i.sequence == SEQUENCE_FINAL)
}

/// Outcome of the structural transaction checks: the summed output value and
/// the previous outputs this transaction spends (empty for coinbase).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxSummary {
    pub output_value: u64,
    pub spent: Vec<OutPoint>,
}

/// Context-free transaction checks: non-empty input and output lists, money
/// range on every value and on the sum, coinbase script-length bounds, no
/// null or duplicated previous output for non-coinbase transactions.
pub fn validate_basic(tx: &Tx, coinbase: bool) -> Result<TxSummary, ConsensusError> {
    if tx.inputs.is_empty() {
        return Err(ConsensusError::new(ErrorCode::Parse, "tx has no inputs"));
    }
    if tx.outputs.is_empty() {
        return Err(ConsensusError::new(ErrorCode::Parse, "tx has no outputs"));
    }
    let mut output_value = 0u64;
    for out in &tx.outputs {
        if out.value > MAX_MONEY {
            return Err(ConsensusError::new(ErrorCode::Value, "output above money range"));
        }
        output_value = output_value
            .checked_add(out.value)
            .ok_or_else(|| ConsensusError::new(ErrorCode::Value, "output sum overflow"))?;
        if output_value > MAX_MONEY {
            return Err(ConsensusError::new(ErrorCode::Value, "output sum above money range"));
        }
    }
    if coinbase {
        if !is_coinbase(tx) {
            return Err(ConsensusError::new(ErrorCode::Coinbase, "expected coinbase"));
        }
        let script_len = tx.inputs[0].script.len();
        if script_len < MIN_COINBASE_SCRIPT || script_len > MAX_COINBASE_SCRIPT {
            return Err(ConsensusError::new(
                ErrorCode::Coinbase,
                "coinbase script length out of range",
            ));
        }
        return Ok(TxSummary {
            output_value,
            spent: Vec::new(),
        });
    }
    if is_coinbase(tx) {
        return Err(ConsensusError::new(ErrorCode::Coinbase, "unexpected coinbase"));
    }
    let mut seen: HashSet<OutPoint> = HashSet::with_capacity(tx.inputs.len());
    let mut spent = Vec::with_capacity(tx.inputs.len());
    for input in &tx.inputs {
        if input.prev_out.is_null() {
            return Err(ConsensusError::new(ErrorCode::PrevOut, "null previous output"));
        }
        if !seen.insert(input.prev_out) {
            return Err(ConsensusError::new(
                ErrorCode::PrevOut,
                "previous output spent twice in one tx",
            ));
        }
        spent.push(input.prev_out);
    }
    Ok(TxSummary {
        output_value,
        spent,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coinbase_tx(script_len: usize, value: u64) -> Tx {
        Tx {
            version: 1,
            inputs: vec![TxInput {
                prev_out: OutPoint {
                    tx_hash: [0u8; 32],
                    index: COINBASE_PREVOUT_INDEX,
                },
                script: vec![0u8; script_len],
                sequence: SEQUENCE_FINAL,
            }],
            outputs: vec![TxOutput {
                value,
                script: vec![0x51],
            }],
            lock_time: 0,
        }
    }

    fn spend_tx(prev: OutPoint) -> Tx {
        Tx {
            version: 1,
            inputs: vec![TxInput {
                prev_out: prev,
                script: Vec::new(),
                sequence: SEQUENCE_FINAL,
            }],
            outputs: vec![TxOutput {
                value: 1,
                script: vec![0x51],
            }],
            lock_time: 0,
        }
    }

    #[test]
    fn coinbase_script_length_bounds() {
        assert!(validate_basic(&coinbase_tx(2, 50), true).is_ok());
        assert!(validate_basic(&coinbase_tx(100, 50), true).is_ok());
        assert_eq!(
            validate_basic(&coinbase_tx(1, 50), true).unwrap_err().code,
            ErrorCode::Coinbase
        );
        assert_eq!(
            validate_basic(&coinbase_tx(101, 50), true).unwrap_err().code,
            ErrorCode::Coinbase
        );
    }

    #[test]
    fn rejects_value_above_money_range() {
        let err = validate_basic(&coinbase_tx(2, MAX_MONEY + 1), true).unwrap_err();
        assert_eq!(err.code, ErrorCode::Value);
    }

    #[test]
    fn rejects_duplicate_prevout_within_tx() {
        let prev = OutPoint {
            tx_hash: [7u8; 32],
            index: 0,
        };
        let mut tx = spend_tx(prev);
        tx.inputs.push(tx.inputs[0].clone());
        let err = validate_basic(&tx, false).unwrap_err();
        assert_eq!(err.code, ErrorCode::PrevOut);
    }

    #[test]
    fn rejects_null_prevout_outside_coinbase() {
        let tx = spend_tx(OutPoint {
            tx_hash: [0u8; 32],
            index: COINBASE_PREVOUT_INDEX,
        });
        // A single null-prevout input is the coinbase shape, reported as such.
        let err = validate_basic(&tx, false).unwrap_err();
        assert_eq!(err.code, ErrorCode::Coinbase);
    }

    #[test]
    fn finality_rules() {
        let mut tx = spend_tx(OutPoint {
            tx_hash: [1u8; 32],
            index: 0,
        });
        assert!(is_final(&tx, 0, 0));
        tx.lock_time = 100;
        tx.inputs[0].sequence = 0;
        assert!(is_final(&tx, 0, 101));
        assert!(!is_final(&tx, 0, 100));
        tx.inputs[0].sequence = SEQUENCE_FINAL;
        assert!(is_final(&tx, 0, 100));
        tx.lock_time = LOCKTIME_THRESHOLD + 5;
        tx.inputs[0].sequence = 0;
        assert!(is_final(&tx, LOCKTIME_THRESHOLD + 6, 0));
        assert!(!is_final(&tx, LOCKTIME_THRESHOLD + 5, 0));
    }
}
