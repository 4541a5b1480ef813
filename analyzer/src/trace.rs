//! Call-graph extraction from instruction-level execution traces.
//!
//! A `debug_traceTransaction` struct log already reflects the real
//! machine's stack contents at every step, so no opcode interpreter is
//! needed: for each call-family instruction the callee address sits at
//! the second-from-top stack slot, zero-padded to 32 bytes. Targets that
//! a contract computes in memory rather than leaving at that slot are
//! not recovered; that gap is accepted in exchange for not carrying a
//! symbolic stack tracker.

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Instructions that transfer control to another contract's code.
const CALL_FAMILY: &[&str] = &["CALL", "DELEGATECALL", "STATICCALL"];

/// An instruction-level execution trace as returned by
/// `debug_traceTransaction`. Fields we do not consume are dropped at
/// deserialization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstructionTrace {
    #[serde(default)]
    pub struct_logs: Vec<StructLog>,
}

/// One executed instruction. The stack is ordered bottom-to-top, each
/// entry a hex-encoded 256-bit word (geth emits them unprefixed,
/// hardhat sometimes with a `0x` prefix; both are accepted).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StructLog {
    pub op: String,
    #[serde(default)]
    pub stack: Vec<String>,
}

impl InstructionTrace {
    pub fn is_empty(&self) -> bool {
        self.struct_logs.is_empty()
    }
}

/// Walks the ordered instruction log and collects every contract address
/// invoked via a call-family instruction.
///
/// The result is a sorted set: downstream consumers do not care about
/// order, but tests and cache keys do care about determinism.
pub fn extract_related_contracts(trace: &InstructionTrace) -> BTreeSet<Address> {
    let mut related = BTreeSet::new();

    for step in &trace.struct_logs {
        if !CALL_FAMILY.contains(&step.op.as_str()) {
            continue;
        }
        // Per the EVM calling convention the callee address is the second
        // stack argument: stack[-2] with the top at the end.
        if step.stack.len() < 2 {
            continue;
        }
        let word = &step.stack[step.stack.len() - 2];
        if let Some(address) = address_from_stack_word(word) {
            related.insert(address);
        }
    }

    related
}

/// Interprets a hex stack word as a zero-padded address: parse the full
/// 256-bit value and keep the low 20 bytes.
fn address_from_stack_word(word: &str) -> Option<Address> {
    let digits = word.trim_start_matches("0x");
    let value = U256::from_str_radix(digits, 16).ok()?;
    let bytes = value.to_be_bytes::<32>();
    Some(Address::from_slice(&bytes[12..]))
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn step(op: &str, stack: &[&str]) -> StructLog {
        StructLog {
            op: op.to_string(),
            stack: stack.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn trace(steps: Vec<StructLog>) -> InstructionTrace {
        InstructionTrace { struct_logs: steps }
    }

    const AAAA: &str = "000000000000000000000000000000000000000000000000000000000000aaaa";
    const BBBB: &str = "000000000000000000000000000000000000000000000000000000000000bbbb";

    #[test]
    fn extracts_call_and_staticcall_targets() {
        // stack is bottom-to-top: the callee sits second-to-last, gas on top
        let t = trace(vec![
            step("PUSH2", &["00"]),
            step("CALL", &["00", AAAA, "ffff"]),
            step("PUSH2", &["00"]),
            step("STATICCALL", &["00", BBBB, "ffff"]),
        ]);
        let related = extract_related_contracts(&t);
        let expected: Vec<Address> = vec![
            "0x000000000000000000000000000000000000aaaa".parse().unwrap(),
            "0x000000000000000000000000000000000000bbbb".parse().unwrap(),
        ];
        assert_eq!(related.into_iter().collect::<Vec<_>>(), expected);
    }

    #[test]
    fn delegatecall_target_is_extracted() {
        let t = trace(vec![step("DELEGATECALL", &[AAAA, "ffff"])]);
        let related = extract_related_contracts(&t);
        let expected: Address = "0x000000000000000000000000000000000000aaaa".parse().unwrap();
        assert_eq!(related.into_iter().next(), Some(expected));
    }

    #[test]
    fn non_call_opcodes_are_ignored() {
        let t = trace(vec![
            step("SLOAD", &[AAAA, BBBB]),
            step("JUMPI", &[AAAA, BBBB]),
            step("CALLCODE", &[AAAA, "ffff"]),
        ]);
        assert!(extract_related_contracts(&t).is_empty());
    }

    #[test]
    fn duplicate_targets_collapse() {
        let t = trace(vec![
            step("CALL", &[AAAA, "ffff"]),
            step("CALL", &[AAAA, "ffff"]),
        ]);
        assert_eq!(extract_related_contracts(&t).len(), 1);
    }

    #[test]
    fn short_stack_is_skipped() {
        let t = trace(vec![step("CALL", &[AAAA]), step("CALL", &[])]);
        assert!(extract_related_contracts(&t).is_empty());
    }

    #[test]
    fn prefixed_stack_words_are_accepted() {
        let t = trace(vec![step("CALL", &["0xaaaa", "0xffff"])]);
        let related = extract_related_contracts(&t);
        let expected: Address = "0x000000000000000000000000000000000000aaaa".parse().unwrap();
        assert_eq!(related.into_iter().next(), Some(expected));
    }

    #[test]
    fn output_is_sorted() {
        let t = trace(vec![
            step("CALL", &[BBBB, "ffff"]),
            step("CALL", &[AAAA, "ffff"]),
        ]);
        let related: Vec<Address> = extract_related_contracts(&t).into_iter().collect();
        assert_eq!(related.len(), 2);
        assert!(related[0] < related[1]);
    }

    #[test]
    fn deserializes_geth_style_trace() {
        let raw = serde_json::json!({
            "gas": 21000,
            "failed": false,
            "returnValue": "",
            "structLogs": [
                {"pc": 0, "op": "PUSH1", "gas": 100, "gasCost": 3, "depth": 1, "stack": []},
                {"pc": 2, "op": "CALL", "gas": 97, "gasCost": 40, "depth": 1,
                 "stack": ["00", "00", "00", "00", "00", AAAA, "ffff"]}
            ]
        });
        let t: InstructionTrace = serde_json::from_value(raw).unwrap();
        assert_eq!(t.struct_logs.len(), 2);
        // callee is second-from-top, i.e. second-to-last entry
        assert_eq!(extract_related_contracts(&t).len(), 1);
    }
}
