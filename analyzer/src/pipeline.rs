//! The static-analysis orchestrator.
//!
//! For every contract a transaction touched: resolve proxy indirection,
//! fetch and content-hash the bytecode, decompile (cached), split the
//! output into function blocks, enrich each block into pseudocode
//! (cached), then feed the results through the narrative steps — a
//! reassembled contract rendering, a per-contract sequence diagram, and
//! one overall diagram across contracts.

use crate::cache::{AnalysisCache, DisassembledFunction};
use crate::decompiler::DecompilerClient;
use crate::error::AnalysisError;
use crate::functions::split_functions;
use crate::proxy::{resolve_contract_code, ChainReader};
use crate::textgen::TextGenClient;
use crate::trace::{extract_related_contracts, InstructionTrace};
use alloy_primitives::{keccak256, Address, B256};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info};

const PSEUDOCODE_SYSTEM_PROMPT: &str = "Answer only with solidity code, no descriptions, \
explanations, classes, or pragma directives — only the function body, without inline \
assembly, preserving the storage slot addresses in use. You are a professional smart \
contract developer and EVM bytecode reverse engineer.";

const PSEUDOCODE_TASK: &str = "Write solidity-like pseudocode for this disassembled \
function without renaming it or its arguments. CALLPRIVATE constructs denote calls to \
the function named in their first argument (usually starting with 0x): replace \
CALLPRIVATE with that name and carry over the remaining call arguments. If an emitted \
event's name is known to you, replace its hash with the name. MLOAD reads a storage \
slot — note which slot in the pseudocode.";

const ASSEMBLE_SYSTEM_PROMPT: &str = "Answer only with solidity code, no descriptions \
or explanations. You are a professional solidity developer analyzing interactions \
between smart contracts.";

const DIAGRAM_SYSTEM_PROMPT: &str = "Answer only with sequenceDiagram code, no \
descriptions or explanations. You are a professional solidity developer analyzing \
interactions between smart contracts.";

const OVERVIEW_SYSTEM_PROMPT: &str = "Answer only with sequenceDiagram code, no \
descriptions or explanations. You are a professional business analyst describing \
interactions between smart contracts based on their interaction diagrams.";

/// Everything the pipeline needs besides chain access: the write-once
/// caches and the two outbound collaborator clients.
#[derive(Debug)]
pub struct AnalysisContext {
    pub cache: AnalysisCache,
    pub decompiler: DecompilerClient,
    pub textgen: TextGenClient,
    /// Model id used for every narrative step.
    pub model: String,
}

/// Analysis of one contract the transaction interacted with.
#[derive(Debug, Clone, Serialize)]
pub struct ContractAnalysis {
    /// The address whose code was actually analyzed (the implementation
    /// when the target was an EIP-1967 proxy).
    pub resolved_address: Address,
    pub bytecode_hash: B256,
    pub functions: Vec<DisassembledFunction>,
}

/// The pipeline's output for one transaction.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    /// Overall cross-contract sequence diagram.
    pub narrative: String,
    /// Per-contract sequence diagrams, keyed by the traced address.
    pub diagrams: BTreeMap<Address, String>,
    pub contracts: BTreeMap<Address, ContractAnalysis>,
}

/// Runs the full pipeline over a stored instruction trace.
pub async fn analyze<R: ChainReader>(
    trace: &InstructionTrace,
    reader: &R,
    ctx: &AnalysisContext,
) -> Result<AnalysisReport, AnalysisError> {
    let related = extract_related_contracts(trace);
    info!(contracts = related.len(), "analyzing traced contracts");

    let mut contracts = BTreeMap::new();
    let mut diagrams = BTreeMap::new();

    for address in related {
        let (resolved_address, code) = resolve_contract_code(reader, address).await?;
        if code.is_empty() {
            // plain value transfer target, nothing to decompile
            debug!(%address, "skipping address without code");
            continue;
        }

        let bytecode_hex = hex::encode(&code);
        let bytecode_hash = keccak256(&code);

        let analysis = ctx
            .cache
            .get_or_compute_contract(address, bytecode_hash, || async {
                ctx.decompiler.decompile(address, &bytecode_hex).await
            })
            .await?;

        let mut functions = Vec::new();
        let mut combined = String::new();
        for block in split_functions(&analysis.raw) {
            let function = ctx
                .cache
                .get_or_compute_function(address, block.name.clone(), &block.body, || async {
                    ctx.textgen
                        .generate(
                            PSEUDOCODE_SYSTEM_PROMPT,
                            &format!("{PSEUDOCODE_TASK}\n{}", block.body),
                            &ctx.model,
                        )
                        .await
                })
                .await?;
            combined.push_str(&function.pseudocode);
            combined.push('\n');
            functions.push(function);
        }

        let assembled = ctx
            .textgen
            .generate(
                ASSEMBLE_SYSTEM_PROMPT,
                &format!(
                    "Assemble these solidity fragments into a single smart contract.\n\
                     Fragments: ```{combined}```."
                ),
                &ctx.model,
            )
            .await?;

        let diagram = ctx
            .textgen
            .generate(
                DIAGRAM_SYSTEM_PROMPT,
                &format!(
                    "Draw the sequenceDiagram of a user's interaction with this \
                     contract based on its solidity code.\nContract: ```\n{assembled}\n```."
                ),
                &ctx.model,
            )
            .await?;

        diagrams.insert(address, diagram);
        contracts.insert(
            address,
            ContractAnalysis {
                resolved_address,
                bytecode_hash,
                functions,
            },
        );
    }

    let narrative = ctx
        .textgen
        .generate(
            OVERVIEW_SYSTEM_PROMPT,
            &overview_prompt(&diagrams, trace),
            &ctx.model,
        )
        .await?;

    Ok(AnalysisReport {
        narrative,
        diagrams,
        contracts,
    })
}

fn overview_prompt(diagrams: &BTreeMap<Address, String>, trace: &InstructionTrace) -> String {
    let mut prompt = String::from(
        "Draw one overall sequenceDiagram of the user's interaction across these \
         smart contracts for the submitted transaction.\n",
    );
    for (address, diagram) in diagrams {
        prompt.push_str(&format!(
            "Diagram for contract {address:#x}: ```\n{diagram}\n```\n"
        ));
    }
    let ops: Vec<&str> = trace
        .struct_logs
        .iter()
        .map(|step| step.op.as_str())
        .collect();
    prompt.push_str(&format!(
        "Instruction sequence of the transaction: ```\n{}\n```\n",
        ops.join(" ")
    ));
    prompt
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::StructLog;

    #[test]
    fn overview_prompt_names_every_contract() {
        let mut diagrams = BTreeMap::new();
        diagrams.insert(Address::repeat_byte(0x01), "sequenceDiagram A".to_string());
        diagrams.insert(Address::repeat_byte(0x02), "sequenceDiagram B".to_string());
        let trace = InstructionTrace {
            struct_logs: vec![
                StructLog {
                    op: "PUSH1".into(),
                    stack: vec![],
                },
                StructLog {
                    op: "CALL".into(),
                    stack: vec![],
                },
            ],
        };

        let prompt = overview_prompt(&diagrams, &trace);
        assert!(prompt.contains(&format!("{:#x}", Address::repeat_byte(0x01))));
        assert!(prompt.contains(&format!("{:#x}", Address::repeat_byte(0x02))));
        assert!(prompt.contains("PUSH1 CALL"));
    }

    #[test]
    fn report_serializes_with_string_keys() {
        let mut diagrams = BTreeMap::new();
        diagrams.insert(Address::repeat_byte(0x01), "d".to_string());
        let report = AnalysisReport {
            narrative: "n".into(),
            diagrams,
            contracts: BTreeMap::new(),
        };
        let json = serde_json::to_value(&report).unwrap();
        assert!(json["diagrams"].is_object());
        assert_eq!(json["narrative"], "n");
    }
}
