//! Write-once analysis caches.
//!
//! Decompilation and pseudocode enrichment are expensive collaborator
//! calls, so both are memoized with a get-or-compute-once discipline:
//! entries are created lazily and never mutated afterwards. The map
//! lock is an async mutex held across the compute future, so the
//! boundary is invoked exactly once per key even under concurrent
//! lookups.

use crate::error::AnalysisError;
use alloy_primitives::{Address, B256};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use tokio::sync::Mutex;

/// Decompiler output for one contract, keyed by `(address, bytecode_hash)`
/// where the hash content-addresses the exact bytecode handed to the
/// decompiler.
#[derive(Debug, Clone, Serialize)]
pub struct ContractStaticAnalysis {
    pub contract_address: Address,
    pub bytecode_hash: B256,
    /// Raw decompiled text, as returned by the toolchain.
    pub raw: String,
}

/// Pseudocode rendering of one decompiled function, keyed by
/// `(address, function_name)`.
#[derive(Debug, Clone, Serialize)]
pub struct DisassembledFunction {
    pub contract_address: Address,
    pub function_name: String,
    /// The decompiler's function body.
    pub raw: String,
    /// The enriched solidity-like pseudocode.
    pub pseudocode: String,
}

#[derive(Debug, Default)]
pub struct AnalysisCache {
    contracts: Mutex<HashMap<(Address, B256), ContractStaticAnalysis>>,
    functions: Mutex<HashMap<(Address, String), DisassembledFunction>>,
}

impl AnalysisCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached decompilation for `(address, bytecode_hash)`,
    /// running `compute` exactly once on first sight of the key.
    pub async fn get_or_compute_contract<F, Fut>(
        &self,
        address: Address,
        bytecode_hash: B256,
        compute: F,
    ) -> Result<ContractStaticAnalysis, AnalysisError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String, AnalysisError>>,
    {
        let mut map = self.contracts.lock().await;
        if let Some(hit) = map.get(&(address, bytecode_hash)) {
            return Ok(hit.clone());
        }
        let raw = compute().await?;
        let entry = ContractStaticAnalysis {
            contract_address: address,
            bytecode_hash,
            raw,
        };
        map.insert((address, bytecode_hash), entry.clone());
        Ok(entry)
    }

    /// Returns the cached pseudocode for `(address, function_name)`,
    /// running `compute` exactly once on first sight of the key.
    pub async fn get_or_compute_function<F, Fut>(
        &self,
        address: Address,
        function_name: String,
        raw: &str,
        compute: F,
    ) -> Result<DisassembledFunction, AnalysisError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String, AnalysisError>>,
    {
        let mut map = self.functions.lock().await;
        if let Some(hit) = map.get(&(address, function_name.clone())) {
            return Ok(hit.clone());
        }
        let pseudocode = compute().await?;
        let entry = DisassembledFunction {
            contract_address: address,
            function_name: function_name.clone(),
            raw: raw.to_string(),
            pseudocode,
        };
        map.insert((address, function_name), entry.clone());
        Ok(entry)
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::keccak256;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn addr(n: u8) -> Address {
        Address::repeat_byte(n)
    }

    #[tokio::test]
    async fn contract_compute_runs_exactly_once_per_key() {
        let cache = AnalysisCache::new();
        let calls = AtomicUsize::new(0);
        let hash = keccak256(b"bytecode");

        for _ in 0..2 {
            let entry = cache
                .get_or_compute_contract(addr(1), hash, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok("decompiled".to_string())
                })
                .await
                .unwrap();
            assert_eq!(entry.raw, "decompiled");
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn distinct_keys_compute_separately() {
        let cache = AnalysisCache::new();
        let calls = AtomicUsize::new(0);

        for hash in [keccak256(b"a"), keccak256(b"b")] {
            cache
                .get_or_compute_contract(addr(1), hash, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(String::new())
                })
                .await
                .unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_compute_is_not_cached() {
        let cache = AnalysisCache::new();
        let calls = AtomicUsize::new(0);
        let hash = keccak256(b"flaky");

        let first = cache
            .get_or_compute_contract(addr(1), hash, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AnalysisError::Timeout)
            })
            .await;
        assert!(first.is_err());

        let second = cache
            .get_or_compute_contract(addr(1), hash, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok("recovered".to_string())
            })
            .await
            .unwrap();
        assert_eq!(second.raw, "recovered");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn function_compute_runs_exactly_once_per_key() {
        let cache = AnalysisCache::new();
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            let entry = cache
                .get_or_compute_function(addr(2), "function f() {".to_string(), "raw body", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok("pseudo".to_string())
                })
                .await
                .unwrap();
            assert_eq!(entry.pseudocode, "pseudo");
            assert_eq!(entry.raw, "raw body");
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
