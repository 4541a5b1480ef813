//! EIP-1967 proxy resolution.
//!
//! Upgradeable contracts keep the address of their logic implementation
//! at the standardized storage slot
//! `keccak256("eip1967.proxy.implementation") - 1`. Before decompiling
//! an address we read that slot: if it holds a nonzero value whose
//! low-20-byte address carries code, the implementation's code is
//! analyzed instead of the thin proxy shim.

use crate::error::AnalysisError;
use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use lazy_static::lazy_static;

lazy_static! {
    /// The EIP-1967 implementation slot, computed once at first use.
    pub static ref EIP1967_IMPLEMENTATION_SLOT: B256 = {
        let hash = keccak256("eip1967.proxy.implementation".as_bytes());
        let slot = U256::from_be_bytes(hash.0) - U256::from(1);
        B256::from(slot.to_be_bytes::<32>())
    };
}

/// Chain reads the resolver needs. The firewall's sandbox client
/// implements this against the forked node; tests use an in-memory map.
#[allow(async_fn_in_trait)]
pub trait ChainReader {
    async fn get_storage_at(&self, address: Address, slot: B256) -> Result<B256, AnalysisError>;
    async fn get_code(&self, address: Address) -> Result<Bytes, AnalysisError>;
}

/// Follows EIP-1967 indirection if present.
///
/// Returns `Some((implementation, code))` when the slot is nonzero and
/// the implementation address has non-empty code; `None` otherwise.
pub async fn resolve_implementation<R: ChainReader>(
    reader: &R,
    address: Address,
) -> Result<Option<(Address, Bytes)>, AnalysisError> {
    let word = reader
        .get_storage_at(address, *EIP1967_IMPLEMENTATION_SLOT)
        .await?;
    if word == B256::ZERO {
        return Ok(None);
    }

    let implementation = Address::from_slice(&word.0[12..]);
    let code = reader.get_code(implementation).await?;
    if code.is_empty() {
        return Ok(None);
    }
    Ok(Some((implementation, code)))
}

/// Resolves the code to analyze for an address: the EIP-1967
/// implementation's code when the address is a proxy, its own otherwise.
pub async fn resolve_contract_code<R: ChainReader>(
    reader: &R,
    address: Address,
) -> Result<(Address, Bytes), AnalysisError> {
    if let Some((implementation, code)) = resolve_implementation(reader, address).await? {
        return Ok((implementation, code));
    }
    let code = reader.get_code(address).await?;
    Ok((address, code))
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct MapReader {
        storage: HashMap<(Address, B256), B256>,
        code: HashMap<Address, Bytes>,
    }

    impl ChainReader for MapReader {
        async fn get_storage_at(
            &self,
            address: Address,
            slot: B256,
        ) -> Result<B256, AnalysisError> {
            Ok(self
                .storage
                .get(&(address, slot))
                .copied()
                .unwrap_or(B256::ZERO))
        }

        async fn get_code(&self, address: Address) -> Result<Bytes, AnalysisError> {
            Ok(self.code.get(&address).cloned().unwrap_or_default())
        }
    }

    fn addr(n: u8) -> Address {
        Address::repeat_byte(n)
    }

    fn slot_word(address: Address) -> B256 {
        let mut word = [0u8; 32];
        word[12..].copy_from_slice(address.as_slice());
        B256::from(word)
    }

    #[test]
    fn implementation_slot_matches_the_standard() {
        assert_eq!(
            format!("{:#x}", *EIP1967_IMPLEMENTATION_SLOT),
            "0x360894a13ba1a3210667c828492db98dca3e2076cc3735a920a3ca505d382bbc"
        );
    }

    #[tokio::test]
    async fn zero_slot_falls_back_to_own_code() {
        let proxy = addr(0x11);
        let reader = MapReader {
            storage: HashMap::new(),
            code: HashMap::from([(proxy, Bytes::from(vec![0x60, 0x80]))]),
        };
        let (resolved, code) = resolve_contract_code(&reader, proxy).await.unwrap();
        assert_eq!(resolved, proxy);
        assert_eq!(code, Bytes::from(vec![0x60, 0x80]));
    }

    #[tokio::test]
    async fn nonzero_slot_with_code_resolves_to_implementation() {
        let proxy = addr(0x11);
        let implementation = addr(0x22);
        let reader = MapReader {
            storage: HashMap::from([(
                (proxy, *EIP1967_IMPLEMENTATION_SLOT),
                slot_word(implementation),
            )]),
            code: HashMap::from([
                (proxy, Bytes::from(vec![0xfe])),
                (implementation, Bytes::from(vec![0x60, 0x01])),
            ]),
        };
        let (resolved, code) = resolve_contract_code(&reader, proxy).await.unwrap();
        assert_eq!(resolved, implementation);
        assert_eq!(code, Bytes::from(vec![0x60, 0x01]));
    }

    #[tokio::test]
    async fn nonzero_slot_without_code_falls_back() {
        let proxy = addr(0x11);
        let dangling = addr(0x33);
        let reader = MapReader {
            storage: HashMap::from([(
                (proxy, *EIP1967_IMPLEMENTATION_SLOT),
                slot_word(dangling),
            )]),
            code: HashMap::from([(proxy, Bytes::from(vec![0xfe]))]),
        };
        let (resolved, code) = resolve_contract_code(&reader, proxy).await.unwrap();
        assert_eq!(resolved, proxy);
        assert_eq!(code, Bytes::from(vec![0xfe]));
    }
}
