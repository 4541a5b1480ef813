//! Pending-transaction ledger — users, watched addresses, and the
//! confirm/reject state machine.
//!
//! Everything lives behind one mutex so submission dedup, watcher
//! lookup, and status transitions are each a single atomic step. Rows
//! are keyed three ways: by numeric id, by raw payload (for dedup of
//! re-submissions), and by simulated hash (for receipt queries).

use crate::error::WardenError;
use crate::sandbox::SandboxTransaction;
use alloy_primitives::{Address, B256, Bytes};
use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::info;
use warden_analyzer::trace::InstructionTrace;

/// Lifecycle of an intercepted transaction. `Pending` is the only
/// non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[display("pending")]
    Pending,
    #[display("confirmed")]
    Confirmed,
    #[display("rejected")]
    Rejected,
}

/// A registered user of the approval bot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: u64,
    pub telegram_id: i64,
    pub chat_id: i64,
    pub created_at: DateTime<Utc>,
}

/// One intercepted transaction awaiting (or past) a decision.
#[derive(Debug, Clone, Serialize)]
pub struct PendingTransaction {
    pub id: u64,
    pub status: Status,
    /// Raw signed payload, relayed verbatim to the upstream on confirm.
    pub raw_data: Bytes,
    /// Hash the sandbox assigned during simulation. The real network
    /// assigns the same hash once the payload is relayed.
    pub transaction_hash: B256,
    pub sender: Address,
    /// Telegram id of the user watching the sender address.
    pub watcher: i64,
    /// The submission envelope exactly as the wallet sent it.
    pub original_request: serde_json::Value,
    pub details: SandboxTransaction,
    pub logs: serde_json::Value,
    /// Instruction trace captured during simulation, kept for on-demand
    /// static analysis. Not serialized; the admin surface exposes the
    /// derived report instead.
    #[serde(skip_serializing)]
    pub trace: InstructionTrace,
    pub created_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
}

/// Outcome of [`Ledger::create_or_get`].
pub enum Admission {
    /// First sighting, a new row was created and needs a notification.
    Created(PendingTransaction),
    /// Same raw payload seen before, the existing row prevails.
    Existing(PendingTransaction),
}

#[derive(Default)]
struct LedgerInner {
    users: HashMap<i64, User>,
    /// address -> telegram id of the single user watching it.
    watchers: HashMap<Address, i64>,
    transactions: HashMap<u64, PendingTransaction>,
    by_raw: HashMap<Bytes, u64>,
    by_hash: HashMap<B256, u64>,
    next_user_id: u64,
    next_tx_id: u64,
}

#[derive(Default)]
pub struct Ledger {
    inner: Mutex<LedgerInner>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LedgerInner> {
        // Writers have no panic points between the keyed-map inserts,
        // so a poisoned guard still holds consistent state.
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    // ── Users and watched addresses ──────────────────────────────

    /// Registers a user, or returns the existing record for the same
    /// telegram id.
    pub fn register_user(&self, telegram_id: i64, chat_id: i64) -> User {
        let mut inner = self.lock();
        if let Some(user) = inner.users.get(&telegram_id) {
            return user.clone();
        }
        inner.next_user_id += 1;
        let user = User {
            id: inner.next_user_id,
            telegram_id,
            chat_id,
            created_at: Utc::now(),
        };
        info!(telegram_id, user_id = user.id, "registered user");
        inner.users.insert(telegram_id, user.clone());
        user
    }

    pub fn get_user(&self, telegram_id: i64) -> Option<User> {
        self.lock().users.get(&telegram_id).cloned()
    }

    /// Starts watching `address` for `telegram_id`. Each address has at
    /// most one watcher; claiming an address someone else watches is an
    /// error, re-adding your own is a no-op.
    pub fn watch_address(&self, telegram_id: i64, address: Address) -> Result<(), WardenError> {
        let mut inner = self.lock();
        if !inner.users.contains_key(&telegram_id) {
            return Err(WardenError::Validation(format!(
                "unknown user {telegram_id}"
            )));
        }
        match inner.watchers.get(&address) {
            Some(owner) if *owner != telegram_id => Err(WardenError::Validation(format!(
                "address {address} is already watched by another user"
            ))),
            Some(_) => Ok(()),
            None => {
                info!(telegram_id, %address, "watching address");
                inner.watchers.insert(address, telegram_id);
                Ok(())
            }
        }
    }

    /// Stops watching `address`. Only the current watcher may remove it.
    pub fn unwatch_address(&self, telegram_id: i64, address: Address) -> Result<(), WardenError> {
        let mut inner = self.lock();
        match inner.watchers.get(&address) {
            Some(owner) if *owner == telegram_id => {
                inner.watchers.remove(&address);
                Ok(())
            }
            Some(_) => Err(WardenError::Validation(format!(
                "address {address} is watched by another user"
            ))),
            None => Err(WardenError::Validation(format!(
                "address {address} is not watched"
            ))),
        }
    }

    pub fn addresses_of(&self, telegram_id: i64) -> Vec<Address> {
        let inner = self.lock();
        let mut addresses: Vec<Address> = inner
            .watchers
            .iter()
            .filter(|(_, owner)| **owner == telegram_id)
            .map(|(addr, _)| *addr)
            .collect();
        addresses.sort();
        addresses
    }

    pub fn watcher_of(&self, address: Address) -> Option<i64> {
        self.lock().watchers.get(&address).copied()
    }

    // ── Transaction rows ─────────────────────────────────────────

    /// Admits a simulated transaction, deduplicating on the raw
    /// payload. Lookup and insert happen under one lock so the same
    /// payload arriving twice concurrently yields exactly one row.
    pub fn create_or_get(
        &self,
        raw_data: Bytes,
        transaction_hash: B256,
        sender: Address,
        watcher: i64,
        original_request: serde_json::Value,
        details: SandboxTransaction,
        logs: serde_json::Value,
        trace: InstructionTrace,
    ) -> Admission {
        let mut inner = self.lock();
        if let Some(id) = inner.by_raw.get(&raw_data) {
            let existing = inner.transactions[id].clone();
            return Admission::Existing(existing);
        }
        inner.next_tx_id += 1;
        let tx = PendingTransaction {
            id: inner.next_tx_id,
            status: Status::Pending,
            raw_data: raw_data.clone(),
            transaction_hash,
            sender,
            watcher,
            original_request,
            details,
            logs,
            trace,
            created_at: Utc::now(),
            decided_at: None,
        };
        info!(id = tx.id, hash = %transaction_hash, %sender, "holding transaction");
        inner.by_raw.insert(raw_data, tx.id);
        inner.by_hash.insert(transaction_hash, tx.id);
        inner.transactions.insert(tx.id, tx.clone());
        Admission::Created(tx)
    }

    /// Flips a pending transaction to `Confirmed`. The flip is the
    /// commit point: once this returns `Ok`, the decision stands even
    /// if the relay afterwards fails.
    pub fn confirm(&self, id: u64) -> Result<PendingTransaction, WardenError> {
        self.transition(id, Status::Confirmed)
    }

    pub fn reject(&self, id: u64) -> Result<PendingTransaction, WardenError> {
        self.transition(id, Status::Rejected)
    }

    fn transition(&self, id: u64, to: Status) -> Result<PendingTransaction, WardenError> {
        let mut inner = self.lock();
        let tx = inner
            .transactions
            .get_mut(&id)
            .ok_or(WardenError::UnknownTransaction(id))?;
        if tx.status != Status::Pending {
            return Err(WardenError::InvalidTransition {
                id,
                status: tx.status,
            });
        }
        tx.status = to;
        tx.decided_at = Some(Utc::now());
        info!(id, status = %to, "transaction decided");
        Ok(tx.clone())
    }

    pub fn get(&self, id: u64) -> Option<PendingTransaction> {
        self.lock().transactions.get(&id).cloned()
    }

    pub fn find_by_raw(&self, raw: &Bytes) -> Option<PendingTransaction> {
        let inner = self.lock();
        inner
            .by_raw
            .get(raw)
            .map(|id| inner.transactions[id].clone())
    }

    pub fn find_by_hash(&self, hash: B256) -> Option<PendingTransaction> {
        let inner = self.lock();
        inner
            .by_hash
            .get(&hash)
            .map(|id| inner.transactions[id].clone())
    }

    /// Pending rows whose sender is watched by `telegram_id`, oldest
    /// first.
    pub fn pending_for(&self, telegram_id: i64) -> Vec<PendingTransaction> {
        let inner = self.lock();
        let mut rows: Vec<PendingTransaction> = inner
            .transactions
            .values()
            .filter(|tx| tx.status == Status::Pending && tx.watcher == telegram_id)
            .cloned()
            .collect();
        rows.sort_by_key(|tx| tx.id);
        rows
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;

    fn details() -> SandboxTransaction {
        serde_json::from_value(serde_json::json!({
            "hash": "0x1111111111111111111111111111111111111111111111111111111111111111",
            "from": "0x00000000000000000000000000000000000000aa",
            "to": "0x00000000000000000000000000000000000000bb",
            "value": "0x3e8",
            "gas": "0x5208",
            "gasPrice": "0x3b9aca00",
            "input": "0x",
            "nonce": "0x0"
        }))
        .unwrap()
    }

    fn admit(ledger: &Ledger, raw: &[u8], hash_byte: u8) -> PendingTransaction {
        let admission = ledger.create_or_get(
            Bytes::from(raw.to_vec()),
            B256::repeat_byte(hash_byte),
            address!("00000000000000000000000000000000000000aa"),
            7,
            serde_json::json!({"method": "eth_sendRawTransaction"}),
            details(),
            serde_json::json!([]),
            InstructionTrace::default(),
        );
        match admission {
            Admission::Created(tx) => tx,
            Admission::Existing(tx) => tx,
        }
    }

    #[test]
    fn register_user_is_idempotent() {
        let ledger = Ledger::new();
        let first = ledger.register_user(42, 100);
        let second = ledger.register_user(42, 999);
        assert_eq!(first.id, second.id);
        assert_eq!(second.chat_id, 100);
    }

    #[test]
    fn one_watcher_per_address() {
        let ledger = Ledger::new();
        ledger.register_user(1, 10);
        ledger.register_user(2, 20);
        let addr = address!("00000000000000000000000000000000000000aa");

        ledger.watch_address(1, addr).unwrap();
        ledger.watch_address(1, addr).unwrap();
        assert!(ledger.watch_address(2, addr).is_err());
        assert_eq!(ledger.watcher_of(addr), Some(1));
    }

    #[test]
    fn unwatch_requires_ownership() {
        let ledger = Ledger::new();
        ledger.register_user(1, 10);
        ledger.register_user(2, 20);
        let addr = address!("00000000000000000000000000000000000000aa");
        ledger.watch_address(1, addr).unwrap();

        assert!(ledger.unwatch_address(2, addr).is_err());
        ledger.unwatch_address(1, addr).unwrap();
        assert_eq!(ledger.watcher_of(addr), None);
        assert!(ledger.unwatch_address(1, addr).is_err());
    }

    #[test]
    fn watching_requires_registration() {
        let ledger = Ledger::new();
        let addr = address!("00000000000000000000000000000000000000aa");
        assert!(ledger.watch_address(5, addr).is_err());
    }

    #[test]
    fn addresses_are_sorted_per_user() {
        let ledger = Ledger::new();
        ledger.register_user(1, 10);
        let low = address!("0000000000000000000000000000000000000001");
        let high = address!("00000000000000000000000000000000000000ff");
        ledger.watch_address(1, high).unwrap();
        ledger.watch_address(1, low).unwrap();
        assert_eq!(ledger.addresses_of(1), vec![low, high]);
    }

    #[test]
    fn duplicate_raw_payload_returns_existing_row() {
        let ledger = Ledger::new();
        let first = admit(&ledger, b"rawtx", 0x11);
        let admission = ledger.create_or_get(
            Bytes::from_static(b"rawtx"),
            B256::repeat_byte(0x22),
            first.sender,
            7,
            serde_json::json!({}),
            details(),
            serde_json::json!([]),
            InstructionTrace::default(),
        );
        match admission {
            Admission::Existing(tx) => {
                assert_eq!(tx.id, first.id);
                assert_eq!(tx.transaction_hash, first.transaction_hash);
            }
            Admission::Created(_) => panic!("duplicate payload created a second row"),
        }
    }

    #[test]
    fn confirm_is_terminal() {
        let ledger = Ledger::new();
        let tx = admit(&ledger, b"rawtx", 0x11);

        let confirmed = ledger.confirm(tx.id).unwrap();
        assert_eq!(confirmed.status, Status::Confirmed);
        assert!(confirmed.decided_at.is_some());

        assert!(matches!(
            ledger.confirm(tx.id),
            Err(WardenError::InvalidTransition { .. })
        ));
        assert!(matches!(
            ledger.reject(tx.id),
            Err(WardenError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn reject_is_terminal() {
        let ledger = Ledger::new();
        let tx = admit(&ledger, b"rawtx", 0x11);
        ledger.reject(tx.id).unwrap();
        assert!(ledger.confirm(tx.id).is_err());
        assert_eq!(ledger.get(tx.id).unwrap().status, Status::Rejected);
    }

    #[test]
    fn unknown_id_is_reported() {
        let ledger = Ledger::new();
        assert!(matches!(
            ledger.confirm(999),
            Err(WardenError::UnknownTransaction(999))
        ));
    }

    #[test]
    fn lookup_by_hash_and_raw() {
        let ledger = Ledger::new();
        let tx = admit(&ledger, b"rawtx", 0x11);
        assert_eq!(
            ledger.find_by_hash(B256::repeat_byte(0x11)).unwrap().id,
            tx.id
        );
        assert_eq!(
            ledger.find_by_raw(&Bytes::from_static(b"rawtx")).unwrap().id,
            tx.id
        );
        assert!(ledger.find_by_hash(B256::repeat_byte(0x99)).is_none());
    }

    #[test]
    fn pending_list_excludes_decided_rows() {
        let ledger = Ledger::new();
        let a = admit(&ledger, b"tx-a", 0x11);
        let b = admit(&ledger, b"tx-b", 0x22);
        let c = admit(&ledger, b"tx-c", 0x33);
        ledger.confirm(b.id).unwrap();

        let pending = ledger.pending_for(7);
        let ids: Vec<u64> = pending.iter().map(|tx| tx.id).collect();
        assert_eq!(ids, vec![a.id, c.id]);
    }

    #[test]
    fn pending_list_is_scoped_to_watcher() {
        let ledger = Ledger::new();
        admit(&ledger, b"tx-a", 0x11);
        assert!(ledger.pending_for(99).is_empty());
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_value(Status::Pending).unwrap(),
            serde_json::json!("pending")
        );
        assert_eq!(Status::Confirmed.to_string(), "confirmed");
    }
}
