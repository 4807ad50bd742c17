//! The reversible mutation log.
//!
//! Every mutation of account state appends exactly one [`JournalEntry`]
//! *before* the mutation is applied, capturing whatever previous value is
//! needed to undo it. A snapshot is just the journal's current length;
//! reverting replays entries from the end back down to the snapshot in
//! strict LIFO order and truncates.
//!
//! The journal is an explicit sum type plus an append-only vector — no
//! captured closures, no back-pointers — so the revert path is data, not
//! control flow.

use crate::{dec::Dec, state::StateObject};
use alloy::primitives::{Address, B256};

/// One reversible change record.
#[derive(Debug, Clone)]
pub enum JournalEntry {
    /// A state object was materialized for an address with no live object.
    CreateObject {
        /// The address of the created object.
        address: Address,
    },
    /// A live state object was replaced by a fresh one; `prev` is the
    /// replaced object.
    ResetObject {
        /// The replaced object.
        prev: Box<StateObject>,
    },
    /// An account was marked suicided and its balance zeroed.
    Suicide {
        /// The affected address.
        address: Address,
        /// Previous suicided flag.
        prev: bool,
        /// Previous balance.
        prev_balance: Dec,
    },
    /// A balance change.
    Balance {
        /// The affected address.
        address: Address,
        /// Previous balance.
        prev: Dec,
    },
    /// A nonce change.
    Nonce {
        /// The affected address.
        address: Address,
        /// Previous nonce.
        prev: u64,
    },
    /// A storage slot write. `key` is the hashed composite slot key.
    Storage {
        /// The affected address.
        address: Address,
        /// The hashed slot key.
        key: B256,
        /// Previous slot value.
        prev: B256,
    },
    /// A code change.
    Code {
        /// The affected address.
        address: Address,
        /// Previous code hash.
        prev_hash: B256,
        /// Previous code, if it was loaded.
        prev_code: Option<Vec<u8>>,
    },
    /// An empty account was touched by a zero-value transfer.
    Touch {
        /// The touched address.
        address: Address,
    },
    /// The refund counter changed.
    Refund {
        /// Previous refund counter.
        prev: u64,
    },
    /// A log was appended for a transaction.
    Log {
        /// The emitting transaction's hash.
        tx_hash: B256,
    },
}

impl JournalEntry {
    /// The address this entry dirties, if any.
    pub fn address(&self) -> Option<Address> {
        match self {
            Self::CreateObject { address }
            | Self::Suicide { address, .. }
            | Self::Balance { address, .. }
            | Self::Nonce { address, .. }
            | Self::Storage { address, .. }
            | Self::Code { address, .. }
            | Self::Touch { address } => Some(*address),
            Self::ResetObject { prev } => Some(prev.address()),
            Self::Refund { .. } | Self::Log { .. } => None,
        }
    }
}

/// The ordered, append-only change log of one [`CommitStateDB`] instance.
///
/// [`CommitStateDB`]: crate::state::CommitStateDB
#[derive(Debug, Default)]
pub struct Journal {
    entries: Vec<JournalEntry>,
}

impl Journal {
    /// An empty journal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a change record.
    pub fn append(&mut self, entry: JournalEntry) {
        self.entries.push(entry);
    }

    /// Remove and return the most recent record.
    pub(crate) fn pop(&mut self) -> Option<JournalEntry> {
        self.entries.pop()
    }

    /// Number of recorded entries. Doubles as the snapshot identifier.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no entries are recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop all entries.
    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    /// The addresses with outstanding entries, deduplicated, in first-touch
    /// order.
    ///
    /// Rebuilt from the recorded entries on every call, so the result is
    /// always consistent with the journal's current contents.
    pub fn dirty_addresses(&self) -> Vec<Address> {
        let mut seen = std::collections::HashSet::new();
        let mut dirty = Vec::new();
        for entry in &self.entries {
            if let Some(address) = entry.address() {
                if seen.insert(address) {
                    dirty.push(address);
                }
            }
        }
        dirty
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn dirty_addresses_dedupe_in_first_touch_order() {
        let a = Address::repeat_byte(1);
        let b = Address::repeat_byte(2);

        let mut journal = Journal::new();
        journal.append(JournalEntry::Nonce { address: b, prev: 0 });
        journal.append(JournalEntry::Balance { address: a, prev: Dec::ZERO });
        journal.append(JournalEntry::Touch { address: b });
        journal.append(JournalEntry::Refund { prev: 0 });

        assert_eq!(journal.dirty_addresses(), vec![b, a]);
    }

    #[test]
    fn dirty_tracking_follows_truncation() {
        let a = Address::repeat_byte(1);

        let mut journal = Journal::new();
        journal.append(JournalEntry::Balance { address: a, prev: Dec::ZERO });
        assert_eq!(journal.dirty_addresses(), vec![a]);

        journal.pop();
        assert!(journal.dirty_addresses().is_empty());
    }
}
