//! Core type definitions for sitx.

use crate::error::CoreError;
use std::fmt;
use std::str::FromStr;

/// Suffix marking a lightweight, independent read-only child id.
pub const INDEPENDENT_READ_ONLY_SUFFIX: &str = ".IRO";

/// Identifier of a transaction.
///
/// The numeric id is a timestamp issued by the timestamp source, so ids are
/// totally ordered, never reused, and double as the transaction's begin
/// timestamp. A lightweight child shares its parent's numeric id and is
/// flagged as independent read-only; lifecycle calls on it are no-ops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactionId {
    id: u64,
    independent_read_only: bool,
}

impl TransactionId {
    /// Creates the id of a transaction with its own record.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self {
            id,
            independent_read_only: false,
        }
    }

    /// Creates the id of a lightweight child of `parent`.
    #[must_use]
    pub const fn lightweight(parent: u64) -> Self {
        Self {
            id: parent,
            independent_read_only: true,
        }
    }

    /// Returns the raw id value.
    #[must_use]
    pub const fn id(self) -> u64 {
        self.id
    }

    /// Returns true for lightweight, independent read-only children.
    #[must_use]
    pub const fn is_independent_read_only(self) -> bool {
        self.independent_read_only
    }

    /// Returns the transaction table row key for this id.
    #[must_use]
    pub const fn row_key(self) -> [u8; 8] {
        self.id.to_be_bytes()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.independent_read_only {
            write!(f, "{}{INDEPENDENT_READ_ONLY_SUFFIX}", self.id)
        } else {
            write!(f, "{}", self.id)
        }
    }
}

impl FromStr for TransactionId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CoreError::InvalidTransactionId { input: s.to_owned() };
        let (digits, independent_read_only) = match s.strip_suffix(INDEPENDENT_READ_ONLY_SUFFIX) {
            Some(digits) => (digits, true),
            None => (s, false),
        };
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let id = digits.parse::<u64>().map_err(|_| invalid())?;
        Ok(Self {
            id,
            independent_read_only,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn transaction_id_ordering() {
        let t1 = TransactionId::new(1);
        let t2 = TransactionId::new(2);
        assert!(t1 < t2);
    }

    #[test]
    fn lightweight_shares_parent_id() {
        let child = TransactionId::lightweight(42);
        assert_eq!(child.id(), 42);
        assert!(child.is_independent_read_only());
        assert_ne!(child, TransactionId::new(42));
    }

    #[test]
    fn display_format() {
        assert_eq!(TransactionId::new(42).to_string(), "42");
        assert_eq!(TransactionId::lightweight(42).to_string(), "42.IRO");
    }

    #[test]
    fn parse_rejects_garbage() {
        for input in ["", ".IRO", "abc", "-1", "+1", "1.2", "99999999999999999999"] {
            assert!(
                input.parse::<TransactionId>().is_err(),
                "accepted {input:?}"
            );
        }
    }

    #[test]
    fn row_key_sorts_like_id() {
        assert!(TransactionId::new(255).row_key() < TransactionId::new(256).row_key());
    }

    proptest! {
        #[test]
        fn string_round_trip(id in any::<u64>(), iro in any::<bool>()) {
            let txn = if iro { TransactionId::lightweight(id) } else { TransactionId::new(id) };
            let parsed: TransactionId = txn.to_string().parse().unwrap();
            prop_assert_eq!(parsed, txn);
        }
    }
}
