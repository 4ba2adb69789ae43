//! Cells and operation attributes.

use bytes::Bytes;
use std::collections::BTreeMap;
use std::fmt::Write as _;

/// Version timestamp of a stored cell.
pub type Timestamp = u64;

/// A single stored version of one column of one row.
///
/// Cells are what the store hands to scan filters and returns to readers.
/// Multiple cells may share a row, family and qualifier; they are then
/// distinguished by their timestamp.
#[derive(Clone, PartialEq, Eq)]
pub struct Cell {
    row: Bytes,
    family: Bytes,
    qualifier: Bytes,
    timestamp: Timestamp,
    value: Bytes,
}

impl Cell {
    /// Creates a new cell.
    pub fn new(
        row: impl Into<Bytes>,
        family: impl Into<Bytes>,
        qualifier: impl Into<Bytes>,
        timestamp: Timestamp,
        value: impl Into<Bytes>,
    ) -> Self {
        Self {
            row: row.into(),
            family: family.into(),
            qualifier: qualifier.into(),
            timestamp,
            value: value.into(),
        }
    }

    /// Returns the row key.
    #[must_use]
    pub fn row(&self) -> &Bytes {
        &self.row
    }

    /// Returns the column family.
    #[must_use]
    pub fn family(&self) -> &Bytes {
        &self.family
    }

    /// Returns the column qualifier.
    #[must_use]
    pub fn qualifier(&self) -> &Bytes {
        &self.qualifier
    }

    /// Returns the version timestamp.
    #[must_use]
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Returns the stored value.
    #[must_use]
    pub fn value(&self) -> &Bytes {
        &self.value
    }

    /// Checks whether this cell belongs to the given column.
    #[must_use]
    pub fn is_column(&self, family: &[u8], qualifier: &[u8]) -> bool {
        self.family.as_ref() == family && self.qualifier.as_ref() == qualifier
    }

    /// Checks whether this cell belongs to the same column as `other`.
    #[must_use]
    pub fn same_column(&self, other: &Cell) -> bool {
        self.is_column(&other.family, &other.qualifier)
    }
}

impl std::fmt::Debug for Cell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}:{}/{}={}",
            to_string_binary(&self.row),
            to_string_binary(&self.family),
            to_string_binary(&self.qualifier),
            self.timestamp,
            to_string_binary(&self.value)
        )
    }
}

/// Named opaque byte-array attributes attached to an operation.
///
/// Attributes travel with an operation from the client layer to the point
/// where the store processes it. They are never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attributes(BTreeMap<String, Bytes>);

impl Attributes {
    /// Creates an empty attribute set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets an attribute, replacing any previous value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Bytes>) {
        self.0.insert(name.into(), value.into());
    }

    /// Returns the value of an attribute.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Bytes> {
        self.0.get(name)
    }

    /// Removes an attribute, returning its value.
    pub fn remove(&mut self, name: &str) -> Option<Bytes> {
        self.0.remove(name)
    }

    /// Checks whether an attribute is present.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Iterates over all attributes in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Bytes)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Returns the number of attributes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if no attributes are set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Renders bytes as printable text, escaping anything outside printable ASCII
/// as `\xNN`.
#[must_use]
pub fn to_string_binary(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for &b in bytes {
        if (0x20..0x7f).contains(&b) && b != b'\\' {
            out.push(b as char);
        } else {
            let _ = write!(out, "\\x{b:02X}");
        }
    }
    out
}
