//! Get, put and scan operations.
//!
//! Operations are plain values built by a client and handed to a
//! [`RowStore`](crate::RowStore). Each carries an [`Attributes`] map so that
//! layers above the store can tag it (for example to request snapshot
//! isolation treatment) before it is submitted.

use crate::cell::{Attributes, Timestamp};
use crate::store::RowLock;
use bytes::Bytes;

/// Half-open range `[min, max)` of version timestamps a read considers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    /// Inclusive lower bound.
    pub min: Timestamp,
    /// Exclusive upper bound.
    pub max: Timestamp,
}

impl TimeRange {
    /// A range covering every timestamp.
    #[must_use]
    pub const fn all() -> Self {
        Self {
            min: 0,
            max: Timestamp::MAX,
        }
    }

    /// Creates a range `[min, max)`.
    #[must_use]
    pub const fn new(min: Timestamp, max: Timestamp) -> Self {
        Self { min, max }
    }

    /// Checks whether the range contains a timestamp.
    #[must_use]
    pub const fn contains(&self, ts: Timestamp) -> bool {
        ts >= self.min && ts < self.max
    }
}

impl Default for TimeRange {
    fn default() -> Self {
        Self::all()
    }
}

/// Anything that carries attributes.
pub trait Operation {
    /// Returns the operation's attributes.
    fn attributes(&self) -> &Attributes;

    /// Returns the operation's attributes for modification.
    fn attributes_mut(&mut self) -> &mut Attributes;
}

/// Shared controls of read operations ([`Get`] and [`Scan`]).
pub trait Read: Operation {
    /// Returns the time range of versions to consider.
    fn time_range(&self) -> TimeRange;

    /// Sets the time range of versions to consider.
    fn set_time_range(&mut self, range: TimeRange);

    /// Returns the maximum number of versions returned per column.
    fn max_versions(&self) -> usize;

    /// Sets the maximum number of versions returned per column.
    fn set_max_versions(&mut self, versions: usize);

    /// Returns the families this read is restricted to (empty means all).
    fn families(&self) -> &[Bytes];

    /// Restricts the read to an additional family.
    fn add_family(&mut self, family: Bytes);

    /// Requests every stored version of each column.
    fn set_all_versions(&mut self) {
        self.set_max_versions(usize::MAX);
    }

    /// Adds a family unless the read already covers it.
    ///
    /// A read with no explicit families covers all of them and is left alone.
    fn ensure_family(&mut self, family: &Bytes) {
        let families = self.families();
        if !families.is_empty() && !families.contains(family) {
            self.add_family(family.clone());
        }
    }
}

/// One column value carried by a [`Put`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutValue {
    /// Column family.
    pub family: Bytes,
    /// Column qualifier.
    pub qualifier: Bytes,
    /// Explicit version timestamp, or `None` to let the store assign one.
    pub timestamp: Option<Timestamp>,
    /// Value to store.
    pub value: Bytes,
}

/// A write of one or more columns to a single row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Put {
    row: Bytes,
    values: Vec<PutValue>,
    attributes: Attributes,
    lock: Option<RowLock>,
}

impl Put {
    /// Creates an empty put for a row.
    pub fn new(row: impl Into<Bytes>) -> Self {
        Self {
            row: row.into(),
            values: Vec::new(),
            attributes: Attributes::new(),
            lock: None,
        }
    }

    /// Creates an empty put that will be applied under an already held lock.
    pub fn with_lock(row: impl Into<Bytes>, lock: RowLock) -> Self {
        let mut put = Self::new(row);
        put.lock = Some(lock);
        put
    }

    /// Adds a column value with a store-assigned timestamp.
    #[must_use]
    pub fn add(
        mut self,
        family: impl Into<Bytes>,
        qualifier: impl Into<Bytes>,
        value: impl Into<Bytes>,
    ) -> Self {
        self.push(family.into(), qualifier.into(), None, value.into());
        self
    }

    /// Adds a column value at an explicit timestamp.
    #[must_use]
    pub fn add_at(
        mut self,
        family: impl Into<Bytes>,
        qualifier: impl Into<Bytes>,
        timestamp: Timestamp,
        value: impl Into<Bytes>,
    ) -> Self {
        self.push(family.into(), qualifier.into(), Some(timestamp), value.into());
        self
    }

    /// Appends a column value in place.
    pub fn push(
        &mut self,
        family: Bytes,
        qualifier: Bytes,
        timestamp: Option<Timestamp>,
        value: Bytes,
    ) {
        self.values.push(PutValue {
            family,
            qualifier,
            timestamp,
            value,
        });
    }

    /// Returns the target row.
    #[must_use]
    pub fn row(&self) -> &Bytes {
        &self.row
    }

    /// Returns the column values.
    #[must_use]
    pub fn values(&self) -> &[PutValue] {
        &self.values
    }

    /// Returns the lock this put is applied under, if any.
    #[must_use]
    pub fn lock(&self) -> Option<&RowLock> {
        self.lock.as_ref()
    }
}

impl Operation for Put {
    fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    fn attributes_mut(&mut self) -> &mut Attributes {
        &mut self.attributes
    }
}

/// A point read of a single row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Get {
    row: Bytes,
    families: Vec<Bytes>,
    time_range: TimeRange,
    max_versions: usize,
    attributes: Attributes,
}

impl Get {
    /// Creates a get returning the newest version of every column of a row.
    pub fn new(row: impl Into<Bytes>) -> Self {
        Self {
            row: row.into(),
            families: Vec::new(),
            time_range: TimeRange::all(),
            max_versions: 1,
            attributes: Attributes::new(),
        }
    }

    /// Restricts the get to a family.
    #[must_use]
    pub fn family(mut self, family: impl Into<Bytes>) -> Self {
        self.families.push(family.into());
        self
    }

    /// Returns the target row.
    #[must_use]
    pub fn row(&self) -> &Bytes {
        &self.row
    }
}

impl Operation for Get {
    fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    fn attributes_mut(&mut self) -> &mut Attributes {
        &mut self.attributes
    }
}

impl Read for Get {
    fn time_range(&self) -> TimeRange {
        self.time_range
    }

    fn set_time_range(&mut self, range: TimeRange) {
        self.time_range = range;
    }

    fn max_versions(&self) -> usize {
        self.max_versions
    }

    fn set_max_versions(&mut self, versions: usize) {
        self.max_versions = versions;
    }

    fn families(&self) -> &[Bytes] {
        &self.families
    }

    fn add_family(&mut self, family: Bytes) {
        self.families.push(family);
    }
}

/// A range read over rows `[start, end)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scan {
    start: Bytes,
    end: Option<Bytes>,
    families: Vec<Bytes>,
    time_range: TimeRange,
    max_versions: usize,
    attributes: Attributes,
}

impl Scan {
    /// Creates a scan from `start` (inclusive) to `end` (exclusive).
    ///
    /// An `end` of `None` scans to the end of the table.
    pub fn new(start: impl Into<Bytes>, end: Option<Bytes>) -> Self {
        Self {
            start: start.into(),
            end,
            families: Vec::new(),
            time_range: TimeRange::all(),
            max_versions: 1,
            attributes: Attributes::new(),
        }
    }

    /// Creates a scan over the whole table.
    #[must_use]
    pub fn all() -> Self {
        Self::new(Bytes::new(), None)
    }

    /// Restricts the scan to a family.
    #[must_use]
    pub fn family(mut self, family: impl Into<Bytes>) -> Self {
        self.families.push(family.into());
        self
    }

    /// Returns the inclusive start row.
    #[must_use]
    pub fn start(&self) -> &Bytes {
        &self.start
    }

    /// Returns the exclusive end row, if bounded.
    #[must_use]
    pub fn end(&self) -> Option<&Bytes> {
        self.end.as_ref()
    }
}

impl Operation for Scan {
    fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    fn attributes_mut(&mut self) -> &mut Attributes {
        &mut self.attributes
    }
}

impl Read for Scan {
    fn time_range(&self) -> TimeRange {
        self.time_range
    }

    fn set_time_range(&mut self, range: TimeRange) {
        self.time_range = range;
    }

    fn max_versions(&self) -> usize {
        self.max_versions
    }

    fn set_max_versions(&mut self, versions: usize) {
        self.max_versions = versions;
    }

    fn families(&self) -> &[Bytes] {
        &self.families
    }

    fn add_family(&mut self, family: Bytes) {
        self.families.push(family);
    }
}
