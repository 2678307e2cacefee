//! Delta-encoded ordered containers.
//!
//! An incmap links two increasing sequences: both the keys and the values
//! are serialized as successive non-negative deltas, so a map whose entries
//! cluster tightly costs one byte per side per entry regardless of the
//! absolute magnitudes. The id set uses the key half of the same schema.

use std::collections::{BTreeMap, BTreeSet};

use cqdb_error::{CqError, Result};

use crate::stream::{Decode, Encode, Stream};
use crate::varint::{read_varint, write_varint};

/// An ordered map whose keys and values are both monotone non-decreasing
/// in iteration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IncMap {
    map: BTreeMap<u64, u64>,
}

impl IncMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a key.
    ///
    /// The monotonicity invariant is checked at serialization time: a value
    /// smaller than its predecessor's cannot be delta-encoded.
    pub fn insert(&mut self, key: u64, value: u64) {
        self.map.insert(key, value);
    }

    #[must_use]
    pub fn get(&self, key: u64) -> Option<u64> {
        self.map.get(&key).copied()
    }

    #[must_use]
    pub fn contains(&self, key: u64) -> bool {
        self.map.contains_key(&key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }

    #[must_use]
    pub fn first_key(&self) -> Option<u64> {
        self.map.keys().next().copied()
    }

    #[must_use]
    pub fn last_key(&self) -> Option<u64> {
        self.map.keys().next_back().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.map.iter().map(|(k, v)| (*k, *v))
    }
}

impl Encode for IncMap {
    fn encode<S: Stream + ?Sized>(&self, stream: &mut S) -> Result<()> {
        write_varint(stream, self.map.len() as u64)?;
        let mut prev = 0;
        for &key in self.map.keys() {
            debug_assert!(key >= prev);
            write_varint(stream, key - prev)?;
            prev = key;
        }
        prev = 0;
        for &value in self.map.values() {
            debug_assert!(value >= prev, "incmap values must be non-decreasing");
            write_varint(stream, value - prev)?;
            prev = value;
        }
        Ok(())
    }
}

impl Decode for IncMap {
    fn decode<S: Stream + ?Sized>(stream: &mut S) -> Result<Self> {
        let size = read_varint(stream)?;
        let mut keys = Vec::with_capacity(size.min(4096) as usize);
        let mut cursor: u64 = 0;
        for _ in 0..size {
            cursor = cursor
                .checked_add(read_varint(stream)?)
                .ok_or_else(|| CqError::corrupt("incmap key delta overflow"))?;
            keys.push(cursor);
        }
        let mut map = BTreeMap::new();
        cursor = 0;
        for key in keys {
            cursor = cursor
                .checked_add(read_varint(stream)?)
                .ok_or_else(|| CqError::corrupt("incmap value delta overflow"))?;
            map.insert(key, cursor);
        }
        Ok(IncMap { map })
    }
}

/// An ordered set of 64-bit ids, delta-encoded like the incmap key side.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdSet {
    set: BTreeSet<u64>,
}

impl IdSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: u64) -> bool {
        self.set.insert(id)
    }

    #[must_use]
    pub fn contains(&self, id: u64) -> bool {
        self.set.contains(&id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.set.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    #[must_use]
    pub fn first(&self) -> Option<u64> {
        self.set.iter().next().copied()
    }

    #[must_use]
    pub fn last(&self) -> Option<u64> {
        self.set.iter().next_back().copied()
    }

    /// Smallest member strictly greater than `id`.
    #[must_use]
    pub fn next_after(&self, id: u64) -> Option<u64> {
        use std::ops::Bound;
        self.set
            .range((Bound::Excluded(id), Bound::Unbounded))
            .next()
            .copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.set.iter().copied()
    }
}

impl FromIterator<u64> for IdSet {
    fn from_iter<I: IntoIterator<Item = u64>>(iter: I) -> Self {
        IdSet {
            set: iter.into_iter().collect(),
        }
    }
}

impl Encode for IdSet {
    fn encode<S: Stream + ?Sized>(&self, stream: &mut S) -> Result<()> {
        write_varint(stream, self.set.len() as u64)?;
        let mut prev = 0;
        for &id in &self.set {
            write_varint(stream, id - prev)?;
            prev = id;
        }
        Ok(())
    }
}

impl Decode for IdSet {
    fn decode<S: Stream + ?Sized>(stream: &mut S) -> Result<Self> {
        let size = read_varint(stream)?;
        let mut set = BTreeSet::new();
        let mut cursor: u64 = 0;
        for _ in 0..size {
            cursor = cursor
                .checked_add(read_varint(stream)?)
                .ok_or_else(|| CqError::corrupt("id set delta overflow"))?;
            set.insert(cursor);
        }
        Ok(IdSet { set })
    }
}
