use std::{collections::BTreeSet, str::FromStr};

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

/// A closed interval of ports, `start` and `end` both usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    start: u16,
    end: u16,
}

impl PortRange {
    pub fn new(start: u16, end: u16) -> Self {
        assert!(start <= end);

        Self { start, end }
    }

    pub fn start(&self) -> u16 {
        self.start
    }

    pub fn end(&self) -> u16 {
        self.end
    }

    pub fn size(&self) -> usize {
        (self.end - self.start) as usize + 1
    }

    pub fn contains(&self, port: u16) -> bool {
        port >= self.start && port <= self.end
    }

    pub fn iter(&self) -> std::ops::RangeInclusive<u16> {
        self.start..=self.end
    }
}

impl Default for PortRange {
    fn default() -> Self {
        Self {
            start: 10000,
            end: 10100,
        }
    }
}

impl std::fmt::Display for PortRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

#[derive(Debug)]
pub struct PortRangeParseError(String);

impl std::error::Error for PortRangeParseError {}

impl std::fmt::Display for PortRangeParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<std::num::ParseIntError> for PortRangeParseError {
    fn from(error: std::num::ParseIntError) -> Self {
        PortRangeParseError(error.to_string())
    }
}

impl FromStr for PortRange {
    type Err = PortRangeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (start, end) = s
            .split_once("..")
            .ok_or(PortRangeParseError(s.to_string()))?;

        let start: u16 = start.parse()?;
        let end: u16 = end.parse()?;
        if start > end {
            return Err(PortRangeParseError(s.to_string()));
        }

        Ok(Self { start, end })
    }
}

impl Serialize for PortRange {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for PortRange {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_str(&s).map_err(|e| serde::de::Error::custom(e.0))
    }
}

/// No free port remains in any configured range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortExhausted;

impl std::error::Error for PortExhausted {}

impl std::fmt::Display for PortExhausted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "no free port remains in the configured ranges")
    }
}

/// Keyed port allocator.
///
/// Maintains a bijection between opaque string keys and ports drawn from
/// the configured ranges. Allocation walks the ranges in configuration
/// order and always hands out the lowest free port, with no
/// randomization: two allocators fed identical operation sequences
/// produce identical assignments.
///
/// The allocator is `Clone` so a commit can stage its operations on a
/// copy and swap the copy in only when every allocation succeeded.
///
/// # Test
///
/// ```
/// use catalyst_rib::ports::{PortAllocator, PortRange};
///
/// let mut pool = PortAllocator::new(vec![PortRange::new(10000, 10100)]);
///
/// assert_eq!(pool.allocate("books-api"), Ok(10000));
/// assert_eq!(pool.allocate("films-api"), Ok(10001));
///
/// // Idempotent per key.
/// assert_eq!(pool.allocate("books-api"), Ok(10000));
///
/// // Release then re-allocate hands the lowest port back out.
/// pool.release("books-api");
/// assert_eq!(pool.allocate("tickets-api"), Ok(10000));
/// ```
#[derive(Debug, Clone)]
pub struct PortAllocator {
    ranges: Vec<PortRange>,
    by_key: AHashMap<String, u16>,
    in_use: BTreeSet<u16>,
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new(vec![PortRange::default()])
    }
}

impl PortAllocator {
    pub fn new(ranges: Vec<PortRange>) -> Self {
        Self {
            by_key: AHashMap::new(),
            in_use: BTreeSet::new(),
            ranges,
        }
    }

    /// Total number of ports across all ranges.
    pub fn capacity(&self) -> usize {
        self.ranges.iter().map(|r| r.size()).sum()
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    /// The port mapped to `key`, without mutation.
    pub fn port_for(&self, key: &str) -> Option<u16> {
        self.by_key.get(key).copied()
    }

    /// Map `key` to a port.
    ///
    /// Returns the existing port when the key is already mapped,
    /// otherwise the lowest free port of the first range with room.
    pub fn allocate(&mut self, key: &str) -> Result<u16, PortExhausted> {
        if let Some(port) = self.by_key.get(key) {
            return Ok(*port);
        }

        let port = self
            .ranges
            .iter()
            .flat_map(|r| r.iter())
            .find(|p| !self.in_use.contains(p))
            .ok_or(PortExhausted)?;

        self.by_key.insert(key.to_string(), port);
        self.in_use.insert(port);
        Ok(port)
    }

    /// Unmap `key`. Idempotent; returns the released port if any.
    pub fn release(&mut self, key: &str) -> Option<u16> {
        let port = self.by_key.remove(key)?;
        self.in_use.remove(&port);
        Some(port)
    }
}
