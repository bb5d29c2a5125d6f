//! Named diagnostic regions of a file.

use crate::error::{BinError, Result};
use serde::Serialize;
use std::collections::BTreeMap;

/// A named `[offset, offset + length)` span of a file, used for labeling only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Region {
    /// Label shown in logs and reports.
    pub name: String,
    /// File offset of the first byte.
    pub offset: i64,
    /// Length in bytes.
    pub length: i64,
}

impl Region {
    /// Creates a region.
    pub fn new(name: impl Into<String>, offset: i64, length: i64) -> Self {
        Self {
            name: name.into(),
            offset,
            length,
        }
    }

    /// One past the last byte.
    pub fn end(&self) -> i64 {
        self.offset + self.length
    }

    /// True if `offset` lies inside the region.
    pub fn contains(&self, offset: i64) -> bool {
        offset >= self.offset && offset < self.end()
    }
}

/// Non-overlapping regions sorted by start offset.
#[derive(Debug, Clone, Default)]
pub struct RegionMap {
    regions: BTreeMap<i64, Region>,
}

impl RegionMap {
    /// Adds a region, rejecting overlaps with existing ones.
    pub fn add(&mut self, region: Region) -> Result<()> {
        if region.length <= 0 {
            return Err(BinError::Context(format!(
                "region '{}' has non-positive length {}",
                region.name, region.length
            )));
        }
        let overlaps_previous = self
            .regions
            .range(..=region.offset)
            .next_back()
            .is_some_and(|(_, r)| r.end() > region.offset);
        let overlaps_next = self
            .regions
            .range(region.offset..)
            .next()
            .is_some_and(|(&start, _)| start < region.end());
        if overlaps_previous || overlaps_next {
            return Err(BinError::Context(format!(
                "region '{}' [0x{:X}, 0x{:X}) overlaps an existing region",
                region.name,
                region.offset,
                region.end()
            )));
        }
        self.regions.insert(region.offset, region);
        Ok(())
    }

    /// Finds the region containing `offset`.
    pub fn find(&self, offset: i64) -> Option<&Region> {
        self.regions
            .range(..=offset)
            .next_back()
            .map(|(_, r)| r)
            .filter(|r| r.contains(offset))
    }

    /// Iterates regions in offset order.
    pub fn iter(&self) -> impl Iterator<Item = &Region> {
        self.regions.values()
    }

    /// Number of regions.
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    /// True if no region was added.
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}
