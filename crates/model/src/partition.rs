//! Partition boundaries and row-key routing.

use serde::{Deserialize, Serialize};

use crate::error::{BoundaryError, MappingError};

/// One partition of the store: the half-open row range `[start_key, end_key)`.
///
/// An empty `start_key` is unbounded below, an empty `end_key` unbounded above.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionDesc {
    pub id: u64,
    pub start_key: Vec<u8>,
    pub end_key: Vec<u8>,
}

impl PartitionDesc {
    pub fn contains(&self, row: &[u8]) -> bool {
        self.start_key.as_slice() <= row && (self.end_key.is_empty() || row < self.end_key.as_slice())
    }

    fn is_empty_range(&self) -> bool {
        !self.end_key.is_empty() && self.start_key >= self.end_key
    }
}

impl std::fmt::Display for PartitionDesc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let start = String::from_utf8_lossy(&self.start_key);
        let end = String::from_utf8_lossy(&self.end_key);
        write!(f, "p{} [{start:?}, {end:?})", self.id)
    }
}

/// The store's boundary set: sorted, disjoint partitions.
///
/// Gaps are representable (a store that lost a partition), overlaps are not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<PartitionDesc>", into = "Vec<PartitionDesc>")]
pub struct PartitionMap {
    partitions: Vec<PartitionDesc>,
}

impl PartitionMap {
    pub fn new(mut partitions: Vec<PartitionDesc>) -> Result<Self, BoundaryError> {
        partitions.sort_by(|a, b| a.start_key.cmp(&b.start_key));

        let mut ids: Vec<u64> = partitions.iter().map(|p| p.id).collect();
        ids.sort_unstable();
        if let Some(pair) = ids.windows(2).find(|pair| pair[0] == pair[1]) {
            return Err(BoundaryError::DuplicateId(pair[0]));
        }
        if let Some(p) = partitions.iter().find(|p| p.is_empty_range()) {
            return Err(BoundaryError::EmptyRange { id: p.id });
        }
        for pair in partitions.windows(2) {
            let (left, right) = (&pair[0], &pair[1]);
            if left.end_key.is_empty() || left.end_key > right.start_key {
                return Err(BoundaryError::Overlap {
                    left: left.id,
                    right: right.id,
                });
            }
        }

        Ok(Self { partitions })
    }

    /// Full-coverage map cut at `split_keys`, ids numbered from 0.
    pub fn from_split_keys<K: AsRef<[u8]>>(split_keys: &[K]) -> Result<Self, BoundaryError> {
        let keys: Vec<&[u8]> = split_keys.iter().map(|k| k.as_ref()).collect();
        let ordered = keys.windows(2).all(|pair| pair[0] < pair[1]);
        if !ordered || keys.iter().any(|k| k.is_empty()) {
            return Err(BoundaryError::UnorderedSplitKeys);
        }

        let mut bounds = Vec::with_capacity(keys.len() + 2);
        bounds.push(&[][..]);
        bounds.extend(keys);
        bounds.push(&[][..]);

        let partitions = bounds
            .windows(2)
            .enumerate()
            .map(|(i, pair)| PartitionDesc {
                id: i as u64,
                start_key: pair[0].to_vec(),
                end_key: pair[1].to_vec(),
            })
            .collect();
        Self::new(partitions)
    }

    /// Index of the partition whose range holds `row`.
    pub fn locate(&self, row: &[u8]) -> Result<usize, MappingError> {
        let after = self
            .partitions
            .partition_point(|p| p.start_key.as_slice() <= row);
        match after.checked_sub(1) {
            Some(idx) if self.partitions[idx].contains(row) => Ok(idx),
            _ => Err(MappingError::Unmapped { row: row.to_vec() }),
        }
    }

    /// Indexes of every partition intersecting `[first, last]`, in key order.
    pub fn overlapping(&self, first: &[u8], last: &[u8]) -> Result<Vec<usize>, MappingError> {
        let mut idx = self.locate(first)?;
        let mut hits = vec![idx];
        loop {
            let current = &self.partitions[idx];
            if current.contains(last) {
                return Ok(hits);
            }
            match self.partitions.get(idx + 1) {
                Some(next) if next.start_key == current.end_key => {
                    idx += 1;
                    hits.push(idx);
                }
                _ => {
                    return Err(MappingError::Gap {
                        first: first.to_vec(),
                        last: last.to_vec(),
                    });
                }
            }
        }
    }

    /// True when the partitions leave no gap anywhere in the key space.
    pub fn covers_key_space(&self) -> bool {
        let (Some(first), Some(last)) = (self.partitions.first(), self.partitions.last()) else {
            return false;
        };
        first.start_key.is_empty()
            && last.end_key.is_empty()
            && self
                .partitions
                .windows(2)
                .all(|pair| pair[0].end_key == pair[1].start_key)
    }

    pub fn get(&self, index: usize) -> &PartitionDesc {
        &self.partitions[index]
    }

    pub fn by_id(&self, id: u64) -> Option<&PartitionDesc> {
        self.partitions.iter().find(|p| p.id == id)
    }

    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PartitionDesc> {
        self.partitions.iter()
    }
}

impl TryFrom<Vec<PartitionDesc>> for PartitionMap {
    type Error = BoundaryError;

    fn try_from(partitions: Vec<PartitionDesc>) -> Result<Self, Self::Error> {
        Self::new(partitions)
    }
}

impl From<PartitionMap> for Vec<PartitionDesc> {
    fn from(map: PartitionMap) -> Self {
        map.partitions
    }
}
