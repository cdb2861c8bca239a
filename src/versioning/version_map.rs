//! Operator version map
//!
//! For every operator whose behavior changed, an ordered list of bump
//! records: the version at which the change landed and the upgrader that
//! reproduces the previous behavior with current operators.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::utils::{Error, Result};

/// Latest operator version produced by this runtime
pub const MAX_OPERATOR_VERSION: u64 = 7;

/// One behavior change of an operator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgraderEntry {
    pub bumped_at_version: u64,
    pub upgrader_name: String,
    /// Signature of the operator before the bump (informational)
    pub old_schema: String,
}

impl UpgraderEntry {
    pub fn new(bumped_at_version: u64, upgrader_name: &str, old_schema: &str) -> Self {
        Self {
            bumped_at_version,
            upgrader_name: upgrader_name.to_string(),
            old_schema: old_schema.to_string(),
        }
    }

    /// Versions this entry's upgrader applies to, from its name
    pub fn range(&self) -> Option<UpgraderRange> {
        UpgraderRange::from_upgrader_name(&self.upgrader_name)
    }
}

/// Inclusive version range encoded as `<name>_<min>_<max>`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UpgraderRange {
    pub min_version: u64,
    pub max_version: u64,
}

impl UpgraderRange {
    pub fn from_upgrader_name(name: &str) -> Option<Self> {
        let mut parts = name.rsplitn(3, '_');
        let max = parts.next()?;
        let min = parts.next()?;
        let prefix = parts.next()?;
        if prefix.is_empty() || !is_digits(min) || !is_digits(max) {
            return None;
        }
        let range = Self {
            min_version: min.parse().ok()?,
            max_version: max.parse().ok()?,
        };
        (range.min_version <= range.max_version).then_some(range)
    }

    pub fn contains(&self, version: u64) -> bool {
        self.min_version <= version && version <= self.max_version
    }
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
}

/// Bump history keyed by full schema name (`aten::div.Tensor`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperatorVersionMap {
    entries: BTreeMap<String, Vec<UpgraderEntry>>,
}

impl OperatorVersionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, op: &str) -> Option<&[UpgraderEntry]> {
        self.entries.get(op).map(Vec::as_slice)
    }

    /// Append a bump record for an operator
    pub fn push(&mut self, op: &str, entry: UpgraderEntry) {
        self.entries.entry(op.to_string()).or_default().push(entry);
    }

    /// Replace the full history of an operator
    pub fn insert(&mut self, op: &str, entries: Vec<UpgraderEntry>) -> Option<Vec<UpgraderEntry>> {
        self.entries.insert(op.to_string(), entries)
    }

    pub fn remove(&mut self, op: &str) -> Option<Vec<UpgraderEntry>> {
        self.entries.remove(op)
    }

    /// Merge another map; histories from `other` replace existing ones
    pub fn extend(&mut self, other: OperatorVersionMap) {
        self.entries.extend(other.entries);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[UpgraderEntry])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Check ordering and range invariants of every history
    pub fn validate(&self) -> Result<()> {
        for (op, entries) in &self.entries {
            for pair in entries.windows(2) {
                if pair[1].bumped_at_version <= pair[0].bumped_at_version {
                    return Err(Error::UnorderedVersionEntries {
                        op: op.clone(),
                        previous: pair[0].bumped_at_version,
                        next: pair[1].bumped_at_version,
                    });
                }
            }
            for entry in entries {
                if let Some(range) = entry.range() {
                    if range.max_version + 1 != entry.bumped_at_version {
                        return Err(Error::UpgraderRangeMismatch {
                            op: op.clone(),
                            upgrader: entry.upgrader_name.clone(),
                            max: range.max_version,
                            bumped: entry.bumped_at_version,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let map: Self = serde_json::from_str(json)?;
        map.validate()?;
        Ok(map)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Find the entry whose upgrader applies to a graph at `current_version`.
///
/// That is the first bump that happened after the graph was produced, as
/// long as its upgrader's declared range covers the version.
pub fn find_upgrader(entries: &[UpgraderEntry], current_version: u64) -> Option<&UpgraderEntry> {
    entries
        .iter()
        .find(|e| e.bumped_at_version > current_version)
        .filter(|e| e.range().map_or(true, |r| r.contains(current_version)))
}

/// Version of the most recent bump
pub fn latest_bump(entries: &[UpgraderEntry]) -> Option<u64> {
    entries.last().map(|e| e.bumped_at_version)
}

pub fn is_op_current_based_on_entries(entries: &[UpgraderEntry], current_version: u64) -> bool {
    latest_bump(entries).map_or(true, |latest| latest <= current_version)
}

/// Operators without any recorded history are always current
pub fn is_op_symbol_current(map: &OperatorVersionMap, op: &str, current_version: u64) -> bool {
    map.lookup(op)
        .map_or(true, |entries| is_op_current_based_on_entries(entries, current_version))
}

static BUILTIN_VERSION_MAP: Lazy<OperatorVersionMap> = Lazy::new(|| {
    let mut map = OperatorVersionMap::new();
    map.push(
        "aten::div.Tensor",
        UpgraderEntry::new(4, "div_Tensor_0_3", "aten::div.Tensor(Tensor self, Tensor other) -> Tensor"),
    );
    map.push(
        "aten::div.Scalar",
        UpgraderEntry::new(4, "div_Scalar_0_3", "aten::div.Scalar(Tensor self, Scalar other) -> Tensor"),
    );
    map.push(
        "aten::div_.Tensor",
        UpgraderEntry::new(4, "div__Tensor_0_3", "aten::div_.Tensor(Tensor(a!) self, Tensor other) -> Tensor(a!)"),
    );
    map.push(
        "aten::div_.Scalar",
        UpgraderEntry::new(4, "div__Scalar_0_3", "aten::div_.Scalar(Tensor(a!) self, Scalar other) -> Tensor(a!)"),
    );
    map.push(
        "aten::div.out",
        UpgraderEntry::new(
            4,
            "div_out_0_3",
            "aten::div.out(Tensor self, Tensor other, *, Tensor(a!) out) -> Tensor(a!)",
        ),
    );
    map.push(
        "aten::full",
        UpgraderEntry::new(
            5,
            "full_0_4",
            "aten::full(int[] size, Scalar fill_value, *, ScalarType? dtype=None, Layout? layout=None, Device? device=None, bool? pin_memory=None) -> Tensor",
        ),
    );
    map.push(
        "aten::full.out",
        UpgraderEntry::new(
            5,
            "full_out_0_4",
            "aten::full.out(int[] size, Scalar fill_value, *, Tensor(a!) out) -> Tensor(a!)",
        ),
    );
    map
});

/// The version map shipped with the runtime; built once, never mutated
pub fn builtin_version_map() -> &'static OperatorVersionMap {
    &BUILTIN_VERSION_MAP
}
