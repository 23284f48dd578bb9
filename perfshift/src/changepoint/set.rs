use serde::ser::SerializeSeq;
use serde::{Serialize, Serializer};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{error, info};

use super::kind::ChangePointType;
use super::point::{ChangePoint, ChangePointKey};
use crate::error::Result;
use crate::series::SeriesSet;

#[derive(Default)]
struct SetInner {
    by_key: HashMap<ChangePointKey, Arc<ChangePoint>>,
    order: Vec<Arc<ChangePoint>>,
}

impl SetInner {
    /// The key map and the order list must always agree in size. A mismatch
    /// means a bug in this module, so the process is stopped.
    fn assert_consistent(&self) {
        if self.by_key.len() != self.order.len() {
            error!(
                keys = self.by_key.len(),
                ordered = self.order.len(),
                "change point set lost consistency between key map and order list"
            );
            std::process::abort();
        }
    }
}

/// Change points keyed by revision and type, iterated in insertion order.
///
/// Adding a change point whose key is already present merges the two and puts
/// the merged value at the position of the old one. Readers may query the set
/// concurrently; writers are exclusive.
#[derive(Default)]
pub struct ChangePointSet {
    inner: RwLock<SetInner>,
}

impl ChangePointSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, SetInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, SetInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts a change point, merging it into an existing one with the same
    /// revision and type.
    ///
    /// On error the set is left unchanged.
    pub fn add(&self, change_point: impl Into<Arc<ChangePoint>>) -> Result<()> {
        let change_point = change_point.into();
        let key = change_point.key();
        let mut inner = self.write();

        match inner.by_key.get(&key) {
            Some(existing) => {
                let merged = Arc::new(existing.merge(&change_point)?);
                let previous = Arc::clone(existing);
                if let Some(slot) = inner
                    .order
                    .iter_mut()
                    .find(|cp| Arc::ptr_eq(cp, &previous))
                {
                    *slot = Arc::clone(&merged);
                }
                inner.by_key.insert(key, merged);
            }
            None => {
                inner.order.push(Arc::clone(&change_point));
                inner.by_key.insert(key, change_point);
            }
        }

        inner.assert_consistent();
        Ok(())
    }

    /// Looks up the change point for a revision and type.
    pub fn get(&self, revision: &str, change_type: ChangePointType) -> Option<Arc<ChangePoint>> {
        let key = ChangePointKey {
            revision: revision.to_string(),
            change_type,
        };
        self.read().by_key.get(&key).cloned()
    }

    /// Every change point at a revision, one per type, in insertion order.
    pub fn at(&self, revision: &str) -> Vec<Arc<ChangePoint>> {
        self.read()
            .order
            .iter()
            .filter(|cp| cp.revision() == revision)
            .cloned()
            .collect()
    }

    /// Snapshot of every change point in insertion order.
    pub fn all(&self) -> Vec<Arc<ChangePoint>> {
        self.read().order.clone()
    }

    pub fn len(&self) -> usize {
        self.read().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deep copy: new map, new order list and a copy of every change point.
    pub fn copy(&self) -> ChangePointSet {
        let inner = self.read();
        let mut copied = SetInner::default();
        for cp in &inner.order {
            let cp = Arc::new(ChangePoint::clone(cp));
            copied.by_key.insert(cp.key(), Arc::clone(&cp));
            copied.order.push(cp);
        }
        copied.assert_consistent();
        ChangePointSet {
            inner: RwLock::new(copied),
        }
    }

    /// Orders by number of affected tests, fewest first. Ties keep their
    /// insertion order.
    pub fn sort_by_affected_tests(&self) {
        self.write().order.sort_by_key(|cp| cp.test_count());
    }

    /// Reverses the iteration order.
    pub fn reverse(&self) {
        self.write().order.reverse();
    }

    /// A copy ordered most affected tests first, leaving this set untouched.
    pub fn sorted_by_impact(&self) -> ChangePointSet {
        let copy = self.copy();
        copy.write()
            .order
            .sort_by(|a, b| b.test_count().cmp(&a.test_count()));
        copy
    }

    /// Adds every change point of `other`.
    pub fn extend_from(&self, other: &ChangePointSet) -> Result<()> {
        for cp in other.all() {
            self.add(cp)?;
        }
        Ok(())
    }

    /// Collects the change points attached to every series of a set.
    pub fn from_series_set(set: &SeriesSet) -> Result<ChangePointSet> {
        let collected = ChangePointSet::new();
        for series in set.iter() {
            collected.extend_from(series.change_points())?;
        }
        Ok(collected)
    }

    /// Number of distinct tests with at least one change point.
    pub fn affected_tests(&self) -> usize {
        self.read()
            .order
            .iter()
            .flat_map(|cp| cp.test_names().iter())
            .collect::<HashSet<_>>()
            .len()
    }
}

impl Clone for ChangePointSet {
    fn clone(&self) -> Self {
        self.copy()
    }
}

impl fmt::Debug for ChangePointSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.read().order.iter()).finish()
    }
}

impl Serialize for ChangePointSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let inner = self.read();
        let mut seq = serializer.serialize_seq(Some(inner.order.len()))?;
        for cp in &inner.order {
            seq.serialize_element(&cp.to_record())?;
        }
        seq.end()
    }
}

/// Drops (test, revision) detections that an earlier set already reported.
///
/// Sets are processed in order, so the first set reporting a pair keeps it.
/// Sets left without any change point are omitted from the result.
pub fn remove_duplicate_tests(sets: &[ChangePointSet]) -> Result<Vec<ChangePointSet>> {
    let mut seen: HashSet<(String, String)> = HashSet::new();
    let mut kept_sets = Vec::with_capacity(sets.len());

    for (index, set) in sets.iter().enumerate() {
        let original = set.len();
        let kept = ChangePointSet::new();
        for cp in set.all() {
            let revision = cp.revision().to_string();
            let fresh =
                cp.without_tests(|test| seen.contains(&(test.to_string(), revision.clone())));
            if let Some(fresh) = fresh {
                for test in fresh.test_names() {
                    seen.insert((test.clone(), revision.clone()));
                }
                kept.add(fresh)?;
            }
        }
        info!(set = index, kept = kept.len(), original, "Removed duplicate tests");
        if !kept.is_empty() {
            kept_sets.push(kept);
        }
    }

    Ok(kept_sets)
}
