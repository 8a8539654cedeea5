use std::{
    collections::{HashMap, VecDeque},
    path::PathBuf,
    time::SystemTime,
};

use crate::types::Pose;

/// Identifies one version of an image file.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub path: PathBuf,
    pub modified: SystemTime,
}

/// Bounded pose cache evicting in insertion order. Lookups do not refresh
/// an entry's position, and re-inserting an existing key keeps its slot.
#[derive(Debug)]
pub struct PoseCache {
    capacity: usize,
    entries: HashMap<CacheKey, Pose>,
    order: VecDeque<CacheKey>,
}

impl PoseCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
        }
    }

    pub fn get(&self, key: &CacheKey) -> Option<&Pose> {
        self.entries.get(key)
    }

    pub fn insert(&mut self, key: CacheKey, pose: Pose) {
        if self.capacity == 0 {
            return;
        }
        if let Some(existing) = self.entries.get_mut(&key) {
            *existing = pose;
            return;
        }
        while self.order.len() >= self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.entries.remove(&oldest);
                }
                None => break,
            }
        }
        self.order.push_back(key.clone());
        self.entries.insert(key, pose);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::types::Landmark;

    fn key(i: u64) -> CacheKey {
        CacheKey {
            path: PathBuf::from(format!("/img/{i}.png")),
            modified: SystemTime::UNIX_EPOCH + Duration::from_secs(i),
        }
    }

    fn pose(x: f32) -> Pose {
        Pose::from_named([("nose", Landmark::new(x, 0.0, 0.0, 1.0))])
    }

    #[test]
    fn evicts_oldest_insert_even_if_recently_read() {
        let mut cache = PoseCache::new(2);
        cache.insert(key(1), pose(1.0));
        cache.insert(key(2), pose(2.0));
        assert!(cache.get(&key(1)).is_some());
        cache.insert(key(3), pose(3.0));

        assert_eq!(cache.len(), 2);
        assert!(cache.get(&key(1)).is_none());
        assert!(cache.get(&key(2)).is_some());
        assert!(cache.get(&key(3)).is_some());
    }

    #[test]
    fn reinsert_replaces_without_reordering() {
        let mut cache = PoseCache::new(2);
        cache.insert(key(1), pose(1.0));
        cache.insert(key(2), pose(2.0));
        cache.insert(key(1), pose(10.0));
        assert_eq!(cache.get(&key(1)), Some(&pose(10.0)));

        cache.insert(key(3), pose(3.0));
        assert!(cache.get(&key(1)).is_none());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn same_path_different_mtime_is_a_different_entry() {
        let mut cache = PoseCache::new(64);
        let a = key(1);
        let b = CacheKey {
            modified: a.modified + Duration::from_secs(1),
            ..a.clone()
        };
        cache.insert(a.clone(), pose(1.0));
        assert!(cache.get(&b).is_none());
        cache.insert(b.clone(), Pose::empty());
        assert!(cache.get(&b).unwrap().is_empty());
        assert_eq!(cache.get(&a), Some(&pose(1.0)));
    }
}
