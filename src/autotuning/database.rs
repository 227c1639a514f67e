//! Tile config database: best configuration per shape bucket.
//!
//! Records are partitioned by target fingerprint and iteration-space type.
//! The file backend stores one JSON document per partition under
//! `<root>/<fingerprint>/<iter space>.json`; unreadable files are treated as
//! empty so a damaged database degrades to the heuristic instead of failing
//! compilation.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::autotuning::bucket::{BucketInfo, BucketKey, IterSpaceType};
use crate::autotuning::search_space::TileConfig;
use crate::target::Target;
use crate::types::TuneResult;

/// One tuned bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileConfigRecord {
    pub bucket: BucketKey,
    pub config: TileConfig,
    pub score: f64,
    /// Unix seconds when the record was written
    pub timestamp: u64,
}

/// Result of looking a bucket up in a [`TileConfigMap`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Lookup<'a> {
    Exact(&'a TileConfigRecord),
    /// Smallest stored bucket enclosing the query
    Enclosing(&'a TileConfigRecord),
    Miss,
}

impl<'a> Lookup<'a> {
    pub fn record(&self) -> Option<&'a TileConfigRecord> {
        match *self {
            Lookup::Exact(r) | Lookup::Enclosing(r) => Some(r),
            Lookup::Miss => None,
        }
    }
}

/// Bucket key → record for one (target, iteration space) partition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TileConfigMap {
    entries: BTreeMap<BucketKey, TileConfigRecord>,
}

impl TileConfigMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert or overwrite the record for its bucket.
    pub fn insert(&mut self, record: TileConfigRecord) {
        self.entries.insert(record.bucket.clone(), record);
    }

    pub fn get(&self, key: &BucketKey) -> Option<&TileConfigRecord> {
        self.entries.get(key)
    }

    pub fn records(&self) -> impl Iterator<Item = &TileConfigRecord> {
        self.entries.values()
    }

    pub fn extend(&mut self, other: TileConfigMap) {
        self.entries.extend(other.entries);
    }

    pub fn lookup(&self, key: &BucketKey) -> Lookup<'_> {
        if let Some(r) = self.entries.get(key) {
            return Lookup::Exact(r);
        }
        self.entries
            .values()
            .filter(|r| r.bucket.encloses(key))
            .min_by_key(|r| r.bucket.volume())
            .map_or(Lookup::Miss, Lookup::Enclosing)
    }

    /// Smallest bucket containing a concrete shape.
    pub fn lookup_shape(&self, shape: &[i64]) -> Option<&TileConfigRecord> {
        self.entries
            .values()
            .filter(|r| r.bucket.contains_shape(shape))
            .min_by_key(|r| r.bucket.volume())
    }
}

/// Storage for tuned tile configurations.
///
/// Records with a non-finite score are dropped with a warning.
pub trait TileConfigDatabase: Send + Sync {
    /// All records for the partition. Never fails; unreadable storage is empty.
    fn get_configs(&self, target: &Target, iter_space: &IterSpaceType) -> TileConfigMap;

    /// Append or overwrite the record for `bucket`.
    fn add_config(&mut self, target: &Target, bucket: &BucketInfo, config: TileConfig, score: f64);

    /// Persist pending records.
    fn commit(&mut self) -> TuneResult<()>;
}

type Partition = (String, IterSpaceType);

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Record for `bucket`, or `None` when the score cannot be stored as JSON.
fn record_for(bucket: &BucketInfo, config: TileConfig, score: f64) -> Option<TileConfigRecord> {
    if !score.is_finite() {
        log::warn!("not storing {config} for {}: score {score} is not finite", bucket.key());
        return None;
    }
    Some(TileConfigRecord {
        bucket: bucket.key(),
        config,
        score,
        timestamp: now_secs(),
    })
}

/// In-memory database; `commit` is a no-op.
#[derive(Debug, Default)]
pub struct NaiveTileConfigDatabase {
    partitions: HashMap<Partition, TileConfigMap>,
}

impl NaiveTileConfigDatabase {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TileConfigDatabase for NaiveTileConfigDatabase {
    fn get_configs(&self, target: &Target, iter_space: &IterSpaceType) -> TileConfigMap {
        self.partitions
            .get(&(target.fingerprint(), iter_space.clone()))
            .cloned()
            .unwrap_or_default()
    }

    fn add_config(&mut self, target: &Target, bucket: &BucketInfo, config: TileConfig, score: f64) {
        let Some(record) = record_for(bucket, config, score) else {
            return;
        };
        self.partitions
            .entry((target.fingerprint(), bucket.iter_space_type()))
            .or_default()
            .insert(record);
    }

    fn commit(&mut self) -> TuneResult<()> {
        Ok(())
    }
}

/// On-disk layout of one partition.
#[derive(Debug, Serialize, Deserialize)]
struct PartitionFile {
    target: String,
    iter_space: IterSpaceType,
    records: Vec<TileConfigRecord>,
}

/// JSON-file database rooted at a directory.
#[derive(Debug)]
pub struct FileTileConfigDatabase {
    root: PathBuf,
    /// Partitions touched by `add_config`, merged with what was on disk.
    loaded: HashMap<Partition, TileConfigMap>,
    dirty: HashSet<Partition>,
}

impl FileTileConfigDatabase {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FileTileConfigDatabase {
            root: root.into(),
            loaded: HashMap::new(),
            dirty: HashSet::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn partition_path(&self, fingerprint: &str, iter_space: &IterSpaceType) -> PathBuf {
        self.root
            .join(fingerprint)
            .join(format!("{}.json", iter_space.file_stem()))
    }

    /// Whether records are waiting for `commit`.
    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    fn read_partition(&self, fingerprint: &str, iter_space: &IterSpaceType) -> TileConfigMap {
        let path = self.partition_path(fingerprint, iter_space);
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("no tile config file at {}", path.display());
                return TileConfigMap::new();
            }
            Err(e) => {
                log::warn!("cannot read tile config file {}: {e}", path.display());
                return TileConfigMap::new();
            }
        };
        let file: PartitionFile = match serde_json::from_str(&content) {
            Ok(f) => f,
            Err(e) => {
                log::warn!("corrupt tile config file {}: {e}", path.display());
                return TileConfigMap::new();
            }
        };

        let mut map = TileConfigMap::new();
        for record in file.records {
            if record.bucket.iter_space_type() != *iter_space {
                log::warn!(
                    "skipping record {} in {}: wrong iteration space",
                    record.bucket,
                    path.display()
                );
                continue;
            }
            map.insert(record);
        }
        map
    }
}

impl TileConfigDatabase for FileTileConfigDatabase {
    fn get_configs(&self, target: &Target, iter_space: &IterSpaceType) -> TileConfigMap {
        let fingerprint = target.fingerprint();
        match self.loaded.get(&(fingerprint.clone(), iter_space.clone())) {
            Some(map) => map.clone(),
            None => self.read_partition(&fingerprint, iter_space),
        }
    }

    fn add_config(&mut self, target: &Target, bucket: &BucketInfo, config: TileConfig, score: f64) {
        let Some(record) = record_for(bucket, config, score) else {
            return;
        };
        let key = (target.fingerprint(), bucket.iter_space_type());
        if !self.loaded.contains_key(&key) {
            let existing = self.read_partition(&key.0, &key.1);
            self.loaded.insert(key.clone(), existing);
        }
        if let Some(map) = self.loaded.get_mut(&key) {
            map.insert(record);
        }
        self.dirty.insert(key);
    }

    fn commit(&mut self) -> TuneResult<()> {
        let mut dirty: Vec<Partition> = self.dirty.iter().cloned().collect();
        dirty.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.file_stem().cmp(&b.1.file_stem())));

        for key in dirty {
            let Some(map) = self.loaded.get(&key) else {
                continue;
            };
            let path = self.partition_path(&key.0, &key.1);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = PartitionFile {
                target: key.0.clone(),
                iter_space: key.1.clone(),
                records: map.records().cloned().collect(),
            };
            std::fs::write(&path, serde_json::to_string_pretty(&file)?)?;
            log::info!("wrote {} tile configs to {}", map.len(), path.display());
            self.dirty.remove(&key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autotuning::bucket::{AxisTag, Dimension};

    fn bucket(lo: i64, hi: i64) -> BucketInfo {
        BucketInfo::new(vec![
            Dimension::uniform(32, 32, AxisTag::Spatial, false).unwrap(),
            Dimension::uniform(lo, hi, AxisTag::Reduce, true).unwrap(),
        ])
        .unwrap()
    }

    fn temp_root(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("tile_tuner_db_{name}_{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn test_lookup_exact_enclosing_miss() {
        let mut map = TileConfigMap::new();
        let wide = bucket(32, 1023);
        let narrow = bucket(32, 127);
        map.insert(record_for(&wide, TileConfig::new(8, 256, 1), 2.0).unwrap());
        map.insert(record_for(&narrow, TileConfig::new(4, 32, 1), 1.0).unwrap());

        assert!(matches!(map.lookup(&narrow.key()), Lookup::Exact(r) if r.config.warp_num == 4));
        // [64, 95] is inside both; the narrow bucket wins.
        match map.lookup(&bucket(64, 95).key()) {
            Lookup::Enclosing(r) => assert_eq!(r.bucket, narrow.key()),
            other => panic!("expected Enclosing, got {other:?}"),
        }
        assert_eq!(map.lookup(&bucket(2048, 3071).key()), Lookup::Miss);

        assert_eq!(map.lookup_shape(&[32, 500]).unwrap().config.warp_num, 8);
        assert_eq!(map.lookup_shape(&[32, 100]).unwrap().config.warp_num, 4);
        assert!(map.lookup_shape(&[64, 100]).is_none());
    }

    #[test]
    fn test_naive_overwrites() {
        let target = Target::nvidia_a100();
        let b = bucket(32, 63);
        let mut db = NaiveTileConfigDatabase::new();
        db.add_config(&target, &b, TileConfig::new(1, 32, 1), 5.0);
        db.add_config(&target, &b, TileConfig::new(2, 32, 1), 4.0);
        let map = db.get_configs(&target, &b.iter_space_type());
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(&b.key()).unwrap().config, TileConfig::new(2, 32, 1));
        // Other targets see nothing.
        assert!(db.get_configs(&Target::amd_mi250(), &b.iter_space_type()).is_empty());
    }

    #[test]
    fn test_file_roundtrip() {
        let root = temp_root("roundtrip");
        let target = Target::nvidia_a100();
        let b = bucket(128, 255);
        let mut db = FileTileConfigDatabase::new(&root);
        db.add_config(&target, &b, TileConfig::new(4, 128, 1), 3.5);
        assert!(db.is_dirty());
        db.commit().unwrap();
        assert!(!db.is_dirty());
        assert!(db
            .partition_path(&target.fingerprint(), &b.iter_space_type())
            .exists());

        let reopened = FileTileConfigDatabase::new(&root);
        let map = reopened.get_configs(&target, &b.iter_space_type());
        let rec = map.get(&b.key()).unwrap();
        assert_eq!(rec.config, TileConfig::new(4, 128, 1));
        assert_eq!(rec.score, 3.5);
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn test_add_keeps_existing_records() {
        let root = temp_root("append");
        let target = Target::nvidia_a100();
        let mut db = FileTileConfigDatabase::new(&root);
        db.add_config(&target, &bucket(32, 63), TileConfig::new(1, 32, 1), 1.0);
        db.commit().unwrap();

        let mut db = FileTileConfigDatabase::new(&root);
        db.add_config(&target, &bucket(64, 95), TileConfig::new(2, 32, 1), 1.0);
        db.commit().unwrap();

        let map = FileTileConfigDatabase::new(&root)
            .get_configs(&target, &bucket(32, 63).iter_space_type());
        assert_eq!(map.len(), 2);
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn test_non_finite_score_not_stored() {
        let root = temp_root("non_finite");
        let target = Target::nvidia_a100();
        let ist = bucket(32, 63).iter_space_type();
        let mut db = FileTileConfigDatabase::new(&root);
        db.add_config(&target, &bucket(32, 63), TileConfig::new(1, 32, 1), 3.0);
        db.add_config(&target, &bucket(64, 95), TileConfig::new(2, 32, 1), f64::INFINITY);
        db.add_config(&target, &bucket(96, 127), TileConfig::new(2, 32, 1), f64::NAN);
        db.commit().unwrap();

        let map = FileTileConfigDatabase::new(&root).get_configs(&target, &ist);
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(&bucket(32, 63).key()).unwrap().score, 3.0);

        // A later session appends instead of clobbering the partition.
        let mut db = FileTileConfigDatabase::new(&root);
        db.add_config(&target, &bucket(64, 95), TileConfig::new(4, 32, 1), 2.0);
        db.commit().unwrap();
        assert_eq!(FileTileConfigDatabase::new(&root).get_configs(&target, &ist).len(), 2);

        let mut naive = NaiveTileConfigDatabase::new();
        naive.add_config(&target, &bucket(32, 63), TileConfig::new(1, 32, 1), f64::INFINITY);
        assert!(naive.get_configs(&target, &ist).is_empty());
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn test_corrupt_file_reads_empty() {
        let root = temp_root("corrupt");
        let target = Target::nvidia_a100();
        let db = FileTileConfigDatabase::new(&root);
        let ist = bucket(32, 63).iter_space_type();
        let path = db.partition_path(&target.fingerprint(), &ist);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{ not json").unwrap();
        assert!(db.get_configs(&target, &ist).is_empty());
        // Missing partition is empty too.
        assert!(FileTileConfigDatabase::new(root.join("nowhere"))
            .get_configs(&target, &ist)
            .is_empty());
        let _ = std::fs::remove_dir_all(&root);
    }
}
