//! The segment registry.
//!
//! The registry is the database's durable root: which clusters exist, the
//! cluster size chosen at creation, and the tip (greatest segment id ever
//! begun). It also owns the forward and back index headers for the cluster
//! that is currently open.
//!
//! Persisted layout (`cq.registry`):
//! ```text
//! u32 (LE)   cluster size
//! id set     existing cluster ids (delta-encoded)
//! varint     tip, relative to cluster_size * max(clusters)
//! ```

use std::path::{Path, PathBuf};

use cqdb_error::{CqError, Result};
use cqdb_io::{read_varint, write_varint, Decode, Encode, IdSet, Stream};
use cqdb_types::Id;

use crate::header::{Header, HEADER_VERSION};

/// File name of the registry blob inside the database directory.
pub const REGISTRY_FILE: &str = "cq.registry";

/// Durable cluster bookkeeping plus the open cluster's index headers.
#[derive(Debug, Clone)]
pub struct Registry {
    dbpath: PathBuf,
    prefix: String,
    cluster_size: u32,
    clusters: IdSet,
    tip: Id,
    pub(crate) forward: Header,
    pub(crate) back: Header,
    pub(crate) current_cluster: Option<Id>,
}

impl Registry {
    pub fn new(dbpath: impl Into<PathBuf>, prefix: impl Into<String>, cluster_size: u32) -> Self {
        Registry {
            dbpath: dbpath.into(),
            prefix: prefix.into(),
            cluster_size,
            clusters: IdSet::new(),
            tip: 0,
            forward: Header::default(),
            back: Header::default(),
            current_cluster: None,
        }
    }

    /// The cluster a segment belongs to. Pure; no bookkeeping.
    #[must_use]
    pub fn cluster_of(&self, segment: Id) -> Id {
        segment / Id::from(self.cluster_size)
    }

    /// Account for a segment about to be begun or sought: registers its
    /// cluster when the segment advances the tip, and returns the cluster.
    pub fn prepare_cluster_for_segment(&mut self, segment: Id) -> Id {
        let cluster = self.cluster_of(segment);
        if segment > self.tip {
            if self.clusters.is_empty() || cluster > self.cluster_of(self.tip) {
                self.clusters.insert(cluster);
            }
            self.tip = segment;
        }
        cluster
    }

    /// Smallest registered cluster strictly after `cluster`.
    #[must_use]
    pub fn cluster_next(&self, cluster: Id) -> Option<Id> {
        self.clusters.next_after(cluster)
    }

    /// Greatest registered cluster. In write mode an empty registry is
    /// seeded with cluster 0.
    pub fn cluster_last(&mut self, open_for_writing: bool) -> Option<Id> {
        match self.clusters.last() {
            Some(last) => Some(last),
            None if open_for_writing => {
                self.clusters.insert(0);
                Some(0)
            }
            None => None,
        }
    }

    /// Path of a cluster's file: `<dbpath>/<prefix>NNNNN.cq`.
    #[must_use]
    pub fn cluster_path(&self, cluster: Id) -> PathBuf {
        self.dbpath
            .join(format!("{}{:05}.cq", self.prefix, cluster))
    }

    /// Path of the registry blob.
    #[must_use]
    pub fn registry_path(&self) -> PathBuf {
        self.dbpath.join(REGISTRY_FILE)
    }

    #[must_use]
    pub fn dbpath(&self) -> &Path {
        &self.dbpath
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    #[must_use]
    pub fn cluster_size(&self) -> u32 {
        self.cluster_size
    }

    #[must_use]
    pub fn tip(&self) -> Id {
        self.tip
    }

    #[must_use]
    pub fn clusters(&self) -> &IdSet {
        &self.clusters
    }

    #[must_use]
    pub fn forward_index(&self) -> &Header {
        &self.forward
    }

    #[must_use]
    pub fn back_index(&self) -> &Header {
        &self.back
    }

    #[must_use]
    pub fn current_cluster(&self) -> Option<Id> {
        self.current_cluster
    }

    /// Take over another registry's durable state and open headers.
    ///
    /// Path, prefix and cluster size must agree; used by the reflection
    /// checker to align a read-only handle with its writer.
    pub fn adopt(&mut self, other: &Registry) {
        debug_assert_eq!(self.dbpath, other.dbpath);
        debug_assert_eq!(self.prefix, other.prefix);
        debug_assert_eq!(self.cluster_size, other.cluster_size);
        self.clusters = other.clusters.clone();
        self.tip = other.tip;
        self.forward.adopt(&other.forward);
        self.back.adopt(&other.back);
        self.current_cluster = other.current_cluster;
    }

    /// Reset the forward index for a freshly allocated sidecar file.
    pub(crate) fn clear_forward_index(&mut self, cluster: Id) {
        self.forward.reset(HEADER_VERSION, cluster);
    }
}

/// Durable-state equality: cluster size, cluster set and tip.
impl PartialEq for Registry {
    fn eq(&self, other: &Self) -> bool {
        self.cluster_size == other.cluster_size
            && self.clusters == other.clusters
            && self.tip == other.tip
    }
}

impl Eq for Registry {}

impl Encode for Registry {
    fn encode<S: Stream + ?Sized>(&self, stream: &mut S) -> Result<()> {
        stream.write_u32_le(self.cluster_size)?;
        self.clusters.encode(stream)?;
        let base = Id::from(self.cluster_size) * self.clusters.last().unwrap_or(0);
        debug_assert!(self.tip >= base);
        write_varint(stream, self.tip - base)?;
        Ok(())
    }
}

impl Registry {
    /// Read durable state from `stream` into this registry, keeping path
    /// and prefix. The caller validates the cluster size against its own
    /// expectations.
    pub fn load_from<S: Stream + ?Sized>(&mut self, stream: &mut S) -> Result<()> {
        self.cluster_size = stream.read_u32_le()?;
        if self.cluster_size == 0 {
            return Err(CqError::corrupt("registry cluster size is zero"));
        }
        self.clusters = IdSet::decode(stream)?;
        let base = Id::from(self.cluster_size) * self.clusters.last().unwrap_or(0);
        self.tip = read_varint(stream)?
            .checked_add(base)
            .ok_or_else(|| CqError::corrupt("registry tip overflow"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cqdb_io::{encoded_len, MemoryStream};
    use std::io::SeekFrom;

    fn round_trip(registry: &Registry) -> Registry {
        let mut stream = MemoryStream::new();
        registry.encode(&mut stream).unwrap();
        stream.seek(SeekFrom::Start(0)).unwrap();
        let mut back = Registry::new("/tmp/cq-reg", "reg", 1024);
        back.load_from(&mut stream).unwrap();
        back
    }

    #[test]
    fn empty_registry_is_six_bytes() {
        let registry = Registry::new("/tmp/cq-reg", "reg", 2016);
        assert_eq!(registry.clusters().len(), 0);
        // cluster size (4) + set size (1) + tip (1)
        assert_eq!(encoded_len(&registry).unwrap(), 6);
        assert_eq!(round_trip(&registry), registry);
    }

    #[test]
    fn one_entry_is_seven_bytes() {
        let mut registry = Registry::new("/tmp/cq-reg", "reg", 2016);
        registry.prepare_cluster_for_segment(2016);
        assert_eq!(registry.clusters().len(), 1);
        assert_eq!(encoded_len(&registry).unwrap(), 7);
        assert_eq!(round_trip(&registry), registry);
    }

    #[test]
    fn two_entries_encode_relative() {
        let mut registry = Registry::new("/tmp/cq-reg", "reg", 2016);
        registry.prepare_cluster_for_segment(2016);
        registry.prepare_cluster_for_segment(128 * 2016);
        assert_eq!(registry.cluster_next(1), Some(128));
        assert_eq!(registry.clusters().len(), 2);
        // The second cluster id is 128 but stored relative to the first, so
        // the whole blob still fits in single-byte deltas.
        assert_eq!(encoded_len(&registry).unwrap(), 8);
        assert_eq!(round_trip(&registry), registry);
    }

    #[test]
    fn preparing_clusters_for_segments() {
        let mut registry = Registry::new("/tmp/cq-reg", "reg", 2016);
        assert_eq!(registry.prepare_cluster_for_segment(2015), 0);
        assert_eq!(registry.clusters().len(), 1);
        assert_eq!(registry.prepare_cluster_for_segment(2016), 1);
        assert_eq!(registry.clusters().len(), 2);
        assert_eq!(registry.tip(), 2016);
        // Tip is stored relative to cluster_size * max(clusters), so this
        // registry still costs 8 bytes.
        assert_eq!(encoded_len(&registry).unwrap(), 8);
        assert_eq!(round_trip(&registry), registry);
    }

    #[test]
    fn re_entering_the_tip_changes_nothing() {
        let mut registry = Registry::new("/tmp/cq-reg", "reg", 1024);
        registry.prepare_cluster_for_segment(5);
        let tip = registry.tip();
        let clusters = registry.clusters().len();
        assert_eq!(registry.prepare_cluster_for_segment(5), 0);
        assert_eq!(registry.tip(), tip);
        assert_eq!(registry.clusters().len(), clusters);
    }

    #[test]
    fn cluster_next_skips_gaps() {
        let mut registry = Registry::new("/tmp/cq-reg", "reg", 1024);
        registry.prepare_cluster_for_segment(1);
        registry.prepare_cluster_for_segment(500_000);
        let far = registry.cluster_of(500_000);
        assert_eq!(registry.cluster_next(0), Some(far));
        assert_eq!(registry.cluster_next(far), None);
    }

    #[test]
    fn cluster_last_seeds_zero_for_writers() {
        let mut registry = Registry::new("/tmp/cq-reg", "reg", 1024);
        assert_eq!(registry.cluster_last(false), None);
        assert!(registry.clusters().is_empty());
        assert_eq!(registry.cluster_last(true), Some(0));
        assert!(registry.clusters().contains(0));
    }

    #[test]
    fn cluster_paths_are_zero_padded() {
        let registry = Registry::new("/db", "cluster", 1024);
        assert_eq!(
            registry.cluster_path(1),
            PathBuf::from("/db/cluster00001.cq")
        );
        assert_eq!(
            registry.cluster_path(123_456),
            PathBuf::from("/db/cluster123456.cq")
        );
    }

    #[test]
    fn zero_cluster_size_is_corrupt() {
        let mut stream = MemoryStream::new();
        stream.write_u32_le(0).unwrap();
        stream.seek(SeekFrom::Start(0)).unwrap();
        let mut registry = Registry::new("/tmp/cq-reg", "reg", 1024);
        assert!(matches!(
            registry.load_from(&mut stream),
            Err(CqError::Corrupt { .. })
        ));
    }
}
