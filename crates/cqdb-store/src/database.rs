//! The database: one owner for the registry and the open cluster file.
//!
//! All cluster-level bookkeeping happens here: the indexed open/close/flush
//! protocol that keeps every cluster file prefixed with its predecessor's
//! index, the registry blob on disk, and the typed store/fetch/refer
//! operations the chronology builds on.
//!
//! The segment entry points are split into prepare / open / mark steps so
//! that a caller owning extra per-cluster state (the chronology and its
//! object dictionary) can interleave its own replay between the open and
//! the mark without callback indirection.

use std::collections::BTreeSet;
use std::io::SeekFrom;
use std::marker::PhantomData;

use cqdb_error::{CqError, Result};
use cqdb_io::{
    ensure_dir, read_varint, write_varint, CondVarint, Decode, Encode, FileStream, Stream,
};
use cqdb_types::{ContentHash, Id, UNKNOWN_ID};
use tracing::debug;

use crate::header::{Header, HEADER_VERSION};
use crate::object::{read_hash, write_hash, StoredObject};
use crate::registry::Registry;

/// Hard cap on the number of references in one unordered reference set;
/// the nibble-header encoding is not defined beyond it.
const MAX_REFERENCE_SET: usize = 65536;

/// Options for opening a database.
#[derive(Debug, Clone)]
pub struct DbOptions {
    pub path: std::path::PathBuf,
    pub prefix: String,
    pub cluster_size: u32,
    pub readonly: bool,
}

impl DbOptions {
    pub fn new(path: impl Into<std::path::PathBuf>, prefix: impl Into<String>) -> Self {
        DbOptions {
            path: path.into(),
            prefix: prefix.into(),
            cluster_size: 1024,
            readonly: false,
        }
    }

    #[must_use]
    pub fn cluster_size(mut self, cluster_size: u32) -> Self {
        self.cluster_size = cluster_size;
        self
    }

    #[must_use]
    pub fn readonly(mut self, readonly: bool) -> Self {
        self.readonly = readonly;
        self
    }
}

/// An open database handle.
///
/// Single writer; any number of independent read-only handles. Generic over
/// the content-hash primitive.
#[derive(Debug)]
pub struct Database<H: ContentHash> {
    registry: Registry,
    file: Option<FileStream>,
    readonly: bool,
    closed: bool,
    _hash: PhantomData<H>,
}

impl<H: ContentHash> Database<H> {
    /// Open (or create) the database directory and read the registry blob
    /// if one exists. No cluster is opened yet; call [`Database::load`].
    pub fn open(options: DbOptions) -> Result<Self> {
        ensure_dir(&options.path)?;
        let mut registry = Registry::new(
            options.path.clone(),
            options.prefix.clone(),
            options.cluster_size,
        );
        let registry_path = registry.registry_path();
        if FileStream::accessible(&registry_path) {
            let mut stream = FileStream::open(&registry_path, true, false)?;
            registry.load_from(&mut stream)?;
            if registry.cluster_size() != options.cluster_size {
                return Err(CqError::ClusterSizeMismatch {
                    expected: options.cluster_size,
                    actual: registry.cluster_size(),
                });
            }
            debug!(
                path = %options.path.display(),
                clusters = registry.clusters().len(),
                tip = registry.tip(),
                "registry loaded"
            );
        }
        Ok(Database {
            registry,
            file: None,
            readonly: options.readonly,
            closed: false,
            _hash: PhantomData,
        })
    }

    /// Open the most recent cluster and position at the end of its data
    /// (write mode) or at the start of its body (read-only mode).
    pub fn load(&mut self) -> Result<()> {
        if self.resume()? {
            self.seek_to_end()?;
        }
        Ok(())
    }

    /// Open the most recent cluster per the handle's mode.
    ///
    /// Returns `true` when the cluster already contains data that the
    /// caller must scan to find (and rebuild state up to) the tail; the
    /// stream is then positioned at the start of the data body.
    pub fn resume(&mut self) -> Result<bool> {
        let Some(last) = self.registry.cluster_last(!self.readonly) else {
            return Ok(false);
        };
        if self.readonly {
            self.open_cluster_for_read(last)?;
            Ok(false)
        } else {
            self.open_cluster_for_write(last)
        }
    }

    // -----------------------------------------------------------------
    // Indexed cluster protocol
    // -----------------------------------------------------------------

    /// Read cluster `c`'s forward index from the head of file `c+1`, or
    /// reset it when that file does not exist yet.
    fn read_or_clear_forward_index(&mut self, cluster: Id) -> Result<()> {
        let sidecar = self.registry.cluster_path(cluster + 1);
        if FileStream::accessible(&sidecar) {
            let mut stream = FileStream::open(&sidecar, true, false)?;
            let mut header = Header::decode(&mut stream)?;
            header.set_cluster(cluster + 1);
            self.registry.forward = header;
        } else {
            self.registry.clear_forward_index(cluster + 1);
        }
        Ok(())
    }

    /// Open `cluster` read-only: forward index from the successor file,
    /// back index from the file head. Position ends at the body start.
    pub fn open_cluster_for_read(&mut self, cluster: Id) -> Result<()> {
        self.close_cluster()?;
        self.read_or_clear_forward_index(cluster)?;
        let mut file = FileStream::open(self.registry.cluster_path(cluster), true, false)?;
        let mut back = Header::decode(&mut file)?;
        back.set_cluster(cluster);
        self.registry.back = back;
        self.registry.current_cluster = Some(cluster);
        debug!(cluster, pos = file.tell(), "cluster opened read-only");
        self.file = Some(file);
        Ok(())
    }

    /// Open `cluster` read-write.
    ///
    /// A fresh file gets an empty back index written at its head. An
    /// existing file has its back index read instead, and the method
    /// returns `true`: the caller must scan the data body to the tail
    /// (plain databases just [`Database::seek_to_end`]).
    pub fn open_cluster_for_write(&mut self, cluster: Id) -> Result<bool> {
        if self.readonly {
            return Err(CqError::ReadOnly);
        }
        self.close_cluster()?;
        self.read_or_clear_forward_index(cluster)?;
        let mut file = FileStream::open(self.registry.cluster_path(cluster), false, false)?;
        let scan = if file.is_empty()? {
            self.registry.back.reset(HEADER_VERSION, cluster);
            self.registry.back.encode(&mut file)?;
            false
        } else {
            let mut back = Header::decode(&mut file)?;
            back.set_cluster(cluster);
            self.registry.back = back;
            true
        };
        self.registry.current_cluster = Some(cluster);
        debug!(cluster, scan, pos = file.tell(), "cluster opened read-write");
        self.file = Some(file);
        Ok(scan)
    }

    /// Close the open cluster, publishing its forward index into the head
    /// of the successor file when the handle was writable.
    pub fn close_cluster(&mut self) -> Result<()> {
        let Some(file) = self.file.take() else {
            return Ok(());
        };
        let Some(cluster) = self.registry.current_cluster else {
            return Ok(());
        };
        if !file.readonly() {
            drop(file);
            self.write_forward_index(cluster)?;
            debug!(cluster, "cluster closed");
        }
        Ok(())
    }

    /// Publish the in-memory forward index of `cluster` into the head of
    /// file `cluster + 1`, creating that file if needed.
    fn write_forward_index(&mut self, cluster: Id) -> Result<()> {
        debug_assert_eq!(self.registry.forward.cluster(), cluster + 1);
        let sidecar = self.registry.cluster_path(cluster + 1);
        let mut stream = FileStream::open(&sidecar, false, false)?;
        self.registry.forward.encode(&mut stream)?;
        stream.flush()
    }

    /// Publish the forward index and flush the data file, so a reader
    /// opening the database afterwards observes everything up to the most
    /// recent segment.
    pub fn flush(&mut self) -> Result<()> {
        if self.readonly {
            return Err(CqError::ReadOnly);
        }
        let Some(cluster) = self.registry.current_cluster else {
            return Err(CqError::NotReady);
        };
        let file = self.file.as_mut().ok_or(CqError::NotReady)?;
        file.flush()?;
        let writable = !file.readonly();
        if writable {
            self.write_forward_index(cluster)?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------
    // Segments
    // -----------------------------------------------------------------

    /// Validate ordering, account for `segment` in the registry, and
    /// report the cluster to open: `Some` when the current file does not
    /// serve that cluster.
    pub fn begin_segment_prepare(&mut self, segment: Id) -> Result<Option<Id>> {
        if segment < self.registry.tip() {
            return Err(CqError::SegmentOrder {
                segment,
                tip: self.registry.tip(),
            });
        }
        let cluster = self.registry.prepare_cluster_for_segment(segment);
        if Some(cluster) != self.registry.current_cluster || self.file.is_none() {
            Ok(Some(cluster))
        } else {
            Ok(None)
        }
    }

    /// Open `cluster` for a segment transition, honoring the handle mode.
    ///
    /// Read-only handles (a reflection follower) open read-only and never
    /// need a scan; writable handles may. Position ends at the body start
    /// when a scan is pending, at the tail otherwise.
    pub fn open_cluster_for_segment(&mut self, cluster: Id) -> Result<bool> {
        if self.readonly {
            self.open_cluster_for_read(cluster)?;
            Ok(false)
        } else {
            self.open_cluster_for_write(cluster)
        }
    }

    /// Record `segment` at the current write position in the forward
    /// index; persist the registry when the transition demands it.
    pub fn mark_segment(&mut self, segment: Id, persist_registry: bool) -> Result<()> {
        let position = self.file.as_ref().ok_or(CqError::NotReady)?.tell();
        self.registry.forward.mark_segment(segment, position);
        debug!(segment, position, "segment marked");
        if persist_registry && !self.readonly {
            self.write_registry()?;
        }
        Ok(())
    }

    /// Begin a segment: transition clusters if needed, then record the
    /// segment at the write position.
    ///
    /// Segments must be non-decreasing; re-entering the tip is allowed.
    pub fn begin_segment(&mut self, segment: Id) -> Result<()> {
        match self.begin_segment_prepare(segment)? {
            Some(cluster) => {
                if self.open_cluster_for_segment(cluster)? {
                    self.seek_to_end()?;
                }
                self.mark_segment(segment, true)
            }
            None => self.mark_segment(segment, false),
        }
    }

    /// Account for a segment jump; `Some(cluster)` when a read-only open
    /// of another cluster is required first.
    pub fn goto_prepare(&mut self, segment: Id) -> Option<Id> {
        let cluster = self.registry.prepare_cluster_for_segment(segment);
        (Some(cluster) != self.registry.current_cluster || self.file.is_none()).then_some(cluster)
    }

    /// Position on a recorded segment.
    ///
    /// An unrecorded segment falls back to the first recorded segment of
    /// the cluster (use [`Header::has_segment`] on the forward index to
    /// detect this); an entirely empty initial cluster returns with the
    /// position untouched.
    pub fn seek_to_segment(&mut self, segment: Id) -> Result<()> {
        let forward = &self.registry.forward;
        if segment == 0 && forward.segment_count() == 0 {
            return Ok(());
        }
        let position = match forward.segment_position(segment) {
            Some(position) => position,
            None => forward
                .first_segment()
                .and_then(|first| forward.segment_position(first))
                .unwrap_or(0),
        };
        self.seek(position)
    }

    /// Seek to the recorded position of `segment`, opening its cluster
    /// read-only if it is not the current one.
    pub fn goto_segment(&mut self, segment: Id) -> Result<()> {
        if let Some(cluster) = self.goto_prepare(segment) {
            self.open_cluster_for_read(cluster)?;
        }
        self.seek_to_segment(segment)
    }

    /// Seek back to the first cluster's data.
    pub fn rewind(&mut self) -> Result<()> {
        let Some(first) = self.registry.clusters().first() else {
            return Ok(());
        };
        self.goto_segment(first * Id::from(self.registry.cluster_size()))
    }

    fn write_registry(&mut self) -> Result<()> {
        let path = self.registry.registry_path();
        let mut stream = FileStream::open(&path, false, true)?;
        self.registry.encode(&mut stream)?;
        stream.flush()?;
        debug!(
            clusters = self.registry.clusters().len(),
            tip = self.registry.tip(),
            "registry persisted"
        );
        Ok(())
    }

    // -----------------------------------------------------------------
    // Object store
    // -----------------------------------------------------------------

    /// Write an object's body at the tail; the pre-write offset becomes
    /// its sid.
    pub fn store<T: StoredObject<H>>(&mut self, object: &mut T) -> Result<Id> {
        if self.readonly {
            return Err(CqError::ReadOnly);
        }
        let file = self.file.as_mut().ok_or(CqError::NotReady)?;
        if file.readonly() {
            return Err(CqError::ReadOnly);
        }
        let sid = file.tell();
        object.encode_body(file)?;
        object.set_sid(sid);
        Ok(sid)
    }

    /// Read an object's body at the current position; its sid is the
    /// pre-read offset.
    pub fn load_object<T: StoredObject<H>>(&mut self) -> Result<T> {
        let file = self.file.as_mut().ok_or(CqError::NotReady)?;
        let sid = file.tell();
        let mut object = T::decode_body(file)?;
        object.set_sid(sid);
        Ok(object)
    }

    /// Read the object at `sid`, restoring the stream position afterwards.
    pub fn fetch<T: StoredObject<H>>(&mut self, sid: Id) -> Result<T> {
        let file = self.file.as_mut().ok_or(CqError::NotReady)?;
        let saved = file.tell();
        if saved != sid {
            file.seek(SeekFrom::Start(sid))?;
        }
        let mut object = T::decode_body(file)?;
        if file.tell() != saved {
            file.seek(SeekFrom::Start(saved))?;
        }
        object.set_sid(sid);
        Ok(object)
    }

    // -----------------------------------------------------------------
    // References
    // -----------------------------------------------------------------

    /// Write a backpointer to `sid` as the distance from the current
    /// position.
    pub fn refer_sid(&mut self, sid: Id) -> Result<()> {
        if self.readonly {
            return Err(CqError::ReadOnly);
        }
        let file = self.file.as_mut().ok_or(CqError::NotReady)?;
        let offset = file.tell();
        if sid >= offset {
            return Err(CqError::ReferenceOrder { sid, offset });
        }
        write_varint(file, offset - sid)?;
        Ok(())
    }

    /// Write a backpointer to a known object.
    pub fn refer<T: StoredObject<H>>(&mut self, object: &T) -> Result<()> {
        debug_assert_ne!(object.sid(), UNKNOWN_ID);
        self.refer_sid(object.sid())
    }

    /// Read a backpointer; the referent's sid is the pre-read position
    /// minus the stored delta.
    pub fn derefer(&mut self) -> Result<Id> {
        let file = self.file.as_mut().ok_or(CqError::NotReady)?;
        let offset = file.tell();
        let delta = read_varint(file)?;
        offset
            .checked_sub(delta)
            .ok_or_else(|| CqError::corrupt("backpointer past start of cluster"))
    }

    /// Write a reference to an unknown object as its raw hash.
    pub fn refer_hash(&mut self, hash: &H) -> Result<()> {
        if self.readonly {
            return Err(CqError::ReadOnly);
        }
        let file = self.file.as_mut().ok_or(CqError::NotReady)?;
        write_hash(file, hash)
    }

    /// Read a raw-hash reference.
    pub fn derefer_hash(&mut self) -> Result<H> {
        let file = self.file.as_mut().ok_or(CqError::NotReady)?;
        read_hash(file)
    }

    /// Write an unordered set of references.
    ///
    /// One header byte carries the known count (low nibble) and unknown
    /// count (high nibble) as 4-bit conditional varints, followed by their
    /// overflow varints, the known backpointers (all relative to the single
    /// refpoint right after the counts), then the unknown raw hashes.
    pub fn refer_set<T: StoredObject<H>>(&mut self, objects: &[&T]) -> Result<()> {
        if self.readonly {
            return Err(CqError::ReadOnly);
        }
        assert!(
            objects.len() < MAX_REFERENCE_SET,
            "reference sets are capped below {MAX_REFERENCE_SET} entries"
        );
        let known: Vec<&&T> = objects.iter().filter(|t| t.sid() != UNKNOWN_ID).collect();
        let known_count = CondVarint::<4>(known.len() as u64);
        let unknown_count = CondVarint::<4>((objects.len() - known.len()) as u64);

        let file = self.file.as_mut().ok_or(CqError::NotReady)?;
        file.write_u8(known_count.field() | (unknown_count.field() << 4))?;
        known_count.write_tail(file)?;
        unknown_count.write_tail(file)?;

        let refpoint = file.tell();
        for object in &known {
            debug_assert!(object.sid() < refpoint);
            write_varint(file, refpoint - object.sid())?;
        }
        for object in objects {
            if object.sid() == UNKNOWN_ID {
                write_hash(file, object.hash())?;
            }
        }
        Ok(())
    }

    /// Read an unordered reference set: known sids and unknown hashes.
    pub fn derefer_set(&mut self) -> Result<(BTreeSet<Id>, BTreeSet<H>)> {
        let file = self.file.as_mut().ok_or(CqError::NotReady)?;
        let header = file.read_u8()?;
        let known_count = CondVarint::<4>::read(header & 0x0f, file)?.value();
        let unknown_count = CondVarint::<4>::read(header >> 4, file)?.value();

        let refpoint = file.tell();
        let mut known = BTreeSet::new();
        for _ in 0..known_count {
            let delta = read_varint(file)?;
            known.insert(
                refpoint
                    .checked_sub(delta)
                    .ok_or_else(|| CqError::corrupt("backpointer past start of cluster"))?,
            );
        }
        let mut unknown = BTreeSet::new();
        for _ in 0..unknown_count {
            unknown.insert(read_hash(file)?);
        }
        Ok((known, unknown))
    }

    // -----------------------------------------------------------------
    // Stream access
    // -----------------------------------------------------------------

    /// The open cluster's stream.
    pub fn stream(&mut self) -> Result<&mut FileStream> {
        self.file.as_mut().ok_or(CqError::NotReady)
    }

    /// Whether a cluster is open.
    #[must_use]
    pub fn has_file(&self) -> bool {
        self.file.is_some()
    }

    /// Current position in the open cluster, 0 when none is open.
    #[must_use]
    pub fn tell(&self) -> u64 {
        self.file.as_ref().map_or(0, FileStream::tell)
    }

    pub fn seek(&mut self, position: u64) -> Result<()> {
        let file = self.file.as_mut().ok_or(CqError::NotReady)?;
        file.seek(SeekFrom::Start(position))?;
        Ok(())
    }

    pub fn seek_to_end(&mut self) -> Result<()> {
        let file = self.file.as_mut().ok_or(CqError::NotReady)?;
        file.seek(SeekFrom::End(0))?;
        Ok(())
    }

    /// Whether the open file's cursor is at its end (no cluster roll).
    pub fn file_at_end(&mut self) -> Result<bool> {
        match self.file.as_mut() {
            Some(file) => file.eof(),
            None => Ok(true),
        }
    }

    /// Whether the open file handle is read-only (true when none is open).
    #[must_use]
    pub fn file_readonly(&self) -> bool {
        self.file.as_ref().map_or(true, FileStream::readonly)
    }

    /// Advance a read position into the next registered cluster, if any.
    pub fn advance_cluster(&mut self) -> Result<bool> {
        let Some(current) = self.registry.current_cluster else {
            return Ok(false);
        };
        match self.registry.cluster_next(current) {
            Some(next) => {
                self.open_cluster_for_read(next)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// End-of-data check that rolls read handles forward across cluster
    /// boundaries.
    pub fn eof(&mut self) -> Result<bool> {
        loop {
            let Some(file) = self.file.as_mut() else {
                return Ok(true);
            };
            if !file.eof()? {
                return Ok(false);
            }
            if !file.readonly() {
                return Ok(true);
            }
            if !self.advance_cluster()? {
                return Ok(true);
            }
        }
    }

    /// Reopen the underlying file handle so a read handle observes bytes
    /// appended by a concurrent writer.
    pub fn refresh_tail(&mut self) -> Result<()> {
        if let Some(file) = self.file.as_mut() {
            file.refresh_tail()?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------
    // Accessors and shutdown
    // -----------------------------------------------------------------

    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Take over another handle's registry state (reflection alignment).
    pub fn adopt_registry(&mut self, other: &Registry) {
        self.registry.adopt(other);
    }

    #[must_use]
    pub fn cluster(&self) -> Option<Id> {
        self.registry.current_cluster
    }

    #[must_use]
    pub fn forward_index(&self) -> &Header {
        &self.registry.forward
    }

    #[must_use]
    pub fn back_index(&self) -> &Header {
        &self.registry.back
    }

    #[must_use]
    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    /// The cluster a segment maps to.
    #[must_use]
    pub fn cluster_of(&self, segment: Id) -> Id {
        self.registry.cluster_of(segment)
    }

    fn shutdown(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if !self.readonly {
            self.write_registry()?;
        }
        self.close_cluster()
    }

    /// Persist the registry and close the open cluster.
    pub fn close(mut self) -> Result<()> {
        self.shutdown()
    }
}

impl<H: ContentHash> Drop for Database<H> {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}
