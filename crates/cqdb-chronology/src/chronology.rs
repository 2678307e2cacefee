//! The event-log layer.
//!
//! A chronology wraps a [`Database`] and maintains two in-memory maps while
//! a cluster is open: `dictionary` (sid → owned object record) and
//! `references` (hash → sid). Objects stored through [`Chronology::push_event_subject`]
//! with `refer_only = false` enter both maps; later events referencing them
//! compress into backpointers. Both maps and the current time reset whenever
//! the open cluster changes, so no backpointer or time delta ever crosses a
//! cluster boundary.

use std::collections::{BTreeMap, BTreeSet};
use std::marker::PhantomData;

use cqdb_error::{CqError, Result};
use cqdb_io::{write_varint, Stream};
use cqdb_store::{Database, DbOptions, StoredObject};
use cqdb_types::{ContentHash, Id};
use tracing::{debug, warn};

use crate::compress::{
    compress_reference, compress_references, decompress_reference, decompress_references,
    RefResolver,
};
use crate::event::{pack_event_header, unpack_event_header, CMD_MASK};
use crate::time::{decode_time, encode_time};

/// Application-defined event replay.
///
/// Payload layout is owned by the application's command set, so rebuilding
/// in-memory state from the data body (on resume, and in the reflection
/// checker) needs the application to consume each event's payload. After
/// `pop_event` yields `(cmd, known)`, the implementation must read exactly
/// the payload of `cmd` using the `pop_*` family.
pub trait Replayer<H: ContentHash, T: StoredObject<H>>: Sized {
    fn replay_event(chronology: &mut Chronology<H, T, Self>, cmd: u8, known: bool) -> Result<()>;
}

/// The event log over a database.
pub struct Chronology<H: ContentHash, T: StoredObject<H>, R: Replayer<H, T>> {
    db: Database<H>,
    current_time: u64,
    dictionary: BTreeMap<Id, T>,
    references: BTreeMap<H, Id>,
    reflection: Option<Box<Chronology<H, T, R>>>,
    _replay: PhantomData<R>,
}

impl<H: ContentHash, T: StoredObject<H>, R: Replayer<H, T>> Chronology<H, T, R> {
    pub fn open(options: DbOptions) -> Result<Self> {
        Ok(Chronology {
            db: Database::open(options)?,
            current_time: 0,
            dictionary: BTreeMap::new(),
            references: BTreeMap::new(),
            reflection: None,
            _replay: PhantomData,
        })
    }

    /// Open the most recent cluster and replay its data body to the tail,
    /// rebuilding the dictionary.
    pub fn load(&mut self) -> Result<()> {
        if self.db.resume()? {
            self.replay_to_end()?;
        }
        Ok(())
    }

    /// Replay events from the current position until no more parse.
    ///
    /// A torn record at the tail parses as "no event" and leaves the
    /// position at the last record boundary, so subsequent writes
    /// implicitly truncate it.
    pub fn replay_to_end(&mut self) -> Result<()> {
        while let Some((cmd, known)) = self.pop_event()? {
            R::replay_event(self, cmd, known)?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------
    // Segments
    // -----------------------------------------------------------------

    /// Purge per-cluster state when `segment` lives in another cluster.
    fn reset_for_cluster_of(&mut self, segment: Id) {
        if Some(self.db.cluster_of(segment)) != self.db.cluster() {
            self.purge();
        }
    }

    fn purge(&mut self) {
        // Per-cluster state only: backpointers and time deltas never cross
        // cluster boundaries.
        self.dictionary.clear();
        self.references.clear();
        self.current_time = 0;
    }

    /// Begin a segment, transitioning clusters when needed.
    ///
    /// On a transition the object dictionary is purged and the clock
    /// resets, then any existing data in the target cluster is replayed.
    pub fn begin_segment(&mut self, segment: Id) -> Result<()> {
        self.reset_for_cluster_of(segment);
        match self.db.begin_segment_prepare(segment)? {
            Some(cluster) => {
                if self.db.open_cluster_for_segment(cluster)? {
                    self.replay_to_end()?;
                }
                self.db.mark_segment(segment, true)?;
            }
            None => self.db.mark_segment(segment, false)?,
        }
        if let Some(mut reflection) = self.reflection.take() {
            let outcome = self
                .db
                .flush()
                .and_then(|()| reflection.begin_segment(segment));
            self.reflection = Some(reflection);
            outcome?;
        }
        Ok(())
    }

    /// Seek to a recorded segment for reading.
    ///
    /// Jumping into another cluster purges the dictionary and resets the
    /// clock to 0; timestamps popped after such a jump are deltas from the
    /// cluster's first event, not absolute times, unless the target
    /// segment starts the cluster.
    pub fn goto_segment(&mut self, segment: Id) -> Result<()> {
        self.reset_for_cluster_of(segment);
        self.db.goto_segment(segment)
    }

    /// Seek back to the start of the data.
    pub fn rewind(&mut self) -> Result<()> {
        let Some(first) = self.db.registry().clusters().first() else {
            return Ok(());
        };
        self.goto_segment(first * Id::from(self.db.registry().cluster_size()))
    }

    pub fn flush(&mut self) -> Result<()> {
        self.db.flush()
    }

    // -----------------------------------------------------------------
    // Writing
    // -----------------------------------------------------------------

    fn write_event_header(&mut self, timestamp: u64, cmd: u8, known: bool) -> Result<()> {
        debug_assert_eq!(cmd & CMD_MASK, cmd, "command exceeds 5 bits");
        if timestamp < self.current_time {
            return Err(CqError::TimeOrder {
                timestamp,
                current: self.current_time,
            });
        }
        let (code, extra) = encode_time(self.current_time, timestamp);
        let stream = self.db.stream()?;
        stream.write_u8(pack_event_header(cmd, known, code))?;
        if let Some(extra) = extra {
            write_varint(stream, extra)?;
        }
        self.current_time = timestamp;
        Ok(())
    }

    /// Append an event with no payload.
    pub fn push_event(&mut self, timestamp: u64, cmd: u8) -> Result<()> {
        self.write_event_header(timestamp, cmd, false)
    }

    /// Append an event about one subject.
    ///
    /// A subject already known to this cluster is written as a
    /// backpointer. An unknown subject is written as its raw hash when
    /// `refer_only`, and otherwise stored in full: its body enters the
    /// cluster, its sid is assigned, and it becomes known.
    pub fn push_event_subject(
        &mut self,
        timestamp: u64,
        cmd: u8,
        subject: &mut T,
        refer_only: bool,
    ) -> Result<()> {
        let known_sid = self.references.get(subject.hash()).copied();
        self.write_event_header(timestamp, cmd, known_sid.is_some())?;
        match known_sid {
            Some(sid) => self.db.refer_sid(sid)?,
            None if refer_only => self.db.refer_hash(subject.hash())?,
            None => {
                let sid = self.db.store(subject)?;
                self.dictionary.insert(sid, subject.clone());
                self.references.insert(subject.hash().clone(), sid);
                debug!(sid, "object stored");
            }
        }
        Ok(())
    }

    /// Append an event about an unordered set of subjects.
    ///
    /// Hashes known to this cluster are upgraded to backpointers; the rest
    /// are written raw. The header's known bit is unused for set events
    /// and written as zero.
    pub fn push_event_set(
        &mut self,
        timestamp: u64,
        cmd: u8,
        subjects: &BTreeSet<H>,
    ) -> Result<()> {
        self.write_event_header(timestamp, cmd, false)?;
        let objects: Vec<T> = subjects
            .iter()
            .map(|hash| {
                let mut object = T::from_hash(hash.clone());
                if let Some(&sid) = self.references.get(hash) {
                    object.set_sid(sid);
                }
                object
            })
            .collect();
        let refs: Vec<&T> = objects.iter().collect();
        self.db.refer_set(&refs)
    }

    // -----------------------------------------------------------------
    // Reading
    // -----------------------------------------------------------------

    fn pop_next(&mut self, peeking: bool) -> Result<Option<(u8, bool, u64)>> {
        if !self.db.has_file() {
            return Ok(None);
        }
        // Cluster boundaries are transparent on the read path.
        while self.db.file_readonly() && self.db.file_at_end()? {
            if !self.advance_cluster()? {
                return Ok(None);
            }
        }
        let position = self.db.tell();
        let header = (|| -> Result<(u8, bool, u64)> {
            let stream = self.db.stream()?;
            let (cmd, known, code) = unpack_event_header(stream.read_u8()?);
            let time = decode_time(self.current_time, code, stream)?;
            Ok((cmd, known, time))
        })();
        match header {
            Ok(parsed) => {
                if peeking {
                    self.db.seek(position)?;
                }
                Ok(Some(parsed))
            }
            Err(CqError::EndOfStream) | Err(CqError::Corrupt { .. }) => {
                // Torn or absent record: back to the boundary.
                self.db.seek(position)?;
                Ok(None)
            }
            Err(other) => Err(other),
        }
    }

    fn advance_cluster(&mut self) -> Result<bool> {
        if self.db.advance_cluster()? {
            self.purge();
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Read the next event header, advancing the clock.
    ///
    /// Returns `None` at the end of the log (including an exhausted final
    /// cluster).
    pub fn pop_event(&mut self) -> Result<Option<(u8, bool)>> {
        match self.pop_next(false)? {
            Some((cmd, known, time)) => {
                self.current_time = time;
                Ok(Some((cmd, known)))
            }
            None => Ok(None),
        }
    }

    /// Decode the next event's timestamp without consuming it.
    pub fn peek_time(&mut self) -> Result<Option<u64>> {
        Ok(self.pop_next(true)?.map(|(_, _, time)| time))
    }

    /// Read an object body at the current position and make it known.
    pub fn pop_object(&mut self) -> Result<T> {
        let object: T = self.db.load_object()?;
        self.dictionary.insert(object.sid(), object.clone());
        self.references.insert(object.hash().clone(), object.sid());
        Ok(object)
    }

    /// Read a backpointer to a known object.
    pub fn pop_reference(&mut self) -> Result<Id> {
        self.db.derefer()
    }

    /// Read a raw-hash reference to an unknown object.
    pub fn pop_reference_hash(&mut self) -> Result<H> {
        self.db.derefer_hash()
    }

    /// Read an unordered reference set into known sids and unknown hashes.
    pub fn pop_references(&mut self) -> Result<(BTreeSet<Id>, BTreeSet<H>)> {
        self.db.derefer_set()
    }

    /// Read an unordered reference set, resolving known sids through the
    /// dictionary, into one mixed hash set.
    pub fn pop_reference_hashes(&mut self) -> Result<BTreeSet<H>> {
        let (known, mut mixed) = self.db.derefer_set()?;
        for sid in known {
            match self.dictionary.get(&sid) {
                Some(object) => {
                    mixed.insert(object.hash().clone());
                }
                None => {
                    warn!(sid, "reference to sid missing from dictionary");
                    return Err(CqError::corrupt(format!(
                        "reference to unknown sid {sid}"
                    )));
                }
            }
        }
        Ok(mixed)
    }

    /// Write a reference vector with backpointer compression over the
    /// current dictionary.
    pub fn compress(&mut self, references: &[H]) -> Result<()> {
        let Chronology {
            db,
            dictionary,
            references: refs,
            ..
        } = self;
        let resolver = MapResolver {
            dictionary,
            references: refs,
        };
        compress_references(db.stream()?, Some(&resolver), references)
    }

    /// Read a reference vector written by [`Chronology::compress`].
    pub fn decompress(&mut self) -> Result<Vec<H>> {
        let Chronology {
            db,
            dictionary,
            references: refs,
            ..
        } = self;
        let resolver = MapResolver {
            dictionary,
            references: refs,
        };
        decompress_references(db.stream()?, Some(&resolver))
    }

    /// Write a single reference with backpointer compression over the
    /// current dictionary.
    pub fn compress_single(&mut self, reference: &H) -> Result<()> {
        let Chronology {
            db,
            dictionary,
            references: refs,
            ..
        } = self;
        let resolver = MapResolver {
            dictionary,
            references: refs,
        };
        compress_reference(db.stream()?, Some(&resolver), reference)
    }

    /// Read a single reference written by [`Chronology::compress_single`].
    pub fn decompress_single(&mut self) -> Result<H> {
        let Chronology {
            db,
            dictionary,
            references: refs,
            ..
        } = self;
        let resolver = MapResolver {
            dictionary,
            references: refs,
        };
        decompress_reference(db.stream()?, Some(&resolver))
    }

    // -----------------------------------------------------------------
    // State access
    // -----------------------------------------------------------------

    #[must_use]
    pub fn current_time(&self) -> u64 {
        self.current_time
    }

    /// Reset the clock, e.g. after manually seeking to a known position.
    pub fn set_current_time(&mut self, time: u64) {
        self.current_time = time;
    }

    /// The owned record for `hash`, when known in this cluster.
    #[must_use]
    pub fn object_for(&self, hash: &H) -> Option<&T> {
        self.references
            .get(hash)
            .and_then(|sid| self.dictionary.get(sid))
    }

    #[must_use]
    pub fn dictionary(&self) -> &BTreeMap<Id, T> {
        &self.dictionary
    }

    #[must_use]
    pub fn references(&self) -> &BTreeMap<H, Id> {
        &self.references
    }

    pub fn db(&self) -> &Database<H> {
        &self.db
    }

    pub fn db_mut(&mut self) -> &mut Database<H> {
        &mut self.db
    }

    // -----------------------------------------------------------------
    // Reflection
    // -----------------------------------------------------------------

    /// Attach a read-only chronology that replays this writer's output in
    /// lock step. [`Chronology::period`] drives it and verifies equality.
    pub fn enable_reflection(&mut self, mut reflection: Box<Self>) -> Result<()> {
        if !reflection.db.is_readonly() {
            return Err(CqError::ReflectionMismatch {
                detail: "reflection handle must be read-only".into(),
            });
        }
        if reflection.db.registry().dbpath() != self.db.registry().dbpath()
            || reflection.db.registry().prefix() != self.db.registry().prefix()
            || reflection.db.registry().cluster_size() != self.db.registry().cluster_size()
        {
            return Err(CqError::ReflectionMismatch {
                detail: "reflection handle must share path, prefix and cluster size".into(),
            });
        }
        if !self.db.has_file() {
            self.load()?;
        }
        self.flush()?;
        reflection.db.adopt_registry(self.db.registry());
        reflection.load()?;
        self.reflection = Some(reflection);
        Ok(())
    }

    /// Flush, let the reflection catch up over the newly appended bytes,
    /// and verify the two states agree.
    pub fn period(&mut self) -> Result<()> {
        let Some(mut reflection) = self.reflection.take() else {
            return Ok(());
        };
        let outcome = self.db.flush().and_then(|()| {
            reflection.db.refresh_tail()?;
            reflection.replay_to_end()
        });
        let verdict = outcome.and_then(|()| match self.diff_state(&reflection) {
            None => Ok(()),
            Some(detail) => Err(CqError::ReflectionMismatch { detail }),
        });
        self.reflection = Some(reflection);
        verdict
    }

    /// First difference between this chronology's state and another's.
    fn diff_state(&self, other: &Self) -> Option<String> {
        if self.current_time != other.current_time {
            return Some(format!(
                "current_time {} != {}",
                self.current_time, other.current_time
            ));
        }
        if self.dictionary.len() != other.dictionary.len() {
            return Some(format!(
                "dictionary sizes {} != {}",
                self.dictionary.len(),
                other.dictionary.len()
            ));
        }
        for ((sid_a, object_a), (sid_b, object_b)) in
            self.dictionary.iter().zip(other.dictionary.iter())
        {
            if sid_a != sid_b || object_a.hash() != object_b.hash() {
                return Some(format!("dictionary entries {sid_a} and {sid_b} differ"));
            }
        }
        if self.references != other.references {
            return Some("reference maps differ".into());
        }
        if self.db.registry() != other.db.registry() {
            return Some("registries differ".into());
        }
        None
    }
}

/// Resolver over the chronology's split-borrowed maps.
struct MapResolver<'a, H: ContentHash, T: StoredObject<H>> {
    dictionary: &'a BTreeMap<Id, T>,
    references: &'a BTreeMap<H, Id>,
}

impl<H: ContentHash, T: StoredObject<H>> RefResolver<H> for MapResolver<'_, H, T> {
    fn lookup(&self, hash: &H) -> Option<Id> {
        self.references.get(hash).copied()
    }

    fn materialize(&self, sid: Id) -> Option<H> {
        self.dictionary.get(&sid).map(|object| object.hash().clone())
    }
}
