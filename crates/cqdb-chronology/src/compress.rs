//! Reference compression over an optional resolver.
//!
//! A resolver maps hashes to sids (and back) for the objects currently
//! known; with one present, references to known objects become relative
//! backpointers. Without a resolver every reference is a raw hash.
//!
//! Vector layout: `varint(N)`, an N-bit known bitfield, then per element
//! either `varint(pos - sid)` (bit set) or the raw hash. Each backpointer
//! delta is measured from the stream position just before that element's
//! varint, identically on the write and read sides.

use cqdb_error::{CqError, Result};
use cqdb_io::{read_varint, write_varint, Bitfield, Stream};
use cqdb_store::{read_hash, write_hash};
use cqdb_types::{ContentHash, Id};

/// Hash ↔ sid lookup for the currently known objects.
pub trait RefResolver<H: ContentHash> {
    /// The sid of a known object, if any.
    fn lookup(&self, hash: &H) -> Option<Id>;

    /// The hash of the object whose body starts at `sid`, if known.
    fn materialize(&self, sid: Id) -> Option<H>;
}

/// Write a reference list with per-element backpointer compression.
pub fn compress_references<H, S>(
    stream: &mut S,
    resolver: Option<&dyn RefResolver<H>>,
    references: &[H],
) -> Result<()>
where
    H: ContentHash,
    S: Stream + ?Sized,
{
    let mut known = Bitfield::new(references.len());
    let sids: Vec<Option<Id>> = references
        .iter()
        .map(|hash| resolver.and_then(|r| r.lookup(hash)))
        .collect();
    for (i, sid) in sids.iter().enumerate() {
        if sid.is_some() {
            known.set(i);
        }
    }

    write_varint(stream, references.len() as u64)?;
    known.write_to(stream)?;
    for (hash, sid) in references.iter().zip(sids) {
        match sid {
            Some(sid) => {
                let offset = stream.tell();
                if sid >= offset {
                    return Err(CqError::ReferenceOrder { sid, offset });
                }
                write_varint(stream, offset - sid)?;
            }
            None => write_hash(stream, hash)?,
        }
    }
    Ok(())
}

/// Read a reference list written by [`compress_references`].
pub fn decompress_references<H, S>(
    stream: &mut S,
    resolver: Option<&dyn RefResolver<H>>,
) -> Result<Vec<H>>
where
    H: ContentHash,
    S: Stream + ?Sized,
{
    let count = read_varint(stream)? as usize;
    let known = Bitfield::read_from(stream, count)?;
    let mut references = Vec::with_capacity(count);
    for i in 0..count {
        if known.get(i) {
            let offset = stream.tell();
            let sid = offset
                .checked_sub(read_varint(stream)?)
                .ok_or_else(|| CqError::corrupt("backpointer past start of cluster"))?;
            let hash = resolver
                .and_then(|r| r.materialize(sid))
                .ok_or_else(|| CqError::corrupt(format!("unresolvable reference sid {sid}")))?;
            references.push(hash);
        } else {
            references.push(read_hash(stream)?);
        }
    }
    Ok(references)
}

/// Write a single reference: one known byte, then a backpointer or the
/// raw hash.
pub fn compress_reference<H, S>(
    stream: &mut S,
    resolver: Option<&dyn RefResolver<H>>,
    reference: &H,
) -> Result<()>
where
    H: ContentHash,
    S: Stream + ?Sized,
{
    match resolver.and_then(|r| r.lookup(reference)) {
        Some(sid) => {
            stream.write_u8(1)?;
            let offset = stream.tell();
            if sid >= offset {
                return Err(CqError::ReferenceOrder { sid, offset });
            }
            write_varint(stream, offset - sid)?;
        }
        None => {
            stream.write_u8(0)?;
            write_hash(stream, reference)?;
        }
    }
    Ok(())
}

/// Read a single reference written by [`compress_reference`].
pub fn decompress_reference<H, S>(
    stream: &mut S,
    resolver: Option<&dyn RefResolver<H>>,
) -> Result<H>
where
    H: ContentHash,
    S: Stream + ?Sized,
{
    if stream.read_u8()? != 0 {
        let offset = stream.tell();
        let sid = offset
            .checked_sub(read_varint(stream)?)
            .ok_or_else(|| CqError::corrupt("backpointer past start of cluster"))?;
        resolver
            .and_then(|r| r.materialize(sid))
            .ok_or_else(|| CqError::corrupt(format!("unresolvable reference sid {sid}")))
    } else {
        read_hash(stream)
    }
}
