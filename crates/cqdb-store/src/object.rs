//! Stored-object abstraction.
//!
//! Applications define what an object's body looks like on disk; the core
//! only needs its sid, its content hash, and a body codec. [`Object`] is
//! the minimal record whose body is the raw hash, which is what the tests
//! and most reference-only callers use.

use cqdb_error::Result;
use cqdb_io::Stream;
use cqdb_types::{ContentHash, Id, UNKNOWN_ID};

/// A record addressable by content hash and, once written, by sid.
///
/// The sid is the absolute byte offset of the object's body within its
/// cluster file; `UNKNOWN_ID` means "not written yet".
pub trait StoredObject<H: ContentHash>: Clone {
    /// A fresh, unwritten record for `hash`.
    fn from_hash(hash: H) -> Self;

    fn sid(&self) -> Id;

    fn set_sid(&mut self, sid: Id);

    fn hash(&self) -> &H;

    /// Serialize the body (the part that lives in the cluster file).
    fn encode_body<S: Stream + ?Sized>(&self, stream: &mut S) -> Result<()>;

    /// Deserialize a body. The caller assigns the sid afterwards.
    fn decode_body<S: Stream + ?Sized>(stream: &mut S) -> Result<Self>;
}

/// The minimal stored object: body is the raw hash bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Object<H> {
    pub sid: Id,
    pub hash: H,
}

impl<H: ContentHash> Object<H> {
    #[must_use]
    pub fn new(hash: H) -> Self {
        Object {
            sid: UNKNOWN_ID,
            hash,
        }
    }

    /// Whether this object has been written to a cluster.
    #[must_use]
    pub fn is_known(&self) -> bool {
        self.sid != UNKNOWN_ID
    }
}

impl<H: ContentHash> StoredObject<H> for Object<H> {
    fn from_hash(hash: H) -> Self {
        Object::new(hash)
    }

    fn sid(&self) -> Id {
        self.sid
    }

    fn set_sid(&mut self, sid: Id) {
        self.sid = sid;
    }

    fn hash(&self) -> &H {
        &self.hash
    }

    fn encode_body<S: Stream + ?Sized>(&self, stream: &mut S) -> Result<()> {
        write_hash(stream, &self.hash)
    }

    fn decode_body<S: Stream + ?Sized>(stream: &mut S) -> Result<Self> {
        Ok(Object::new(read_hash(stream)?))
    }
}

/// Write a hash's raw bytes.
pub fn write_hash<H: ContentHash, S: Stream + ?Sized>(stream: &mut S, hash: &H) -> Result<()> {
    stream.write_all(hash.as_bytes())
}

/// Read a hash's raw bytes.
pub fn read_hash<H: ContentHash, S: Stream + ?Sized>(stream: &mut S) -> Result<H> {
    let mut buf = vec![0u8; H::WIDTH];
    stream.read_exact(&mut buf)?;
    Ok(H::from_bytes(&buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cqdb_io::MemoryStream;
    use cqdb_types::Hash256;
    use std::io::SeekFrom;

    #[test]
    fn fresh_objects_are_unknown() {
        let ob = Object::new(Hash256::digest(b"x"));
        assert_eq!(ob.sid, UNKNOWN_ID);
        assert!(!ob.is_known());
    }

    #[test]
    fn body_round_trip() {
        let ob = Object::new(Hash256::digest(b"payload"));
        let mut stream = MemoryStream::new();
        ob.encode_body(&mut stream).unwrap();
        assert_eq!(stream.tell(), Hash256::WIDTH as u64);
        stream.seek(SeekFrom::Start(0)).unwrap();
        let back = Object::<Hash256>::decode_body(&mut stream).unwrap();
        assert_eq!(back.hash, ob.hash);
    }

    #[test]
    fn equality_tracks_hash() {
        let a = Object::new(Hash256::digest(b"a"));
        let mut b = a.clone();
        b.sid = 42;
        // Same hash, different sid: still the same content.
        assert_eq!(a.hash, b.hash);
        assert_ne!(a, b);
    }
}
