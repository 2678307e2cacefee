//! End-to-end scenarios across the whole stack.

use std::collections::BTreeSet;
use std::io::SeekFrom;

use cqdb::{
    Chronology, DbOptions, Decode, FileStream, Hash256, Header, Object, Replayer, Result, Stream,
};
use rand::RngCore;
use tempfile::TempDir;

const CLUSTER_SIZE: u32 = 1008;

const CMD_REG: u8 = 0x00;
const CMD_DEL: u8 = 0x02;
const CMD_MASS: u8 = 0x03;
const CMD_NOP: u8 = 0x05;

type Ob = Object<Hash256>;
type Chron = Chronology<Hash256, Ob, TestReplayer>;

struct TestReplayer;

impl Replayer<Hash256, Ob> for TestReplayer {
    fn replay_event(chronology: &mut Chron, cmd: u8, known: bool) -> Result<()> {
        match cmd {
            CMD_REG => {
                chronology.pop_object()?;
            }
            CMD_DEL => {
                if known {
                    chronology.pop_reference()?;
                } else {
                    chronology.pop_reference_hash()?;
                }
            }
            CMD_MASS => {
                chronology.pop_reference_hashes()?;
            }
            _ => {}
        }
        Ok(())
    }
}

fn random_object() -> Ob {
    let mut raw = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut raw);
    Object::new(Hash256::new(raw))
}

fn open_writer(dir: &TempDir) -> Chron {
    let options = DbOptions::new(dir.path(), "cluster").cluster_size(CLUSTER_SIZE);
    let mut chronology = Chron::open(options).unwrap();
    chronology.load().unwrap();
    chronology
}

/// One observed event: timestamp, command, known flag.
#[derive(Debug, PartialEq, Eq)]
struct Seen(u64, u8, bool);

#[test]
fn a_pushed_event_sequence_reads_back_identically() {
    let dir = TempDir::new().unwrap();
    let mut ob1 = random_object();
    let mut ob2 = random_object();
    let expected = vec![
        Seen(1_557_811_967, CMD_REG, false),
        Seen(1_557_811_968, CMD_REG, false),
        Seen(1_557_811_998, CMD_NOP, false),
        Seen(1_557_812_000, CMD_DEL, true),
        Seen(1_557_812_001, CMD_MASS, false),
    ];
    {
        let mut writer = open_writer(&dir);
        writer.begin_segment(7).unwrap();
        writer
            .push_event_subject(1_557_811_967, CMD_REG, &mut ob1, false)
            .unwrap();
        writer
            .push_event_subject(1_557_811_968, CMD_REG, &mut ob2, false)
            .unwrap();
        writer.push_event(1_557_811_998, CMD_NOP).unwrap();
        writer
            .push_event_subject(1_557_812_000, CMD_DEL, &mut ob2, true)
            .unwrap();
        let graduates: BTreeSet<Hash256> = [ob1.hash, ob2.hash].into();
        writer
            .push_event_set(1_557_812_001, CMD_MASS, &graduates)
            .unwrap();
    }

    let options = DbOptions::new(dir.path(), "cluster")
        .cluster_size(CLUSTER_SIZE)
        .readonly(true);
    let mut reader = Chron::open(options).unwrap();
    reader.load().unwrap();

    let mut seen = Vec::new();
    while let Some(time) = reader.peek_time().unwrap() {
        let (cmd, known) = reader.pop_event().unwrap().unwrap();
        seen.push(Seen(time, cmd, known));
        match cmd {
            CMD_REG => {
                reader.pop_object().unwrap();
            }
            CMD_DEL => {
                if known {
                    reader.pop_reference().unwrap();
                } else {
                    reader.pop_reference_hash().unwrap();
                }
            }
            CMD_MASS => {
                let mixed = reader.pop_reference_hashes().unwrap();
                assert_eq!(mixed, [ob1.hash, ob2.hash].into());
            }
            _ => {}
        }
    }
    assert_eq!(seen, expected);

    // Both subjects were reconstructed into the reader's dictionary.
    assert!(reader.object_for(&ob1.hash).is_some());
    assert!(reader.object_for(&ob2.hash).is_some());
}

#[test]
fn cluster_crossing_leaves_indexes_at_both_file_heads() {
    let dir = TempDir::new().unwrap();
    let seg1_pos;
    let seg2_pos;
    {
        let mut writer = open_writer(&dir);
        writer.begin_segment(1).unwrap();
        seg1_pos = writer.db().tell();
        writer.push_event(1_557_974_775, CMD_NOP).unwrap();
        writer.begin_segment(1024).unwrap();
        seg2_pos = writer.db().tell();
        writer.push_event(1_557_974_780, CMD_NOP).unwrap();
    }

    // The first file begins with an empty back index.
    let mut head = FileStream::open(dir.path().join("cluster00000.cq"), true, false).unwrap();
    let back = Header::decode(&mut head).unwrap();
    assert_eq!(back.segment_count(), 0);

    // The second file begins with cluster 0's forward index.
    let mut head = FileStream::open(dir.path().join("cluster00001.cq"), true, false).unwrap();
    let forward_of_0 = Header::decode(&mut head).unwrap();
    assert_eq!(forward_of_0.segment_count(), 1);
    assert_eq!(forward_of_0.segment_position(1), Some(seg1_pos));

    // The third file holds cluster 1's forward index, published on close.
    let mut head = FileStream::open(dir.path().join("cluster00002.cq"), true, false).unwrap();
    let forward_of_1 = Header::decode(&mut head).unwrap();
    assert_eq!(forward_of_1.segment_position(1024), Some(seg2_pos));

    // A fresh handle can jump straight back to segment 1.
    let mut reader = open_writer(&dir);
    reader.goto_segment(1).unwrap();
    assert_eq!(reader.peek_time().unwrap(), Some(1_557_974_775));
}

#[test]
fn flush_publishes_the_forward_index_to_readers() {
    let dir = TempDir::new().unwrap();
    let mut writer = open_writer(&dir);
    writer.begin_segment(3).unwrap();
    writer.push_event(42, CMD_NOP).unwrap();
    writer.flush().unwrap();

    // Without closing the writer, a reader can already see segment 3.
    let mut head = FileStream::open(dir.path().join("cluster00001.cq"), true, false).unwrap();
    let forward = Header::decode(&mut head).unwrap();
    assert!(forward.has_segment(3));
}

#[test]
fn torn_tail_records_are_ignored_and_overwritten() {
    let dir = TempDir::new().unwrap();
    {
        let mut writer = open_writer(&dir);
        writer.begin_segment(1).unwrap();
        writer.push_event(1_557_974_775, CMD_NOP).unwrap();
    }
    // Append a torn record: a saturated time code whose varint is cut off.
    let cluster_path = dir.path().join("cluster00000.cq");
    {
        let mut file = FileStream::open(&cluster_path, false, false).unwrap();
        file.seek(SeekFrom::End(0)).unwrap();
        file.write_u8(0xc0 | CMD_NOP).unwrap();
    }
    let tail = std::fs::metadata(&cluster_path).unwrap().len();

    let mut writer = open_writer(&dir);
    // Replay stopped at the record boundary, right before the torn byte.
    let boundary = writer.db().tell();
    assert_eq!(boundary, tail - 1);
    writer.begin_segment(1).unwrap();
    writer.push_event(1_557_974_776, CMD_NOP).unwrap();

    // The new event overwrote the torn byte and reads back cleanly.
    let first_event = 4; // right after the empty back index
    writer.db_mut().seek(first_event).unwrap();
    writer.set_current_time(0);
    assert_eq!(writer.peek_time().unwrap(), Some(1_557_974_775));
    writer.pop_event().unwrap().unwrap();
    assert_eq!(writer.db().tell(), boundary);
    assert_eq!(writer.peek_time().unwrap(), Some(1_557_974_776));
    writer.pop_event().unwrap().unwrap();
    assert_eq!(writer.pop_event().unwrap(), None);
}
