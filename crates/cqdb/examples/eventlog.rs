//! Minimal event-log walkthrough: record a handful of events about two
//! content-addressed objects, reopen the database, and replay them.
//!
//! Run with: `cargo run --example eventlog`

use std::collections::BTreeSet;

use cqdb::{Chronology, DbOptions, Hash256, Object, Replayer, Result};

const CMD_ENTER: u8 = 0x00;
const CMD_LEAVE: u8 = 0x01;
const CMD_GRADUATE: u8 = 0x02;

type Ob = Object<Hash256>;
type Log = Chronology<Hash256, Ob, Printer>;

struct Printer;

impl Replayer<Hash256, Ob> for Printer {
    fn replay_event(log: &mut Log, cmd: u8, known: bool) -> Result<()> {
        let time = log.current_time();
        match cmd {
            CMD_ENTER => {
                let ob = log.pop_object()?;
                println!("{time}: enter {} (sid {})", ob.hash, ob.sid);
            }
            CMD_LEAVE => {
                let sid = if known {
                    log.pop_reference()?
                } else {
                    let hash = log.pop_reference_hash()?;
                    println!("{time}: leave {hash} (never stored)");
                    return Ok(());
                };
                println!("{time}: leave sid {sid}");
            }
            CMD_GRADUATE => {
                let hashes = log.pop_reference_hashes()?;
                println!("{time}: graduate {} subjects", hashes.len());
            }
            other => println!("{time}: unknown command {other}"),
        }
        Ok(())
    }
}

fn main() -> Result<()> {
    let dir = std::env::temp_dir().join("cqdb-eventlog-example");
    cqdb::remove_dir_recursive(&dir)?;

    let foo = Object::new(Hash256::digest(b"foo"));
    let bar = Object::new(Hash256::digest(b"bar"));

    {
        let options = DbOptions::new(&dir, "cluster").cluster_size(1008);
        let mut log: Log = Chronology::open(options)?;
        log.load()?;
        log.begin_segment(1)?;

        let mut foo = foo.clone();
        let mut bar = bar.clone();
        log.push_event_subject(1_557_811_967, CMD_ENTER, &mut foo, false)?;
        log.push_event_subject(1_557_811_968, CMD_ENTER, &mut bar, false)?;
        log.push_event_subject(1_557_812_000, CMD_LEAVE, &mut bar, true)?;
        let class: BTreeSet<Hash256> = [foo.hash, bar.hash].into();
        log.push_event_set(1_557_812_001, CMD_GRADUATE, &class)?;
    }

    // Reopen; loading replays the cluster body through the Printer.
    let options = DbOptions::new(&dir, "cluster").cluster_size(1008);
    let mut log: Log = Chronology::open(options)?;
    log.load()?;
    println!(
        "tip {} with {} objects known",
        log.db().registry().tip(),
        log.dictionary().len()
    );
    Ok(())
}
