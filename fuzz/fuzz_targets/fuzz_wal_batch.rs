#![no_main]
use aqlbridge::replication::{ReplicationCursor, Tick, parse_batch};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() > 16384 { return; }
    let s = match std::str::from_utf8(data) { Ok(x) => x, Err(_) => return };
    if let Ok(entries) = parse_batch(s) {
        let mut cursor = ReplicationCursor::new(Tick(1));
        let _ = cursor.apply(Tick(2), entries, |_| {});
    }
});
