// SPDX-License-Identifier: PMPL-1.0-or-later
// Fuzz target for transaction log frame decoding

#![no_main]

use docvault_wal::{decode_frames, LogEntry};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Scanning arbitrary bytes must never panic, whatever the damage.
    let entries = decode_frames(data);

    // Anything that decoded re-encodes to a frame that decodes identically.
    for entry in entries {
        let frame = entry.serialize();
        let decoded = decode_frames(&frame);
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].body, entry.body);
        assert_eq!(decoded[0].transaction_id, entry.transaction_id);
    }

    // A single frame decoded directly after its length prefix.
    if data.len() >= 4 {
        let length = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        let _ = LogEntry::deserialize(&data[4..], length);
    }
});
