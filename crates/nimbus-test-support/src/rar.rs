//! Builder for store-mode (method 0x30) RAR4 fixtures.
//!
//! Produces archives the streaming reader can walk: signature, MAIN head,
//! one FILE head per entry with the payload stored verbatim, and an END
//! block. CRCs are zeroed; the engine's reader never verifies them.

/// Method byte for uncompressed storage.
const METHOD_STORE: u8 = 0x30;

/// Build a single-volume store-mode archive from `(name, payload)` entries.
#[must_use]
pub fn build_store_rar(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"Rar!\x1A\x07\x00");

    // MAIN head: crc, type, flags, size, reserved1, reserved2.
    out.extend_from_slice(&0_u16.to_le_bytes());
    out.push(0x73);
    out.extend_from_slice(&0_u16.to_le_bytes());
    out.extend_from_slice(&13_u16.to_le_bytes());
    out.extend_from_slice(&0_u16.to_le_bytes());
    out.extend_from_slice(&0_u32.to_le_bytes());

    for (name, payload) in entries {
        let name_bytes = name.as_bytes();
        let head_size = u16::try_from(32 + name_bytes.len()).expect("name fits header");
        let size = u32::try_from(payload.len()).expect("payload fits u32");

        out.extend_from_slice(&0_u16.to_le_bytes()); // head crc
        out.push(0x74); // FILE head
        out.extend_from_slice(&0x8000_u16.to_le_bytes()); // LONG_BLOCK
        out.extend_from_slice(&head_size.to_le_bytes());
        out.extend_from_slice(&size.to_le_bytes()); // pack size
        out.extend_from_slice(&size.to_le_bytes()); // unpacked size
        out.push(0); // host os
        out.extend_from_slice(&0_u32.to_le_bytes()); // file crc
        out.extend_from_slice(&0_u32.to_le_bytes()); // ftime
        out.push(20); // unpack version
        out.push(METHOD_STORE);
        out.extend_from_slice(
            &u16::try_from(name_bytes.len())
                .expect("name fits u16")
                .to_le_bytes(),
        );
        out.extend_from_slice(&0x20_u32.to_le_bytes()); // attributes
        out.extend_from_slice(name_bytes);
        out.extend_from_slice(payload);
    }

    // END block.
    out.extend_from_slice(&0_u16.to_le_bytes());
    out.push(0x7B);
    out.extend_from_slice(&0_u16.to_le_bytes());
    out.extend_from_slice(&7_u16.to_le_bytes());
    out
}

/// Byte offset of the first entry's payload inside an archive built by
/// [`build_store_rar`].
#[must_use]
pub fn first_payload_offset(first_name: &str) -> u64 {
    // signature + MAIN head + FILE head with the entry name.
    7 + 13 + 32 + first_name.len() as u64
}
