//! yEnc encoder for fixture bodies.

/// Encode a single-part post.
#[must_use]
pub fn encode_single(name: &str, data: &[u8]) -> Vec<u8> {
    let mut out = format!("=ybegin line=128 size={} name={name}\r\n", data.len()).into_bytes();
    encode_payload(data, &mut out);
    out.extend_from_slice(format!("=yend size={}\r\n", data.len()).as_bytes());
    out
}

/// Encode one part of a multi-part post.
///
/// `begin` is the 1-based offset of the part's first byte within the whole
/// file and `data` is the decoded payload of this part alone.
#[must_use]
pub fn encode_part(
    name: &str,
    part: u64,
    total: u64,
    total_size: u64,
    begin: u64,
    data: &[u8],
) -> Vec<u8> {
    let end = begin + data.len() as u64 - 1;
    let mut out = format!(
        "=ybegin part={part} total={total} line=128 size={total_size} name={name}\r\n"
    )
    .into_bytes();
    out.extend_from_slice(format!("=ypart begin={begin} end={end}\r\n").as_bytes());
    encode_payload(data, &mut out);
    out.extend_from_slice(
        format!("=yend size={} part={part}\r\n", data.len()).as_bytes(),
    );
    out
}

fn encode_payload(data: &[u8], out: &mut Vec<u8>) {
    let mut col = 0_usize;
    for &byte in data {
        let enc = byte.wrapping_add(42);
        // NUL, CR, LF and '=' must be escaped; '.' in column zero is left
        // to the transport's dot-stuffing.
        if matches!(enc, 0 | b'\r' | b'\n' | b'=') {
            out.push(b'=');
            out.push(enc.wrapping_add(64));
            col += 2;
        } else {
            out.push(enc);
            col += 1;
        }
        if col >= 128 {
            out.extend_from_slice(b"\r\n");
            col = 0;
        }
    }
    if col > 0 {
        out.extend_from_slice(b"\r\n");
    }
}

/// Deterministic pseudo-random payload for fixtures.
#[must_use]
pub fn patterned_payload(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| {
            let i = u64::try_from(i).unwrap_or_default();
            let mixed = i
                .wrapping_mul(2_654_435_761)
                .wrapping_add(u64::from(seed) << 7);
            u8::try_from(mixed % 251).unwrap_or_default()
        })
        .collect()
}
