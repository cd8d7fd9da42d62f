//! Primitive byte encodings shared by the node and node-key codecs
//!
//! Two families live here:
//! - compact integers (`cint`) for the storage format: a header byte holding
//!   `width - 1` followed by `width` big-endian bytes of the minimal
//!   representation, so `7` is `00 07` and `0x0102` is `01 01 02`;
//! - zigzag/unsigned LEB128 varints and uvarint-prefixed byte strings for the
//!   hash stream.

/// Widest compact integer (a full u64)
pub const MAX_COMPACT_WIDTH: usize = 8;

/// Number of bytes `encode_compact` writes for `value`
pub fn compact_len(value: u64) -> usize {
    1 + significant_bytes(value)
}

fn significant_bytes(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    bits.div_ceil(8).max(1)
}

/// Append `value` as a compact integer, returning the bytes written
pub fn encode_compact(buf: &mut Vec<u8>, value: u64) -> usize {
    let width = significant_bytes(value);
    buf.push((width - 1) as u8);
    buf.extend_from_slice(&value.to_be_bytes()[8 - width..]);
    width + 1
}

/// Read a compact integer no wider than `max_width` bytes.
///
/// Returns the value and the number of bytes consumed.
pub fn decode_compact(buf: &[u8], max_width: usize) -> Result<(u64, usize), &'static str> {
    let header = *buf.first().ok_or("empty buffer")?;
    let width = header as usize + 1;
    if width > max_width {
        return Err("integer too wide");
    }
    let body = buf.get(1..1 + width).ok_or("truncated integer")?;
    if width > 1 && body[0] == 0 {
        return Err("non-minimal integer");
    }
    let mut bytes = [0u8; 8];
    bytes[8 - width..].copy_from_slice(body);
    Ok((u64::from_be_bytes(bytes), width + 1))
}

/// Append an unsigned LEB128 varint
pub fn write_uvarint(buf: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        buf.push((value as u8) | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
}

/// Append a zigzag-encoded signed varint
pub fn write_varint(buf: &mut Vec<u8>, value: i64) {
    write_uvarint(buf, ((value << 1) ^ (value >> 63)) as u64);
}

/// Append a uvarint length prefix followed by the bytes
pub fn write_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    write_uvarint(buf, bytes.len() as u64);
    buf.extend_from_slice(bytes);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compact(value: u64) -> Vec<u8> {
        let mut buf = Vec::new();
        encode_compact(&mut buf, value);
        buf
    }

    #[test]
    fn test_compact_widths() {
        assert_eq!(compact(0), vec![0x00, 0x00]);
        assert_eq!(compact(7), vec![0x00, 0x07]);
        assert_eq!(compact(0x0102), vec![0x01, 0x01, 0x02]);
        assert_eq!(compact(u64::MAX).len(), 9);
        assert_eq!(compact_len(u64::MAX), 9);
    }

    #[test]
    fn test_compact_decode_reports_consumed() {
        let mut buf = compact(2384892734987234);
        buf.extend_from_slice(b"tail");
        let (value, used) = decode_compact(&buf, MAX_COMPACT_WIDTH).unwrap();
        assert_eq!(value, 2384892734987234);
        assert_eq!(used, buf.len() - 4);
    }

    #[test]
    fn test_compact_rejects_bad_input() {
        assert!(decode_compact(&[], 8).is_err());
        assert!(decode_compact(&[0x02, 0x01], 8).is_err());
        assert!(decode_compact(&[0x01, 0x00, 0x05], 8).is_err());
        assert!(decode_compact(&[0x04, 1, 2, 3, 4, 5], 4).is_err());
    }

    #[test]
    fn test_varints() {
        let mut buf = Vec::new();
        write_varint(&mut buf, 3);
        write_varint(&mut buf, -1);
        write_uvarint(&mut buf, 300);
        assert_eq!(buf, vec![0x06, 0x01, 0xac, 0x02]);
    }
}
