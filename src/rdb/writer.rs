use std::path::Path;

use super::{CRC64, MAGIC, RdbError, SnapshotEntry};

/// Serialize string rows into a complete snapshot image: magic, one
/// `redis-ver` metadata pair, the database-0 section with sizing hints,
/// each row (expiry prefix first where present), terminator, CRC.
pub fn serialize(rows: &[SnapshotEntry]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(MAGIC);

    out.push(0xFA);
    write_string(&mut out, b"redis-ver");
    write_string(&mut out, b"6.0.16");

    out.push(0xFE);
    write_size(&mut out, 0);
    out.push(0xFB);
    write_size(&mut out, rows.len());
    write_size(&mut out, rows.iter().filter(|r| r.expires_at.is_some()).count());

    for row in rows {
        if let Some(deadline) = row.expires_at {
            out.push(0xFC);
            out.extend_from_slice(&deadline.to_le_bytes());
        }
        out.push(0x00);
        write_string(&mut out, row.key.as_bytes());
        write_string(&mut out, &row.value);
    }

    out.push(0xFF);
    let crc = CRC64.checksum(&out);
    out.extend_from_slice(&crc.to_le_bytes());
    out
}

pub fn write_file(path: &Path, rows: &[SnapshotEntry]) -> Result<(), RdbError> {
    std::fs::write(path, serialize(rows))?;
    Ok(())
}

/// The image a leader sends for a full resync when it bootstraps a
/// follower from nothing.
pub fn empty_snapshot() -> Vec<u8> {
    serialize(&[])
}

fn write_size(out: &mut Vec<u8>, len: usize) {
    if len < 64 {
        out.push(len as u8);
    } else if len < 16_384 {
        out.push(0x40 | (len >> 8) as u8);
        out.push(len as u8);
    } else {
        out.push(0x80);
        out.extend_from_slice(&(len as u32).to_be_bytes());
    }
}

fn write_string(out: &mut Vec<u8>, data: &[u8]) {
    write_size(out, data.len());
    out.extend_from_slice(data);
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_image_layout() {
        let image = empty_snapshot();
        assert!(image.starts_with(MAGIC));
        assert_eq!(image[MAGIC.len()], 0xFA);
        // 0xFF terminator sits just before the eight CRC bytes.
        assert_eq!(image[image.len() - 9], 0xFF);
        let stored = u64::from_le_bytes(image[image.len() - 8..].try_into().unwrap());
        assert_eq!(stored, CRC64.checksum(&image[..image.len() - 8]));
    }

    #[rstest]
    #[case(0, vec![0x00])]
    #[case(63, vec![0x3F])]
    #[case(64, vec![0x40, 0x40])]
    #[case(300, vec![0x41, 0x2C])]
    #[case(16_383, vec![0x7F, 0xFF])]
    #[case(16_384, vec![0x80, 0x00, 0x00, 0x40, 0x00])]
    fn test_size_encoding_forms(#[case] len: usize, #[case] expected: Vec<u8>) {
        let mut out = Vec::new();
        write_size(&mut out, len);
        assert_eq!(out, expected);
    }
}
