use bytes::Bytes;

use super::{CRC64, MAGIC, RdbError, SnapshotEntry};

/// Decode a full snapshot image into its string rows. Only database 0
/// is retained; metadata pairs and sizing hints are read and dropped.
/// The CRC trailer is verified when present and non-zero.
pub fn parse(image: &[u8]) -> Result<Vec<SnapshotEntry>, RdbError> {
    let mut cursor = Cursor { buf: image, pos: 0 };
    if cursor.take(MAGIC.len())? != MAGIC.as_slice() {
        return Err(RdbError::BadMagic);
    }

    let mut rows = Vec::new();
    let mut current_db: u64 = 0;
    let mut pending_expiry: Option<u64> = None;

    loop {
        match cursor.u8()? {
            // Metadata pair, e.g. redis-ver.
            0xFA => {
                cursor.string()?;
                cursor.string()?;
            }
            0xFE => {
                current_db = cursor.size()? as u64;
            }
            // Hash-table sizing hints. The tables grow on their own.
            0xFB => {
                cursor.size()?;
                cursor.size()?;
            }
            0xFC => pending_expiry = Some(cursor.u64_le()?),
            0xFD => pending_expiry = Some(u64::from(cursor.u32_le()?) * 1000),
            0x00 => {
                let key = cursor.string()?;
                let value = cursor.string()?;
                let expires_at = pending_expiry.take();
                if current_db == 0 {
                    rows.push(SnapshotEntry {
                        key: String::from_utf8(key.to_vec())
                            .map_err(|_| RdbError::NonUtf8Key)?,
                        value: Bytes::copy_from_slice(value),
                        expires_at,
                    });
                }
            }
            0xFF => {
                verify_checksum(image, &mut cursor)?;
                return Ok(rows);
            }
            marker => return Err(RdbError::UnknownMarker(marker)),
        }
    }
}

fn verify_checksum(image: &[u8], cursor: &mut Cursor) -> Result<(), RdbError> {
    let body_len = cursor.pos;
    let stored = match cursor.u64_le() {
        Ok(stored) => stored,
        // A trailer-less image ends right after 0xFF.
        Err(RdbError::Truncated) => return Ok(()),
        Err(e) => return Err(e),
    };
    if stored != 0 && stored != CRC64.checksum(&image[..body_len]) {
        return Err(RdbError::ChecksumMismatch);
    }
    Ok(())
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], RdbError> {
        if self.pos + n > self.buf.len() {
            return Err(RdbError::Truncated);
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, RdbError> {
        Ok(self.take(1)?[0])
    }

    fn u32_le(&mut self) -> Result<u32, RdbError> {
        let raw: [u8; 4] = self.take(4)?.try_into().unwrap_or_default();
        Ok(u32::from_le_bytes(raw))
    }

    fn u64_le(&mut self) -> Result<u64, RdbError> {
        let raw: [u8; 8] = self.take(8)?.try_into().unwrap_or_default();
        Ok(u64::from_le_bytes(raw))
    }

    /// Size-encoded length: the first byte's top two bits select the
    /// form. `0b11` is an integer or compressed special form, which
    /// this codec never produces and refuses to consume.
    fn size(&mut self) -> Result<usize, RdbError> {
        let first = self.u8()?;
        match first >> 6 {
            0b00 => Ok(usize::from(first & 0x3F)),
            0b01 => {
                let second = self.u8()?;
                Ok(usize::from(first & 0x3F) << 8 | usize::from(second))
            }
            0b10 => {
                let raw: [u8; 4] = self.take(4)?.try_into().unwrap_or_default();
                Ok(u32::from_be_bytes(raw) as usize)
            }
            _ => Err(RdbError::SpecialEncoding(first)),
        }
    }

    fn string(&mut self) -> Result<&'a [u8], RdbError> {
        let len = self.size()?;
        self.take(len)
    }
}
