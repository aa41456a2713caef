use byteorder::{ByteOrder, LittleEndian};

use crate::errcorrupt;
use crate::error::Result;

/// The metadata block occupies a fixed prefix of the data file.
pub const META_SIZE: usize = 64;

const MAGIC: &[u8; 8] = b"EMBER\x00KV";
const FILE_VERSION: u32 = 1;

/// Root descriptor at the head of the data file. Rewritten and flushed as the
/// final step of every commit; on open it names the current root and the
/// append high watermark.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Meta {
    pub magic: [u8; 8],
    pub file_version: u32,
    pub root_offset: u64,
    pub prev_root_offset: u64,
    pub append_cursor: u64,
}

impl Meta {
    pub fn new(root_offset: u64, prev_root_offset: u64, append_cursor: u64) -> Self {
        Self {
            magic: *MAGIC,
            file_version: FILE_VERSION,
            root_offset,
            prev_root_offset,
            append_cursor,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.magic != *MAGIC {
            return errcorrupt!("metadata magic {:02x?} is not an emberdb file", self.magic);
        }
        if self.file_version != FILE_VERSION {
            return errcorrupt!(
                "unsupported file version {} (expected {FILE_VERSION})",
                self.file_version
            );
        }
        if self.root_offset < META_SIZE as u64 {
            return errcorrupt!("root offset {} inside the metadata block", self.root_offset);
        }
        Ok(())
    }

    pub fn encode(&self) -> [u8; META_SIZE] {
        let mut buf = [0u8; META_SIZE];
        buf[0..8].copy_from_slice(&self.magic);
        LittleEndian::write_u32(&mut buf[8..12], self.file_version);
        // 12..16 reserved
        LittleEndian::write_u64(&mut buf[16..24], self.root_offset);
        LittleEndian::write_u64(&mut buf[24..32], self.prev_root_offset);
        LittleEndian::write_u64(&mut buf[32..40], self.append_cursor);
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < META_SIZE {
            return errcorrupt!(
                "metadata block of {} bytes shorter than {META_SIZE} byte minimum",
                bytes.len()
            );
        }

        let mut magic = [0u8; 8];
        magic.copy_from_slice(&bytes[0..8]);

        let meta = Self {
            magic,
            file_version: LittleEndian::read_u32(&bytes[8..12]),
            root_offset: LittleEndian::read_u64(&bytes[16..24]),
            prev_root_offset: LittleEndian::read_u64(&bytes[24..32]),
            append_cursor: LittleEndian::read_u64(&bytes[32..40]),
        };
        meta.validate()?;
        Ok(meta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn test_round_trip() {
        let meta = Meta::new(64, 0, 141);
        let encoded = meta.encode();
        assert_eq!(encoded.len(), META_SIZE);

        let decoded = Meta::decode(&encoded).expect("failed to decode metadata");
        assert_eq!(decoded, meta);
    }

    #[test]
    fn test_magic_validation() {
        let mut encoded = Meta::new(64, 0, 141).encode();
        encoded[0..8].copy_from_slice(b"NOTADB!!");
        assert!(matches!(Meta::decode(&encoded), Err(Error::Corrupt(_))));
    }

    #[test]
    fn test_version_validation() {
        let mut meta = Meta::new(64, 0, 141);
        meta.file_version = 999;
        assert!(matches!(Meta::decode(&meta.encode()), Err(Error::Corrupt(_))));
    }

    #[test]
    fn test_root_inside_metadata_block() {
        let meta = Meta::new(8, 0, 141);
        assert!(matches!(Meta::decode(&meta.encode()), Err(Error::Corrupt(_))));
    }

    #[test]
    fn test_short_buffer() {
        let encoded = Meta::new(64, 0, 141).encode();
        assert!(matches!(
            Meta::decode(&encoded[..META_SIZE - 2]),
            Err(Error::Corrupt(_))
        ));
    }
}
