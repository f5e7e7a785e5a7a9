//! SMB2 CLOSE command.
//! MS-SMB2 Section 2.2.15 (Request) and 2.2.16 (Response)

use bytes::{BufMut, BytesMut};

use crate::fscc::{FileAttributes, FileBasicInformation, FileTime};
use crate::smb2::FileId;

/// Flag: request post-close attribute query.
pub const CLOSE_FLAG_POSTQUERY_ATTRIB: u16 = 0x0001;

#[derive(Debug, Clone)]
pub struct CloseRequest {
    pub flags: u16,
    pub file_id: FileId,
}

impl CloseRequest {
    /// StructureSize(2) + Flags(2) + Reserved(4) + FileId(16)
    pub fn serialize(&self, buf: &mut BytesMut) {
        buf.put_u16_le(24);         // StructureSize
        buf.put_u16_le(self.flags);
        buf.put_u32_le(0);          // Reserved
        self.file_id.serialize(buf);
    }

    pub fn parse(input: &[u8]) -> Option<Self> {
        if input.len() < 24 {
            return None;
        }
        Some(CloseRequest {
            flags: u16::from_le_bytes([input[2], input[3]]),
            file_id: FileId::parse(&input[8..24])?,
        })
    }

    pub fn wants_post_query(&self) -> bool {
        (self.flags & CLOSE_FLAG_POSTQUERY_ATTRIB) != 0
    }
}

/// CLOSE response. `attributes` is only filled in when the request asked
/// for a post-query.
#[derive(Debug, Clone, Default)]
pub struct CloseResponse {
    pub attributes: Option<(FileBasicInformation, u64, u64)>,
}

impl CloseResponse {
    /// 60 bytes.
    pub fn serialize(&self, buf: &mut BytesMut) {
        buf.put_u16_le(60); // StructureSize
        match &self.attributes {
            Some((basic, allocation_size, end_of_file)) => {
                buf.put_u16_le(CLOSE_FLAG_POSTQUERY_ATTRIB);
                buf.put_u32_le(0); // Reserved
                buf.put_u64_le(basic.creation_time.ticks());
                buf.put_u64_le(basic.last_access_time.ticks());
                buf.put_u64_le(basic.last_write_time.ticks());
                buf.put_u64_le(basic.change_time.ticks());
                buf.put_u64_le(*allocation_size);
                buf.put_u64_le(*end_of_file);
                buf.put_u32_le(basic.file_attributes.bits());
            }
            None => {
                buf.put_u16_le(0);
                buf.put_bytes(0, 56);
            }
        }
    }

    pub fn parse(input: &[u8]) -> Option<Self> {
        if input.len() < 60 {
            return None;
        }
        let flags = u16::from_le_bytes([input[2], input[3]]);
        if flags & CLOSE_FLAG_POSTQUERY_ATTRIB == 0 {
            return Some(CloseResponse { attributes: None });
        }
        let u64_at = |at: usize| -> Option<u64> { Some(u64::from_le_bytes(input[at..at + 8].try_into().ok()?)) };
        let basic = FileBasicInformation {
            creation_time: FileTime::from_ticks(u64_at(8)?),
            last_access_time: FileTime::from_ticks(u64_at(16)?),
            last_write_time: FileTime::from_ticks(u64_at(24)?),
            change_time: FileTime::from_ticks(u64_at(32)?),
            file_attributes: FileAttributes::from_bits_retain(u32::from_le_bytes(
                input[56..60].try_into().ok()?,
            )),
        };
        Some(CloseResponse {
            attributes: Some((basic, u64_at(40)?, u64_at(48)?)),
        })
    }
}
