//! SMB2 FLUSH command.
//! MS-SMB2 Section 2.2.17 (Request) and 2.2.18 (Response)

use bytes::{BufMut, BytesMut};

use crate::smb2::FileId;

#[derive(Debug, Clone)]
pub struct FlushRequest {
    pub file_id: FileId,
}

impl FlushRequest {
    /// StructureSize(2) + Reserved1(2) + Reserved2(4) + FileId(16)
    pub fn serialize(&self, buf: &mut BytesMut) {
        buf.put_u16_le(24); // StructureSize
        buf.put_u16_le(0);  // Reserved1
        buf.put_u32_le(0);  // Reserved2
        self.file_id.serialize(buf);
    }

    pub fn parse(input: &[u8]) -> Option<Self> {
        if input.len() < 24 {
            return None;
        }
        Some(FlushRequest {
            file_id: FileId::parse(&input[8..24])?,
        })
    }
}

pub struct FlushResponse;

impl FlushResponse {
    pub fn serialize(&self, buf: &mut BytesMut) {
        buf.put_u16_le(4); // StructureSize
        buf.put_u16_le(0); // Reserved
    }

    pub fn parse(input: &[u8]) -> Option<Self> {
        if input.len() < 4 {
            return None;
        }
        Some(FlushResponse)
    }
}
