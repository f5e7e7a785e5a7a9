//! SMB2 WRITE command.
//! MS-SMB2 Section 2.2.21 (Request) and 2.2.22 (Response)

use bytes::{BufMut, BytesMut};

use crate::smb2::{self, FileId};

#[derive(Debug, Clone)]
pub struct WriteRequest<'a> {
    pub offset: u64,
    pub file_id: FileId,
    pub data: &'a [u8],
}

impl<'a> WriteRequest<'a> {
    /// 48 fixed bytes, data at header offset 112.
    pub fn serialize(&self, buf: &mut BytesMut) {
        buf.put_u16_le(49);                     // StructureSize
        buf.put_u16_le((64 + 48) as u16);       // DataOffset
        buf.put_u32_le(self.data.len() as u32); // Length
        buf.put_u64_le(self.offset);
        self.file_id.serialize(buf);
        buf.put_u32_le(0);                      // Channel
        buf.put_u32_le(0);                      // RemainingBytes
        buf.put_u16_le(0);                      // WriteChannelInfoOffset
        buf.put_u16_le(0);                      // WriteChannelInfoLength
        buf.put_u32_le(0);                      // Flags
        buf.put_slice(self.data);
    }

    pub fn parse(input: &'a [u8]) -> Option<Self> {
        if input.len() < 48 {
            return None;
        }
        let data_offset = u16::from_le_bytes([input[2], input[3]]) as usize;
        let data_length = u32::from_le_bytes(input[4..8].try_into().ok()?) as usize;
        Some(WriteRequest {
            offset: u64::from_le_bytes(input[8..16].try_into().ok()?),
            file_id: FileId::parse(&input[16..32])?,
            data: smb2::body_buffer(input, data_offset, data_length)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct WriteResponse {
    pub count: u32,
}

impl WriteResponse {
    /// StructureSize(2) + Reserved(2) + Count(4) + Remaining(4) +
    /// WriteChannelInfoOffset(2) + WriteChannelInfoLength(2)
    pub fn serialize(&self, buf: &mut BytesMut) {
        buf.put_u16_le(17);         // StructureSize
        buf.put_u16_le(0);          // Reserved
        buf.put_u32_le(self.count);
        buf.put_u32_le(0);          // Remaining
        buf.put_u16_le(0);          // WriteChannelInfoOffset
        buf.put_u16_le(0);          // WriteChannelInfoLength
    }

    pub fn parse(input: &[u8]) -> Option<Self> {
        if input.len() < 16 {
            return None;
        }
        Some(WriteResponse {
            count: u32::from_le_bytes(input[4..8].try_into().ok()?),
        })
    }
}
