//! SMB2 READ command.
//! MS-SMB2 Section 2.2.19 (Request) and 2.2.20 (Response)

use bytes::{BufMut, BytesMut};

use crate::smb2::FileId;

#[derive(Debug, Clone)]
pub struct ReadRequest {
    pub length: u32,
    pub offset: u64,
    pub file_id: FileId,
    pub minimum_count: u32,
}

impl ReadRequest {
    /// StructureSize(2) + Padding(1) + Flags(1) + Length(4) + Offset(8) +
    /// FileId(16) + MinimumCount(4) + Channel(4) + RemainingBytes(4) +
    /// ReadChannelInfoOffset(2) + ReadChannelInfoLength(2) + Buffer(1) = 49
    pub fn serialize(&self, buf: &mut BytesMut) {
        buf.put_u16_le(49);                 // StructureSize
        buf.put_u8(80);                     // Padding (preferred data offset)
        buf.put_u8(0);                      // Flags
        buf.put_u32_le(self.length);
        buf.put_u64_le(self.offset);
        self.file_id.serialize(buf);
        buf.put_u32_le(self.minimum_count);
        buf.put_u32_le(0);                  // Channel
        buf.put_u32_le(0);                  // RemainingBytes
        buf.put_u16_le(0);                  // ReadChannelInfoOffset
        buf.put_u16_le(0);                  // ReadChannelInfoLength
        buf.put_u8(0);                      // Buffer
    }

    pub fn parse(input: &[u8]) -> Option<Self> {
        if input.len() < 48 {
            return None;
        }
        Some(ReadRequest {
            length: u32::from_le_bytes(input[4..8].try_into().ok()?),
            offset: u64::from_le_bytes(input[8..16].try_into().ok()?),
            file_id: FileId::parse(&input[16..32])?,
            minimum_count: u32::from_le_bytes(input[32..36].try_into().ok()?),
        })
    }
}

#[derive(Debug, Clone)]
pub struct ReadResponse {
    pub data: Vec<u8>,
}

impl ReadResponse {
    /// Fixed part is 16 bytes, data follows at header offset 80.
    pub fn serialize(&self, buf: &mut BytesMut) {
        buf.put_u16_le(17);                     // StructureSize
        buf.put_u8(80);                         // DataOffset
        buf.put_u8(0);                          // Reserved
        buf.put_u32_le(self.data.len() as u32); // DataLength
        buf.put_u32_le(0);                      // DataRemaining
        buf.put_u32_le(0);                      // Reserved2
        buf.put_slice(&self.data);
    }

    pub fn parse(input: &[u8]) -> Option<Self> {
        if input.len() < 16 {
            return None;
        }
        let data_offset = input[2] as usize;
        let data_length = u32::from_le_bytes(input[4..8].try_into().ok()?) as usize;
        let data = crate::smb2::body_buffer(input, data_offset, data_length)?;
        Some(ReadResponse { data: data.to_vec() })
    }
}
