//! SMB2 QUERY_DIRECTORY, QUERY_INFO, and SET_INFO commands.
//! MS-SMB2 Sections 2.2.33-2.2.40

use bytes::{BufMut, BytesMut};

use crate::smb2::{self, FileId};

// QueryInfo info type (SMB2_0_INFO_*)
pub const SMB2_0_INFO_FILE: u8 = 1;
pub const SMB2_0_INFO_FILESYSTEM: u8 = 2;
pub const SMB2_0_INFO_SECURITY: u8 = 3;

// File information classes (MS-FSCC 2.4)
pub const FILE_BASIC_INFORMATION: u8 = 4;
pub const FILE_STANDARD_INFORMATION: u8 = 5;
pub const FILE_DISPOSITION_INFORMATION: u8 = 13;
pub const FILE_ALL_INFORMATION: u8 = 18;
pub const FILE_ID_BOTH_DIRECTORY_INFORMATION: u8 = 37;

// QueryDirectory flags
pub const SL_RESTART_SCAN: u8 = 0x01;
pub const SL_RETURN_SINGLE_ENTRY: u8 = 0x02;
pub const SL_INDEX_SPECIFIED: u8 = 0x04;
pub const SL_REOPEN: u8 = 0x10;

// ---- QUERY_DIRECTORY ----

#[derive(Debug, Clone)]
pub struct QueryDirectoryRequest {
    pub file_information_class: u8,
    pub flags: u8,
    pub file_index: u32,
    pub file_id: FileId,
    pub file_name_pattern: String,
    pub output_buffer_length: u32,
}

impl QueryDirectoryRequest {
    /// MS-SMB2 2.2.33: 32 fixed bytes, then the search pattern.
    pub fn serialize(&self, buf: &mut BytesMut) {
        let pattern = smb2::string_to_utf16le(&self.file_name_pattern);
        buf.put_u16_le(33);                         // StructureSize
        buf.put_u8(self.file_information_class);
        buf.put_u8(self.flags);
        buf.put_u32_le(self.file_index);
        self.file_id.serialize(buf);
        buf.put_u16_le((64 + 32) as u16);           // FileNameOffset
        buf.put_u16_le(pattern.len() as u16);       // FileNameLength
        buf.put_u32_le(self.output_buffer_length);
        buf.put_slice(&pattern);
    }

    pub fn parse(input: &[u8]) -> Option<Self> {
        if input.len() < 32 {
            return None;
        }
        let fn_offset = u16::from_le_bytes([input[24], input[25]]) as usize;
        let fn_length = u16::from_le_bytes([input[26], input[27]]) as usize;
        let pattern = smb2::body_buffer(input, fn_offset, fn_length)?;
        Some(QueryDirectoryRequest {
            file_information_class: input[2],
            flags: input[3],
            file_index: u32::from_le_bytes(input[4..8].try_into().ok()?),
            file_id: FileId::parse(&input[8..24])?,
            file_name_pattern: if pattern.is_empty() {
                "*".to_string()
            } else {
                smb2::utf16le_to_string(pattern)
            },
            output_buffer_length: u32::from_le_bytes(input[28..32].try_into().ok()?),
        })
    }

    pub fn restart_scan(&self) -> bool {
        (self.flags & (SL_RESTART_SCAN | SL_REOPEN)) != 0
    }

    pub fn single_entry(&self) -> bool {
        (self.flags & SL_RETURN_SINGLE_ENTRY) != 0
    }
}

/// QUERY_DIRECTORY response: a pre-encoded entry buffer.
#[derive(Debug, Clone)]
pub struct QueryDirectoryResponse {
    pub data: Vec<u8>,
}

impl QueryDirectoryResponse {
    /// MS-SMB2 2.2.34
    pub fn serialize(&self, buf: &mut BytesMut) {
        serialize_output_buffer(&self.data, buf);
    }

    pub fn parse(input: &[u8]) -> Option<Self> {
        Some(QueryDirectoryResponse {
            data: parse_output_buffer(input)?.to_vec(),
        })
    }
}

/// Shared layout of QUERY_DIRECTORY and QUERY_INFO responses:
/// StructureSize(2) + OutputBufferOffset(2) + OutputBufferLength(4) + Buffer.
fn serialize_output_buffer(data: &[u8], buf: &mut BytesMut) {
    buf.put_u16_le(9);                  // StructureSize
    buf.put_u16_le((64 + 8) as u16);    // OutputBufferOffset
    buf.put_u32_le(data.len() as u32);  // OutputBufferLength
    buf.put_slice(data);
}

fn parse_output_buffer(input: &[u8]) -> Option<&[u8]> {
    if input.len() < 8 {
        return None;
    }
    let offset = u16::from_le_bytes([input[2], input[3]]) as usize;
    let length = u32::from_le_bytes(input[4..8].try_into().ok()?) as usize;
    smb2::body_buffer(input, offset, length)
}

// ---- QUERY_INFO ----

#[derive(Debug, Clone)]
pub struct QueryInfoRequest {
    pub info_type: u8,
    pub file_info_class: u8,
    pub output_buffer_length: u32,
    pub additional_information: u32,
    pub flags: u32,
    pub file_id: FileId,
}

impl QueryInfoRequest {
    /// MS-SMB2 2.2.37: 40 fixed bytes plus one byte of empty buffer.
    pub fn serialize(&self, buf: &mut BytesMut) {
        buf.put_u16_le(41);                         // StructureSize
        buf.put_u8(self.info_type);
        buf.put_u8(self.file_info_class);
        buf.put_u32_le(self.output_buffer_length);
        buf.put_u16_le(0);                          // InputBufferOffset
        buf.put_u16_le(0);                          // Reserved
        buf.put_u32_le(0);                          // InputBufferLength
        buf.put_u32_le(self.additional_information);
        buf.put_u32_le(self.flags);
        self.file_id.serialize(buf);
        buf.put_u8(0);                              // Buffer
    }

    pub fn parse(input: &[u8]) -> Option<Self> {
        if input.len() < 40 {
            return None;
        }
        Some(QueryInfoRequest {
            info_type: input[2],
            file_info_class: input[3],
            output_buffer_length: u32::from_le_bytes(input[4..8].try_into().ok()?),
            additional_information: u32::from_le_bytes(input[16..20].try_into().ok()?),
            flags: u32::from_le_bytes(input[20..24].try_into().ok()?),
            file_id: FileId::parse(&input[24..40])?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct QueryInfoResponse {
    pub data: Vec<u8>,
}

impl QueryInfoResponse {
    /// MS-SMB2 2.2.38
    pub fn serialize(&self, buf: &mut BytesMut) {
        serialize_output_buffer(&self.data, buf);
    }

    pub fn parse(input: &[u8]) -> Option<Self> {
        Some(QueryInfoResponse {
            data: parse_output_buffer(input)?.to_vec(),
        })
    }
}

// ---- SET_INFO ----

#[derive(Debug, Clone)]
pub struct SetInfoRequest<'a> {
    pub info_type: u8,
    pub file_info_class: u8,
    pub additional_information: u32,
    pub file_id: FileId,
    pub buffer: &'a [u8],
}

impl<'a> SetInfoRequest<'a> {
    /// MS-SMB2 2.2.39: 32 fixed bytes, then the info buffer.
    pub fn serialize(&self, buf: &mut BytesMut) {
        buf.put_u16_le(33);                         // StructureSize
        buf.put_u8(self.info_type);
        buf.put_u8(self.file_info_class);
        buf.put_u32_le(self.buffer.len() as u32);   // BufferLength
        buf.put_u16_le((64 + 32) as u16);           // BufferOffset
        buf.put_u16_le(0);                          // Reserved
        buf.put_u32_le(self.additional_information);
        self.file_id.serialize(buf);
        buf.put_slice(self.buffer);
    }

    pub fn parse(input: &'a [u8]) -> Option<Self> {
        if input.len() < 32 {
            return None;
        }
        let buffer_length = u32::from_le_bytes(input[4..8].try_into().ok()?) as usize;
        let buffer_offset = u16::from_le_bytes([input[8], input[9]]) as usize;
        Some(SetInfoRequest {
            info_type: input[2],
            file_info_class: input[3],
            additional_information: u32::from_le_bytes(input[12..16].try_into().ok()?),
            file_id: FileId::parse(&input[16..32])?,
            buffer: smb2::body_buffer(input, buffer_offset, buffer_length)?,
        })
    }
}

/// SET_INFO response (empty body).
pub struct SetInfoResponse;

impl SetInfoResponse {
    /// MS-SMB2 2.2.40
    pub fn serialize(&self, buf: &mut BytesMut) {
        buf.put_u16_le(2); // StructureSize
    }

    pub fn parse(input: &[u8]) -> Option<Self> {
        if input.len() < 2 {
            return None;
        }
        Some(SetInfoResponse)
    }
}
