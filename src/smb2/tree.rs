//! SMB2 TREE_CONNECT and TREE_DISCONNECT commands.
//! MS-SMB2 Section 2.2.9-2.2.12

use bytes::{BufMut, BytesMut};

use crate::smb2;

/// Share type constants.
pub const SHARE_TYPE_DISK: u8 = 0x01;
pub const SHARE_TYPE_PIPE: u8 = 0x02;
pub const SHARE_TYPE_PRINT: u8 = 0x03;

/// TREE_CONNECT request. The path is a UNC name, e.g. `\\server\share`.
#[derive(Debug, Clone)]
pub struct TreeConnectRequest {
    pub path: String,
}

impl TreeConnectRequest {
    pub fn serialize(&self, buf: &mut BytesMut) {
        let path = smb2::string_to_utf16le(&self.path);
        buf.put_u16_le(9);                    // StructureSize
        buf.put_u16_le(0);                    // Flags
        buf.put_u16_le((64 + 8) as u16);      // PathOffset
        buf.put_u16_le(path.len() as u16);    // PathLength
        buf.put_slice(&path);                 // Buffer
    }

    pub fn parse(input: &[u8]) -> Option<Self> {
        if input.len() < 8 {
            return None;
        }
        let path_offset = u16::from_le_bytes([input[4], input[5]]) as usize;
        let path_length = u16::from_le_bytes([input[6], input[7]]) as usize;
        let path_bytes = smb2::body_buffer(input, path_offset, path_length)?;
        Some(TreeConnectRequest {
            path: smb2::utf16le_to_string(path_bytes),
        })
    }

    /// The share component of the UNC path.
    pub fn share_name(&self) -> &str {
        self.path.rsplit('\\').next().unwrap_or(&self.path)
    }
}

/// TREE_CONNECT response.
#[derive(Debug, Clone)]
pub struct TreeConnectResponse {
    pub share_type: u8,
    pub share_flags: u32,
    pub capabilities: u32,
    pub maximal_access: u32,
}

impl TreeConnectResponse {
    pub fn serialize(&self, buf: &mut BytesMut) {
        buf.put_u16_le(16);                  // StructureSize
        buf.put_u8(self.share_type);         // ShareType
        buf.put_u8(0);                       // Reserved
        buf.put_u32_le(self.share_flags);    // ShareFlags
        buf.put_u32_le(self.capabilities);   // Capabilities
        buf.put_u32_le(self.maximal_access); // MaximalAccess
    }

    pub fn parse(input: &[u8]) -> Option<Self> {
        if input.len() < 16 {
            return None;
        }
        Some(TreeConnectResponse {
            share_type: input[2],
            share_flags: u32::from_le_bytes(input[4..8].try_into().ok()?),
            capabilities: u32::from_le_bytes(input[8..12].try_into().ok()?),
            maximal_access: u32::from_le_bytes(input[12..16].try_into().ok()?),
        })
    }
}

/// TREE_DISCONNECT request and response share the same 4-byte body.
pub struct TreeDisconnect;

impl TreeDisconnect {
    pub fn serialize(&self, buf: &mut BytesMut) {
        buf.put_u16_le(4); // StructureSize
        buf.put_u16_le(0); // Reserved
    }

    pub fn parse(input: &[u8]) -> Option<Self> {
        if input.len() < 4 {
            return None;
        }
        Some(TreeDisconnect)
    }
}
