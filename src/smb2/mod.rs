//! SMB2 protocol types: headers, commands, and status codes.
//!
//! Each command module carries both directions of its exchange: the client
//! serializes requests and parses responses, an in-process server does the
//! reverse. Buffer offsets inside bodies are relative to the start of the
//! SMB2 header, so the body-local position is `offset - 64`.
//! Reference: [MS-SMB2]: Server Message Block Protocol Versions 2 and 3

pub mod header;
pub mod negotiate;
pub mod session;
pub mod tree;
pub mod create;
pub mod close;
pub mod flush;
pub mod read;
pub mod write;
pub mod query;
pub mod status;

use bytes::{BufMut, BytesMut};

use crate::smb2::header::SMB2_HEADER_SIZE;

/// Dialect revisions (MS-SMB2 2.2.3)
pub const DIALECT_SMB_2_0_2: u16 = 0x0202;
pub const DIALECT_SMB_2_1: u16 = 0x0210;
pub const DIALECT_SMB_3_0: u16 = 0x0300;
pub const DIALECT_SMB_3_0_2: u16 = 0x0302;

macro_rules! smb2_commands {
    ($($name:ident = $code:literal,)*) => {
        /// SMB2 command codes.
        /// MS-SMB2 Section 2.2.1
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u16)]
        pub enum Smb2Command {
            $($name = $code,)*
        }

        impl Smb2Command {
            pub fn from_u16(v: u16) -> Option<Self> {
                match v {
                    $($code => Some(Self::$name),)*
                    _ => None,
                }
            }
        }
    };
}

smb2_commands! {
    Negotiate = 0,
    SessionSetup = 1,
    Logoff = 2,
    TreeConnect = 3,
    TreeDisconnect = 4,
    Create = 5,
    Close = 6,
    Flush = 7,
    Read = 8,
    Write = 9,
    Lock = 10,
    Ioctl = 11,
    Cancel = 12,
    Echo = 13,
    QueryDirectory = 14,
    ChangeNotify = 15,
    QueryInfo = 16,
    SetInfo = 17,
}

/// SMB2_FILEID: the server's handle for an open.
/// MS-SMB2 2.2.14.1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FileId {
    pub persistent: u64,
    pub volatile: u64,
}

impl FileId {
    pub fn parse(input: &[u8]) -> Option<Self> {
        if input.len() < 16 {
            return None;
        }
        Some(FileId {
            persistent: u64::from_le_bytes(input[0..8].try_into().ok()?),
            volatile: u64::from_le_bytes(input[8..16].try_into().ok()?),
        })
    }

    pub fn serialize(&self, buf: &mut BytesMut) {
        buf.put_u64_le(self.persistent);
        buf.put_u64_le(self.volatile);
    }
}

/// Slice a variable-length buffer out of a command body, given the
/// header-relative offset and length found in the fixed part.
pub fn body_buffer(body: &[u8], offset: usize, length: usize) -> Option<&[u8]> {
    if length == 0 {
        return Some(&[]);
    }
    let start = offset.checked_sub(SMB2_HEADER_SIZE)?;
    let end = start.checked_add(length)?;
    body.get(start..end)
}

/// Decode a UTF-16LE byte slice into a Rust String.
pub fn utf16le_to_string(data: &[u8]) -> String {
    let u16s: Vec<u16> = data
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    String::from_utf16_lossy(&u16s).trim_end_matches('\0').to_string()
}

/// Encode a Rust string as UTF-16LE bytes.
pub fn string_to_utf16le(s: &str) -> Vec<u8> {
    s.encode_utf16()
        .flat_map(|u| u.to_le_bytes())
        .collect()
}

/// Build the 9-byte SMB2 error response body (no error data).
/// MS-SMB2 2.2.2
pub fn build_error_response_body() -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(9);
    buf.put_u16_le(9); // StructureSize
    buf.put_u8(0);     // ErrorContextCount
    buf.put_u8(0);     // Reserved
    buf.put_u32_le(0); // ByteCount
    buf.put_u8(0);     // ErrorData
    buf.to_vec()
}
