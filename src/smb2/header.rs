//! SMB2 Packet Header.
//! MS-SMB2 Section 2.2.1

use bytes::{BufMut, BytesMut};

use crate::smb2::status::NtStatus;
use crate::smb2::Smb2Command;

/// Size of the SMB2 header in bytes.
pub const SMB2_HEADER_SIZE: usize = 64;

/// SMB2 protocol magic: 0xFE 'S' 'M' 'B'
pub const SMB2_MAGIC: [u8; 4] = [0xFE, b'S', b'M', b'B'];

/// Flags: response (server to client)
pub const FLAGS_SERVER_TO_REDIR: u32 = 0x0000_0001;
/// Flags: header carries an AsyncId instead of a TreeId
pub const FLAGS_ASYNC_COMMAND: u32 = 0x0000_0002;

/// Parsed SMB2 header.
#[derive(Debug, Clone)]
pub struct Smb2Header {
    pub credit_charge: u16,
    pub status: NtStatus,
    pub command: u16,
    /// CreditRequest on requests, CreditResponse on responses.
    pub credits: u16,
    pub flags: u32,
    /// Byte offset to the next compounded command; always 0, compounding is not used.
    pub next_command: u32,
    pub message_id: u64,
    pub async_id: u64,
    pub tree_id: u32,
    pub session_id: u64,
    pub signature: [u8; 16],
}

impl Smb2Header {
    /// Parse an SMB2 header from a byte slice.
    /// Returns None if the slice is too short or magic doesn't match.
    pub fn parse(input: &[u8]) -> Option<Self> {
        if input.len() < SMB2_HEADER_SIZE {
            return None;
        }
        if input[0..4] != SMB2_MAGIC {
            return None;
        }
        let structure_size = u16::from_le_bytes([input[4], input[5]]);
        if structure_size != 64 {
            return None;
        }

        let credit_charge = u16::from_le_bytes([input[6], input[7]]);
        let status = NtStatus::from_u32(u32::from_le_bytes(input[8..12].try_into().ok()?));
        let command = u16::from_le_bytes([input[12], input[13]]);
        let credits = u16::from_le_bytes([input[14], input[15]]);
        let flags = u32::from_le_bytes(input[16..20].try_into().ok()?);
        let next_command = u32::from_le_bytes(input[20..24].try_into().ok()?);
        let message_id = u64::from_le_bytes(input[24..32].try_into().ok()?);

        // [32..40] is either Reserved + TreeId (sync) or AsyncId (async)
        let (async_id, tree_id) = if (flags & FLAGS_ASYNC_COMMAND) != 0 {
            (u64::from_le_bytes(input[32..40].try_into().ok()?), 0)
        } else {
            (0, u32::from_le_bytes(input[36..40].try_into().ok()?))
        };

        let session_id = u64::from_le_bytes(input[40..48].try_into().ok()?);

        let mut signature = [0u8; 16];
        signature.copy_from_slice(&input[48..64]);

        Some(Smb2Header {
            credit_charge,
            status,
            command,
            credits,
            flags,
            next_command,
            message_id,
            async_id,
            tree_id,
            session_id,
            signature,
        })
    }

    /// Serialize this header into the buffer.
    pub fn serialize(&self, buf: &mut BytesMut) {
        buf.put_slice(&SMB2_MAGIC);               // 0..4
        buf.put_u16_le(64);                        // 4..6: StructureSize
        buf.put_u16_le(self.credit_charge);        // 6..8
        buf.put_u32_le(self.status.as_u32());      // 8..12
        buf.put_u16_le(self.command);              // 12..14
        buf.put_u16_le(self.credits);              // 14..16
        buf.put_u32_le(self.flags);                // 16..20
        buf.put_u32_le(self.next_command);         // 20..24
        buf.put_u64_le(self.message_id);           // 24..32
        if (self.flags & FLAGS_ASYNC_COMMAND) != 0 {
            buf.put_u64_le(self.async_id);         // 32..40
        } else {
            buf.put_u32_le(0);                     // 32..36: Reserved
            buf.put_u32_le(self.tree_id);          // 36..40
        }
        buf.put_u64_le(self.session_id);           // 40..48
        buf.put_slice(&self.signature);            // 48..64
    }

    /// Build a client request header.
    pub fn new_request(
        command: Smb2Command,
        message_id: u64,
        session_id: u64,
        tree_id: u32,
        credits: u16,
    ) -> Self {
        Smb2Header {
            credit_charge: 1,
            status: NtStatus::Success,
            command: command as u16,
            credits,
            flags: 0,
            next_command: 0,
            message_id,
            async_id: 0,
            tree_id,
            session_id,
            signature: [0; 16],
        }
    }

    /// Create a response header corresponding to a request header.
    pub fn new_response(req: &Smb2Header, status: NtStatus) -> Self {
        Smb2Header {
            credit_charge: req.credit_charge.max(1),
            status,
            command: req.command,
            credits: req.credits.max(1),
            flags: req.flags | FLAGS_SERVER_TO_REDIR,
            next_command: 0,
            message_id: req.message_id,
            async_id: 0,
            tree_id: req.tree_id,
            session_id: req.session_id,
            signature: [0; 16],
        }
    }

    pub fn is_response(&self) -> bool {
        (self.flags & FLAGS_SERVER_TO_REDIR) != 0
    }

    /// True for the interim STATUS_PENDING reply to an async operation.
    pub fn is_interim(&self) -> bool {
        (self.flags & FLAGS_ASYNC_COMMAND) != 0 && self.status == NtStatus::Pending
    }
}
