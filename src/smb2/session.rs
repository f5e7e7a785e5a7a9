//! SMB2 SESSION_SETUP and LOGOFF commands.
//! MS-SMB2 Section 2.2.5 - 2.2.8

use bytes::{BufMut, BytesMut};

use crate::smb2;

/// SessionFlags: the session is a guest session.
pub const SESSION_FLAG_IS_GUEST: u16 = 0x0001;
/// SessionFlags: the session is anonymous.
pub const SESSION_FLAG_IS_NULL: u16 = 0x0002;

/// SESSION_SETUP request.
#[derive(Debug, Clone)]
pub struct SessionSetupRequest {
    pub flags: u8,
    pub security_mode: u8,
    pub capabilities: u32,
    pub previous_session_id: u64,
    pub security_buffer: Vec<u8>,
}

impl SessionSetupRequest {
    /// Serialize: 24 fixed bytes, security buffer right after.
    pub fn serialize(&self, buf: &mut BytesMut) {
        let sec_offset = (64 + 24) as u16;
        buf.put_u16_le(25);                                 // StructureSize
        buf.put_u8(self.flags);                             // Flags
        buf.put_u8(self.security_mode);                     // SecurityMode
        buf.put_u32_le(self.capabilities);                  // Capabilities
        buf.put_u32_le(0);                                  // Channel
        buf.put_u16_le(sec_offset);                         // SecurityBufferOffset
        buf.put_u16_le(self.security_buffer.len() as u16);  // SecurityBufferLength
        buf.put_u64_le(self.previous_session_id);           // PreviousSessionId
        buf.put_slice(&self.security_buffer);               // Buffer
    }

    /// Parse from body bytes (after 64-byte header).
    pub fn parse(input: &[u8]) -> Option<Self> {
        if input.len() < 24 {
            return None;
        }
        // [0..2] StructureSize = 25
        let flags = input[2];
        let security_mode = input[3];
        let capabilities = u32::from_le_bytes(input[4..8].try_into().ok()?);
        // [8..12] Channel
        let sec_buf_offset = u16::from_le_bytes([input[12], input[13]]) as usize;
        let sec_buf_length = u16::from_le_bytes([input[14], input[15]]) as usize;
        let previous_session_id = u64::from_le_bytes(input[16..24].try_into().ok()?);
        let security_buffer = smb2::body_buffer(input, sec_buf_offset, sec_buf_length)?.to_vec();

        Some(SessionSetupRequest {
            flags,
            security_mode,
            capabilities,
            previous_session_id,
            security_buffer,
        })
    }
}

/// SESSION_SETUP response.
#[derive(Debug, Clone)]
pub struct SessionSetupResponse {
    pub session_flags: u16,
    pub security_buffer: Vec<u8>,
}

impl SessionSetupResponse {
    pub fn serialize(&self, buf: &mut BytesMut) {
        let sec_offset = (64 + 8) as u16; // header + fixed body fields
        buf.put_u16_le(9);                             // StructureSize
        buf.put_u16_le(self.session_flags);            // SessionFlags
        buf.put_u16_le(sec_offset);                    // SecurityBufferOffset
        buf.put_u16_le(self.security_buffer.len() as u16); // SecurityBufferLength
        buf.put_slice(&self.security_buffer);          // SecurityBuffer
    }

    pub fn parse(input: &[u8]) -> Option<Self> {
        if input.len() < 8 {
            return None;
        }
        let session_flags = u16::from_le_bytes([input[2], input[3]]);
        let sec_offset = u16::from_le_bytes([input[4], input[5]]) as usize;
        let sec_length = u16::from_le_bytes([input[6], input[7]]) as usize;
        let security_buffer = smb2::body_buffer(input, sec_offset, sec_length)?.to_vec();
        Some(SessionSetupResponse {
            session_flags,
            security_buffer,
        })
    }

    pub fn is_guest(&self) -> bool {
        (self.session_flags & SESSION_FLAG_IS_GUEST) != 0
    }
}

/// LOGOFF request and response share the same 4-byte body.
pub struct Logoff;

impl Logoff {
    pub fn serialize(&self, buf: &mut BytesMut) {
        buf.put_u16_le(4); // StructureSize
        buf.put_u16_le(0); // Reserved
    }

    pub fn parse(input: &[u8]) -> Option<Self> {
        if input.len() < 4 {
            return None;
        }
        Some(Logoff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_setup_request_roundtrip() {
        let req = SessionSetupRequest {
            flags: 0,
            security_mode: 1,
            capabilities: 0,
            previous_session_id: 0,
            security_buffer: b"token".to_vec(),
        };
        let mut buf = BytesMut::new();
        req.serialize(&mut buf);
        assert_eq!(buf.len(), 24 + 5);
        let parsed = SessionSetupRequest::parse(&buf).unwrap();
        assert_eq!(parsed.security_buffer, b"token");
        assert_eq!(parsed.security_mode, 1);
    }

    #[test]
    fn test_session_setup_response_parse() {
        let resp = SessionSetupResponse {
            session_flags: SESSION_FLAG_IS_GUEST,
            security_buffer: vec![0xA1, 0x07],
        };
        let mut buf = BytesMut::new();
        resp.serialize(&mut buf);
        let parsed = SessionSetupResponse::parse(&buf).unwrap();
        assert!(parsed.is_guest());
        assert_eq!(parsed.security_buffer, vec![0xA1, 0x07]);
    }

    #[test]
    fn test_logoff_body() {
        let mut buf = BytesMut::new();
        Logoff.serialize(&mut buf);
        assert_eq!(buf.len(), 4);
        assert!(Logoff::parse(&buf).is_some());
        assert!(Logoff::parse(&buf[..2]).is_none());
    }
}
