//! SMB2 NEGOTIATE command.
//! MS-SMB2 Section 2.2.3 (Request) and 2.2.4 (Response)

use bytes::{BufMut, BytesMut};

use crate::smb2;

/// SecurityMode: signing enabled
pub const SIGNING_ENABLED: u16 = 0x0001;
/// SecurityMode: signing required
pub const SIGNING_REQUIRED: u16 = 0x0002;

/// NEGOTIATE request.
#[derive(Debug, Clone)]
pub struct NegotiateRequest {
    pub security_mode: u16,
    pub capabilities: u32,
    pub client_guid: [u8; 16],
    pub dialects: Vec<u16>,
}

impl NegotiateRequest {
    /// Serialize the request body: 36 fixed bytes followed by the dialect array.
    pub fn serialize(&self, buf: &mut BytesMut) {
        buf.put_u16_le(36);                              // StructureSize
        buf.put_u16_le(self.dialects.len() as u16);      // DialectCount
        buf.put_u16_le(self.security_mode);              // SecurityMode
        buf.put_u16_le(0);                               // Reserved
        buf.put_u32_le(self.capabilities);               // Capabilities
        buf.put_slice(&self.client_guid);                // ClientGuid
        buf.put_u64_le(0);                               // ClientStartTime
        for dialect in &self.dialects {
            buf.put_u16_le(*dialect);                    // Dialects
        }
    }

    /// Parse from the body bytes (after the 64-byte SMB2 header).
    pub fn parse(input: &[u8]) -> Option<Self> {
        if input.len() < 36 {
            return None;
        }
        let dialect_count = u16::from_le_bytes([input[2], input[3]]) as usize;
        let security_mode = u16::from_le_bytes([input[4], input[5]]);
        // [6..8] reserved
        let capabilities = u32::from_le_bytes(input[8..12].try_into().ok()?);
        let mut client_guid = [0u8; 16];
        client_guid.copy_from_slice(&input[12..28]);
        // [28..36] client start time

        let dialects = input[36..]
            .chunks_exact(2)
            .take(dialect_count)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();

        Some(NegotiateRequest {
            security_mode,
            capabilities,
            client_guid,
            dialects,
        })
    }
}

/// NEGOTIATE response.
#[derive(Debug, Clone)]
pub struct NegotiateResponse {
    pub security_mode: u16,
    pub dialect: u16,
    pub server_guid: [u8; 16],
    pub capabilities: u32,
    pub max_transact_size: u32,
    pub max_read_size: u32,
    pub max_write_size: u32,
    pub system_time: u64,
    pub security_buffer: Vec<u8>,
}

impl NegotiateResponse {
    /// Serialize the response body (64 fixed bytes, then the security buffer).
    pub fn serialize(&self, buf: &mut BytesMut) {
        let sec_offset = (64 + 64) as u16; // header + fixed body

        buf.put_u16_le(65);                        // StructureSize
        buf.put_u16_le(self.security_mode);        // SecurityMode
        buf.put_u16_le(self.dialect);              // DialectRevision
        buf.put_u16_le(0);                         // NegotiateContextCount
        buf.put_slice(&self.server_guid);          // ServerGuid
        buf.put_u32_le(self.capabilities);         // Capabilities
        buf.put_u32_le(self.max_transact_size);    // MaxTransactSize
        buf.put_u32_le(self.max_read_size);        // MaxReadSize
        buf.put_u32_le(self.max_write_size);       // MaxWriteSize
        buf.put_u64_le(self.system_time);          // SystemTime
        buf.put_u64_le(0);                         // ServerStartTime
        buf.put_u16_le(sec_offset);                // SecurityBufferOffset
        buf.put_u16_le(self.security_buffer.len() as u16); // SecurityBufferLength
        buf.put_u32_le(0);                         // NegotiateContextOffset
        buf.put_slice(&self.security_buffer);      // SecurityBuffer
    }

    /// Parse the response body.
    pub fn parse(input: &[u8]) -> Option<Self> {
        if input.len() < 64 {
            return None;
        }
        if u16::from_le_bytes([input[0], input[1]]) != 65 {
            return None;
        }
        let security_mode = u16::from_le_bytes([input[2], input[3]]);
        let dialect = u16::from_le_bytes([input[4], input[5]]);
        // [6..8] NegotiateContextCount
        let mut server_guid = [0u8; 16];
        server_guid.copy_from_slice(&input[8..24]);
        let capabilities = u32::from_le_bytes(input[24..28].try_into().ok()?);
        let max_transact_size = u32::from_le_bytes(input[28..32].try_into().ok()?);
        let max_read_size = u32::from_le_bytes(input[32..36].try_into().ok()?);
        let max_write_size = u32::from_le_bytes(input[36..40].try_into().ok()?);
        let system_time = u64::from_le_bytes(input[40..48].try_into().ok()?);
        // [48..56] ServerStartTime
        let sec_offset = u16::from_le_bytes([input[56], input[57]]) as usize;
        let sec_length = u16::from_le_bytes([input[58], input[59]]) as usize;
        let security_buffer = smb2::body_buffer(input, sec_offset, sec_length)?.to_vec();

        Some(NegotiateResponse {
            security_mode,
            dialect,
            server_guid,
            capabilities,
            max_transact_size,
            max_read_size,
            max_write_size,
            system_time,
            security_buffer,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negotiate_request_serialize_parse() {
        let req = NegotiateRequest {
            security_mode: SIGNING_ENABLED,
            capabilities: 0,
            client_guid: [0x11; 16],
            dialects: vec![0x0202, 0x0210],
        };
        let mut buf = BytesMut::new();
        req.serialize(&mut buf);
        assert_eq!(buf.len(), 36 + 4);
        assert_eq!(u16::from_le_bytes([buf[0], buf[1]]), 36);

        let parsed = NegotiateRequest::parse(&buf).unwrap();
        assert_eq!(parsed.dialects, vec![0x0202, 0x0210]);
        assert_eq!(parsed.client_guid, [0x11; 16]);
    }

    #[test]
    fn test_negotiate_response_layout() {
        let resp = NegotiateResponse {
            security_mode: 1,
            dialect: 0x0210,
            server_guid: [0xAA; 16],
            capabilities: 0,
            max_transact_size: 65536,
            max_read_size: 65536,
            max_write_size: 32768,
            system_time: 0x01D0_0000_0000_0000,
            security_buffer: vec![1, 2, 3],
        };
        let mut buf = BytesMut::new();
        resp.serialize(&mut buf);
        assert_eq!(u16::from_le_bytes([buf[0], buf[1]]), 65);
        assert_eq!(u16::from_le_bytes([buf[4], buf[5]]), 0x0210);
        assert_eq!(u16::from_le_bytes([buf[58], buf[59]]), 3);

        let parsed = NegotiateResponse::parse(&buf).unwrap();
        assert_eq!(parsed.dialect, 0x0210);
        assert_eq!(parsed.max_write_size, 32768);
        assert_eq!(parsed.security_buffer, vec![1, 2, 3]);
    }

    #[test]
    fn test_negotiate_response_truncated_security_buffer() {
        let resp = NegotiateResponse {
            security_mode: 1,
            dialect: 0x0202,
            server_guid: [0; 16],
            capabilities: 0,
            max_transact_size: 1,
            max_read_size: 1,
            max_write_size: 1,
            system_time: 0,
            security_buffer: vec![9; 10],
        };
        let mut buf = BytesMut::new();
        resp.serialize(&mut buf);
        assert!(NegotiateResponse::parse(&buf[..70]).is_none());
    }
}
