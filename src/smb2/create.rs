//! SMB2 CREATE command (open or create a file/directory).
//! MS-SMB2 Section 2.2.13 (Request) and 2.2.14 (Response)

use bitflags::bitflags;
use bytes::{BufMut, BytesMut};

use crate::fscc::{FileAttributes, FileBasicInformation, FileTime};
use crate::smb2::{self, FileId};

/// Impersonation level sent with every open.
pub const IMPERSONATION_IMPERSONATION: u32 = 2;

// Create action values (response)
pub const FILE_SUPERSEDED: u32 = 0;
pub const FILE_OPENED: u32 = 1;
pub const FILE_CREATED: u32 = 2;
pub const FILE_OVERWRITTEN: u32 = 3;

bitflags! {
    /// Desired access mask (MS-SMB2 2.2.13.1).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AccessMask: u32 {
        const FILE_READ_DATA = 0x0000_0001;
        const FILE_WRITE_DATA = 0x0000_0002;
        const FILE_APPEND_DATA = 0x0000_0004;
        const FILE_READ_EA = 0x0000_0008;
        const FILE_WRITE_EA = 0x0000_0010;
        const FILE_EXECUTE = 0x0000_0020;
        const FILE_DELETE_CHILD = 0x0000_0040;
        const FILE_READ_ATTRIBUTES = 0x0000_0080;
        const FILE_WRITE_ATTRIBUTES = 0x0000_0100;
        const DELETE = 0x0001_0000;
        const READ_CONTROL = 0x0002_0000;
        const WRITE_DAC = 0x0004_0000;
        const WRITE_OWNER = 0x0008_0000;
        const SYNCHRONIZE = 0x0010_0000;
        const MAXIMUM_ALLOWED = 0x0200_0000;
        const GENERIC_ALL = 0x1000_0000;
        const GENERIC_EXECUTE = 0x2000_0000;
        const GENERIC_WRITE = 0x4000_0000;
        const GENERIC_READ = 0x8000_0000;
    }
}

impl AccessMask {
    /// Whether an open with this mask may issue QUERY_INFO for attributes.
    pub fn can_read_attributes(&self) -> bool {
        self.intersects(
            AccessMask::FILE_READ_ATTRIBUTES
                | AccessMask::MAXIMUM_ALLOWED
                | AccessMask::GENERIC_ALL
                | AccessMask::GENERIC_READ
                | AccessMask::GENERIC_EXECUTE,
        )
    }

    /// Whether an open with this mask may issue SET_INFO for attributes.
    pub fn can_write_attributes(&self) -> bool {
        self.intersects(
            AccessMask::FILE_WRITE_ATTRIBUTES
                | AccessMask::MAXIMUM_ALLOWED
                | AccessMask::GENERIC_ALL
                | AccessMask::GENERIC_WRITE,
        )
    }

    pub fn can_read_data(&self) -> bool {
        self.intersects(
            AccessMask::FILE_READ_DATA
                | AccessMask::MAXIMUM_ALLOWED
                | AccessMask::GENERIC_ALL
                | AccessMask::GENERIC_READ,
        )
    }

    pub fn can_write_data(&self) -> bool {
        self.intersects(
            AccessMask::FILE_WRITE_DATA
                | AccessMask::FILE_APPEND_DATA
                | AccessMask::MAXIMUM_ALLOWED
                | AccessMask::GENERIC_ALL
                | AccessMask::GENERIC_WRITE,
        )
    }

    pub fn can_delete(&self) -> bool {
        self.intersects(AccessMask::DELETE | AccessMask::MAXIMUM_ALLOWED | AccessMask::GENERIC_ALL)
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ShareAccess: u32 {
        const READ = 0x0000_0001;
        const WRITE = 0x0000_0002;
        const DELETE = 0x0000_0004;
    }
}

bitflags! {
    /// Create options (MS-SMB2 2.2.13).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CreateOptions: u32 {
        const DIRECTORY_FILE = 0x0000_0001;
        const WRITE_THROUGH = 0x0000_0002;
        const SEQUENTIAL_ONLY = 0x0000_0004;
        const NON_DIRECTORY_FILE = 0x0000_0040;
        const DELETE_ON_CLOSE = 0x0000_1000;
        const OPEN_REPARSE_POINT = 0x0020_0000;
    }
}

/// What to do if the target does or doesn't exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum CreateDisposition {
    /// Replace if it exists, create if not.
    Supersede = 0,
    /// Open only if it exists.
    Open = 1,
    /// Create only if it doesn't exist.
    Create = 2,
    /// Open if it exists, create otherwise.
    OpenIf = 3,
    /// Open and truncate only if it exists.
    Overwrite = 4,
    /// Truncate if it exists, create otherwise.
    OverwriteIf = 5,
}

impl CreateDisposition {
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::Supersede),
            1 => Some(Self::Open),
            2 => Some(Self::Create),
            3 => Some(Self::OpenIf),
            4 => Some(Self::Overwrite),
            5 => Some(Self::OverwriteIf),
            _ => None,
        }
    }

    pub fn may_create(&self) -> bool {
        !matches!(self, Self::Open | Self::Overwrite)
    }

    pub fn truncates(&self) -> bool {
        matches!(self, Self::Supersede | Self::Overwrite | Self::OverwriteIf)
    }
}

/// CREATE request.
#[derive(Debug, Clone)]
pub struct CreateRequest {
    pub desired_access: AccessMask,
    pub file_attributes: FileAttributes,
    pub share_access: ShareAccess,
    pub create_disposition: CreateDisposition,
    pub create_options: CreateOptions,
    /// Share-relative path with backslash separators; empty for the share root.
    pub name: String,
}

impl CreateRequest {
    /// MS-SMB2 2.2.13: 56 fixed bytes, then the name.
    pub fn serialize(&self, buf: &mut BytesMut) {
        let name = smb2::string_to_utf16le(&self.name);
        buf.put_u16_le(57);                             // StructureSize
        buf.put_u8(0);                                  // SecurityFlags
        buf.put_u8(0);                                  // RequestedOplockLevel (none)
        buf.put_u32_le(IMPERSONATION_IMPERSONATION);    // ImpersonationLevel
        buf.put_u64_le(0);                              // SmbCreateFlags
        buf.put_u64_le(0);                              // Reserved
        buf.put_u32_le(self.desired_access.bits());
        buf.put_u32_le(self.file_attributes.bits());
        buf.put_u32_le(self.share_access.bits());
        buf.put_u32_le(self.create_disposition as u32);
        buf.put_u32_le(self.create_options.bits());
        buf.put_u16_le((64 + 56) as u16);               // NameOffset
        buf.put_u16_le(name.len() as u16);              // NameLength
        buf.put_u32_le(0);                              // CreateContextsOffset
        buf.put_u32_le(0);                              // CreateContextsLength
        if name.is_empty() {
            buf.put_u8(0); // Buffer must be at least one byte
        } else {
            buf.put_slice(&name);
        }
    }

    pub fn parse(input: &[u8]) -> Option<Self> {
        if input.len() < 56 {
            return None;
        }
        let u32_at = |at: usize| u32::from_le_bytes([input[at], input[at + 1], input[at + 2], input[at + 3]]);
        let name_offset = u16::from_le_bytes([input[44], input[45]]) as usize;
        let name_length = u16::from_le_bytes([input[46], input[47]]) as usize;
        let name = smb2::body_buffer(input, name_offset, name_length)?;

        Some(CreateRequest {
            desired_access: AccessMask::from_bits_retain(u32_at(24)),
            file_attributes: FileAttributes::from_bits_retain(u32_at(28)),
            share_access: ShareAccess::from_bits_retain(u32_at(32)),
            create_disposition: CreateDisposition::from_u32(u32_at(36))?,
            create_options: CreateOptions::from_bits_retain(u32_at(40)),
            name: smb2::utf16le_to_string(name),
        })
    }

    pub fn is_directory_request(&self) -> bool {
        self.create_options.contains(CreateOptions::DIRECTORY_FILE)
    }
}

/// CREATE response.
#[derive(Debug, Clone)]
pub struct CreateResponse {
    pub create_action: u32,
    pub basic: FileBasicInformation,
    pub allocation_size: u64,
    pub end_of_file: u64,
    pub file_id: FileId,
}

impl CreateResponse {
    /// MS-SMB2 2.2.14: StructureSize says 89, the fixed part is 88 bytes.
    pub fn serialize(&self, buf: &mut BytesMut) {
        buf.put_u16_le(89);                                // StructureSize
        buf.put_u8(0);                                     // OplockLevel
        buf.put_u8(0);                                     // Flags
        buf.put_u32_le(self.create_action);
        buf.put_u64_le(self.basic.creation_time.ticks());
        buf.put_u64_le(self.basic.last_access_time.ticks());
        buf.put_u64_le(self.basic.last_write_time.ticks());
        buf.put_u64_le(self.basic.change_time.ticks());
        buf.put_u64_le(self.allocation_size);
        buf.put_u64_le(self.end_of_file);
        buf.put_u32_le(self.basic.file_attributes.bits());
        buf.put_u32_le(0);                                 // Reserved2
        self.file_id.serialize(buf);
        buf.put_u32_le(0);                                 // CreateContextsOffset
        buf.put_u32_le(0);                                 // CreateContextsLength
    }

    pub fn parse(input: &[u8]) -> Option<Self> {
        if input.len() < 88 {
            return None;
        }
        let u64_at = |at: usize| -> Option<u64> { Some(u64::from_le_bytes(input[at..at + 8].try_into().ok()?)) };
        Some(CreateResponse {
            create_action: u32::from_le_bytes(input[4..8].try_into().ok()?),
            basic: FileBasicInformation {
                creation_time: FileTime::from_ticks(u64_at(8)?),
                last_access_time: FileTime::from_ticks(u64_at(16)?),
                last_write_time: FileTime::from_ticks(u64_at(24)?),
                change_time: FileTime::from_ticks(u64_at(32)?),
                file_attributes: FileAttributes::from_bits_retain(u32::from_le_bytes(
                    input[56..60].try_into().ok()?,
                )),
            },
            allocation_size: u64_at(40)?,
            end_of_file: u64_at(48)?,
            file_id: FileId::parse(&input[64..80])?,
        })
    }
}
