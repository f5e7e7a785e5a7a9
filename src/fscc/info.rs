//! Fixed-layout file information classes.

use bytes::{BufMut, BytesMut};

use crate::error::{Error, Result};
use crate::fscc::{FileAttributes, FileTime, TimeField};
use crate::smb2;

/// FileBasicInformation record length (MS-FSCC 2.4.7).
pub const FILE_BASIC_INFORMATION_SIZE: usize = 40;
/// FileStandardInformation record length (MS-FSCC 2.4.41).
pub const FILE_STANDARD_INFORMATION_SIZE: usize = 24;
/// FileAllInformation fixed part, up to and including FileNameLength (MS-FSCC 2.4.2).
pub const FILE_ALL_INFORMATION_MIN_SIZE: usize = 100;

fn read_u64(input: &[u8], at: usize) -> u64 {
    u64::from_le_bytes(input[at..at + 8].try_into().unwrap_or([0; 8]))
}

fn read_u32(input: &[u8], at: usize) -> u32 {
    u32::from_le_bytes(input[at..at + 4].try_into().unwrap_or([0; 4]))
}

fn ensure_len(input: &[u8], needed: usize, what: &str) -> Result<()> {
    if input.len() < needed {
        return Err(Error::MalformedResponse(format!(
            "{} needs {} bytes, got {}",
            what,
            needed,
            input.len()
        )));
    }
    Ok(())
}

/// Timestamps and attributes of a file, as reported by the server.
///
/// Every field is a concrete value: a query never yields "do not update".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileBasicInformation {
    pub creation_time: FileTime,
    pub last_access_time: FileTime,
    pub last_write_time: FileTime,
    pub change_time: FileTime,
    pub file_attributes: FileAttributes,
}

impl FileBasicInformation {
    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_u64_le(self.creation_time.ticks());
        buf.put_u64_le(self.last_access_time.ticks());
        buf.put_u64_le(self.last_write_time.ticks());
        buf.put_u64_le(self.change_time.ticks());
        buf.put_u32_le(self.file_attributes.bits());
        buf.put_u32_le(0); // Reserved
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(FILE_BASIC_INFORMATION_SIZE);
        self.encode_into(&mut buf);
        buf.to_vec()
    }

    pub fn decode(input: &[u8]) -> Result<Self> {
        ensure_len(input, FILE_BASIC_INFORMATION_SIZE, "FileBasicInformation")?;
        Ok(FileBasicInformation {
            creation_time: FileTime::from_ticks(read_u64(input, 0)),
            last_access_time: FileTime::from_ticks(read_u64(input, 8)),
            last_write_time: FileTime::from_ticks(read_u64(input, 16)),
            change_time: FileTime::from_ticks(read_u64(input, 24)),
            file_attributes: FileAttributes::from_bits_retain(read_u32(input, 32)),
        })
    }
}

/// A SET_INFO FileBasicInformation request.
///
/// Each time slot is either a concrete value or [`TimeField::DontUpdate`].
/// The attributes word is always sent; empty attributes mean "unchanged",
/// so the usual pattern is to carry the attributes from a prior query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BasicInfoPatch {
    pub creation_time: TimeField,
    pub last_access_time: TimeField,
    pub last_write_time: TimeField,
    pub change_time: TimeField,
    pub file_attributes: FileAttributes,
}

impl BasicInfoPatch {
    /// A patch that touches no timestamp and re-sends `attributes` as they are.
    pub fn keeping(attributes: FileAttributes) -> Self {
        BasicInfoPatch {
            file_attributes: attributes,
            ..Default::default()
        }
    }

    pub fn with_creation_time(mut self, t: FileTime) -> Self {
        self.creation_time = TimeField::Set(t);
        self
    }

    pub fn with_last_access_time(mut self, t: FileTime) -> Self {
        self.last_access_time = TimeField::Set(t);
        self
    }

    pub fn with_last_write_time(mut self, t: FileTime) -> Self {
        self.last_write_time = TimeField::Set(t);
        self
    }

    pub fn with_change_time(mut self, t: FileTime) -> Self {
        self.change_time = TimeField::Set(t);
        self
    }

    pub fn with_attributes(mut self, attributes: FileAttributes) -> Self {
        self.file_attributes = attributes;
        self
    }

    /// Reject concrete values the wire can't distinguish from the sentinel.
    pub fn validate(&self) -> Result<()> {
        let slots = [
            ("creation_time", self.creation_time),
            ("last_access_time", self.last_access_time),
            ("last_write_time", self.last_write_time),
            ("change_time", self.change_time),
        ];
        for (name, slot) in slots {
            if slot == TimeField::Set(FileTime::ZERO) {
                return Err(Error::InvalidArgument(format!(
                    "{} cannot be set to tick 0, which is the do-not-update sentinel",
                    name
                )));
            }
        }
        Ok(())
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        self.validate()?;
        let mut buf = BytesMut::with_capacity(FILE_BASIC_INFORMATION_SIZE);
        buf.put_u64_le(self.creation_time.to_wire());
        buf.put_u64_le(self.last_access_time.to_wire());
        buf.put_u64_le(self.last_write_time.to_wire());
        buf.put_u64_le(self.change_time.to_wire());
        buf.put_u32_le(self.file_attributes.bits());
        buf.put_u32_le(0); // Reserved
        Ok(buf.to_vec())
    }

    /// Parse a SET_INFO buffer; zero time slots become `DontUpdate`.
    pub fn decode(input: &[u8]) -> Result<Self> {
        ensure_len(input, FILE_BASIC_INFORMATION_SIZE, "FileBasicInformation")?;
        Ok(BasicInfoPatch {
            creation_time: TimeField::from_wire(read_u64(input, 0)),
            last_access_time: TimeField::from_wire(read_u64(input, 8)),
            last_write_time: TimeField::from_wire(read_u64(input, 16)),
            change_time: TimeField::from_wire(read_u64(input, 24)),
            file_attributes: FileAttributes::from_bits_retain(read_u32(input, 32)),
        })
    }
}

impl From<FileBasicInformation> for BasicInfoPatch {
    /// Every slot set to the given value.
    fn from(info: FileBasicInformation) -> Self {
        BasicInfoPatch {
            creation_time: TimeField::Set(info.creation_time),
            last_access_time: TimeField::Set(info.last_access_time),
            last_write_time: TimeField::Set(info.last_write_time),
            change_time: TimeField::Set(info.change_time),
            file_attributes: info.file_attributes,
        }
    }
}

/// MS-FSCC 2.4.41
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FileStandardInformation {
    pub allocation_size: u64,
    pub end_of_file: u64,
    pub number_of_links: u32,
    pub delete_pending: bool,
    pub directory: bool,
}

impl FileStandardInformation {
    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_u64_le(self.allocation_size);
        buf.put_u64_le(self.end_of_file);
        buf.put_u32_le(self.number_of_links);
        buf.put_u8(self.delete_pending as u8);
        buf.put_u8(self.directory as u8);
        buf.put_u16_le(0); // Reserved
    }

    pub fn decode(input: &[u8]) -> Result<Self> {
        ensure_len(input, FILE_STANDARD_INFORMATION_SIZE, "FileStandardInformation")?;
        Ok(FileStandardInformation {
            allocation_size: read_u64(input, 0),
            end_of_file: read_u64(input, 8),
            number_of_links: read_u32(input, 16),
            delete_pending: input[20] != 0,
            directory: input[21] != 0,
        })
    }
}

/// MS-FSCC 2.4.2: Basic + Standard + Internal + EA + Access + Position +
/// Mode + Alignment + Name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAllInformation {
    pub basic: FileBasicInformation,
    pub standard: FileStandardInformation,
    pub index_number: u64,
    pub ea_size: u32,
    pub access_flags: u32,
    pub current_byte_offset: u64,
    pub mode: u32,
    pub alignment_requirement: u32,
    pub name: String,
}

impl FileAllInformation {
    pub fn encode(&self) -> Vec<u8> {
        let name = smb2::string_to_utf16le(&self.name);
        let mut buf = BytesMut::with_capacity(FILE_ALL_INFORMATION_MIN_SIZE + name.len());
        self.basic.encode_into(&mut buf);
        self.standard.encode_into(&mut buf);
        buf.put_u64_le(self.index_number);          // InternalInformation
        buf.put_u32_le(self.ea_size);               // EaInformation
        buf.put_u32_le(self.access_flags);          // AccessInformation
        buf.put_u64_le(self.current_byte_offset);   // PositionInformation
        buf.put_u32_le(self.mode);                  // ModeInformation
        buf.put_u32_le(self.alignment_requirement); // AlignmentInformation
        buf.put_u32_le(name.len() as u32);          // NameInformation.FileNameLength
        buf.put_slice(&name);
        buf.to_vec()
    }

    pub fn decode(input: &[u8]) -> Result<Self> {
        ensure_len(input, FILE_ALL_INFORMATION_MIN_SIZE, "FileAllInformation")?;
        let name_len = read_u32(input, 96) as usize;
        let name_bytes = input
            .get(FILE_ALL_INFORMATION_MIN_SIZE..FILE_ALL_INFORMATION_MIN_SIZE + name_len)
            .ok_or_else(|| {
                Error::MalformedResponse(format!(
                    "FileAllInformation name of {} bytes overruns {}-byte buffer",
                    name_len,
                    input.len()
                ))
            })?;
        Ok(FileAllInformation {
            basic: FileBasicInformation::decode(&input[0..40])?,
            standard: FileStandardInformation::decode(&input[40..64])?,
            index_number: read_u64(input, 64),
            ea_size: read_u32(input, 72),
            access_flags: read_u32(input, 76),
            current_byte_offset: read_u64(input, 80),
            mode: read_u32(input, 88),
            alignment_requirement: read_u32(input, 92),
            name: smb2::utf16le_to_string(name_bytes),
        })
    }
}

/// MS-FSCC 2.4.11: a single DeletePending byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileDispositionInformation {
    pub delete_pending: bool,
}

impl FileDispositionInformation {
    pub fn encode(&self) -> Vec<u8> {
        vec![self.delete_pending as u8]
    }

    pub fn decode(input: &[u8]) -> Result<Self> {
        ensure_len(input, 1, "FileDispositionInformation")?;
        Ok(FileDispositionInformation {
            delete_pending: input[0] != 0,
        })
    }
}
