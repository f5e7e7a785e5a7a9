//! FileIdBothDirectoryInformation entries returned by QUERY_DIRECTORY.
//! MS-FSCC 2.4.17

use bytes::{BufMut, BytesMut};

use crate::error::{Error, Result};
use crate::fscc::{FileAttributes, FileBasicInformation, FileTime};
use crate::smb2;

/// Fixed part of an entry, up to the start of FileName.
const ENTRY_FIXED_SIZE: usize = 104;
const SHORT_NAME_SIZE: usize = 24;

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub name: String,
    pub file_index: u32,
    pub basic: FileBasicInformation,
    pub end_of_file: u64,
    pub allocation_size: u64,
    pub file_id: u64,
}

impl DirectoryEntry {
    /// `.` and `..`, which servers include in every listing.
    pub fn is_virtual(&self) -> bool {
        self.name == "." || self.name == ".."
    }

    pub fn is_directory(&self) -> bool {
        self.basic.file_attributes.is_directory()
    }

    /// Encoded size of this entry before alignment padding.
    pub fn encoded_len(&self) -> usize {
        ENTRY_FIXED_SIZE + self.name.encode_utf16().count() * 2
    }

    /// Encoded size including padding to the next 8-byte boundary.
    pub fn aligned_len(&self) -> usize {
        (self.encoded_len() + 7) & !7
    }
}

/// Serialize entries back to back, each 8-byte aligned, the last one with
/// NextEntryOffset 0.
pub fn encode_directory_entries(entries: &[DirectoryEntry]) -> Vec<u8> {
    let mut buf = BytesMut::new();
    for (i, entry) in entries.iter().enumerate() {
        let name = smb2::string_to_utf16le(&entry.name);
        let padded = entry.aligned_len();
        let last = i + 1 == entries.len();

        buf.put_u32_le(if last { 0 } else { padded as u32 }); // NextEntryOffset
        buf.put_u32_le(entry.file_index);
        buf.put_u64_le(entry.basic.creation_time.ticks());
        buf.put_u64_le(entry.basic.last_access_time.ticks());
        buf.put_u64_le(entry.basic.last_write_time.ticks());
        buf.put_u64_le(entry.basic.change_time.ticks());
        buf.put_u64_le(entry.end_of_file);
        buf.put_u64_le(entry.allocation_size);
        buf.put_u32_le(entry.basic.file_attributes.bits());
        buf.put_u32_le(name.len() as u32);          // FileNameLength
        buf.put_u32_le(0);                          // EaSize
        buf.put_u8(0);                              // ShortNameLength
        buf.put_u8(0);                              // Reserved1
        buf.put_slice(&[0u8; SHORT_NAME_SIZE]);     // ShortName
        buf.put_u16_le(0);                          // Reserved2
        buf.put_u64_le(entry.file_id);              // FileId
        buf.put_slice(&name);

        if !last {
            buf.put_bytes(0, padded - entry.encoded_len());
        }
    }
    buf.to_vec()
}

fn le_u32(b: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([b[at], b[at + 1], b[at + 2], b[at + 3]])
}

fn le_u64(b: &[u8], at: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&b[at..at + 8]);
    u64::from_le_bytes(raw)
}

/// Walk a QUERY_DIRECTORY output buffer. An empty buffer yields no entries.
pub fn decode_directory_entries(input: &[u8]) -> Result<Vec<DirectoryEntry>> {
    let mut entries = Vec::new();
    let mut pos = 0usize;
    if input.is_empty() {
        return Ok(entries);
    }
    loop {
        let rest = &input[pos..];
        if rest.len() < ENTRY_FIXED_SIZE {
            return Err(Error::MalformedResponse(format!(
                "directory entry at {} truncated ({} bytes left)",
                pos,
                rest.len()
            )));
        }
        let next = le_u32(rest, 0) as usize;
        let name_len = le_u32(rest, 60) as usize;
        let name = rest
            .get(ENTRY_FIXED_SIZE..ENTRY_FIXED_SIZE + name_len)
            .ok_or_else(|| {
                Error::MalformedResponse(format!(
                    "directory entry at {} has a {}-byte name past the buffer end",
                    pos, name_len
                ))
            })?;

        entries.push(DirectoryEntry {
            name: smb2::utf16le_to_string(name),
            file_index: le_u32(rest, 4),
            basic: FileBasicInformation {
                creation_time: FileTime::from_ticks(le_u64(rest, 8)),
                last_access_time: FileTime::from_ticks(le_u64(rest, 16)),
                last_write_time: FileTime::from_ticks(le_u64(rest, 24)),
                change_time: FileTime::from_ticks(le_u64(rest, 32)),
                file_attributes: FileAttributes::from_bits_retain(le_u32(rest, 56)),
            },
            end_of_file: le_u64(rest, 40),
            allocation_size: le_u64(rest, 48),
            file_id: le_u64(rest, 96),
        });

        if next == 0 {
            return Ok(entries);
        }
        if next < ENTRY_FIXED_SIZE || next > rest.len() {
            return Err(Error::MalformedResponse(format!(
                "directory entry at {} has bad NextEntryOffset {}",
                pos, next
            )));
        }
        pos += next;
    }
}
