//! File system control structures carried inside QUERY_INFO, SET_INFO and
//! QUERY_DIRECTORY buffers.
//! Reference: [MS-FSCC]: File System Control Codes

mod directory;
mod info;
mod time;

pub use directory::{decode_directory_entries, encode_directory_entries, DirectoryEntry};
pub use info::{
    BasicInfoPatch, FileAllInformation, FileBasicInformation, FileDispositionInformation,
    FileStandardInformation, FILE_ALL_INFORMATION_MIN_SIZE, FILE_BASIC_INFORMATION_SIZE,
    FILE_STANDARD_INFORMATION_SIZE,
};
pub use time::{FileTime, TimeField, FILETIME_UNIX_DIFF};

use bitflags::bitflags;

bitflags! {
    /// File attribute bits (MS-FSCC 2.6). Bits this crate doesn't name are kept.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FileAttributes: u32 {
        const READONLY = 0x0000_0001;
        const HIDDEN = 0x0000_0002;
        const SYSTEM = 0x0000_0004;
        const DIRECTORY = 0x0000_0010;
        const ARCHIVE = 0x0000_0020;
        const NORMAL = 0x0000_0080;
        const TEMPORARY = 0x0000_0100;
        const SPARSE_FILE = 0x0000_0200;
        const REPARSE_POINT = 0x0000_0400;
        const COMPRESSED = 0x0000_0800;
        const OFFLINE = 0x0000_1000;
        const NOT_CONTENT_INDEXED = 0x0000_2000;
        const ENCRYPTED = 0x0000_4000;
        const INTEGRITY_STREAM = 0x0000_8000;
        const NO_SCRUB_DATA = 0x0002_0000;
    }
}

impl FileAttributes {
    pub fn is_directory(&self) -> bool {
        self.contains(FileAttributes::DIRECTORY)
    }
}
