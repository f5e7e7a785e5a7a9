//! Paged directory enumeration over QUERY_DIRECTORY.

use std::collections::VecDeque;

use bytes::BytesMut;
use tracing::debug;

use crate::client::handle::FileHandle;
use crate::error::{Error, Result};
use crate::fscc::{decode_directory_entries, DirectoryEntry};
use crate::smb2::query::{
    QueryDirectoryRequest, QueryDirectoryResponse, FILE_ID_BOTH_DIRECTORY_INFORMATION,
    SL_RESTART_SCAN,
};
use crate::smb2::status::NtStatus;
use crate::smb2::Smb2Command;

/// Entries of one directory, fetched a page at a time.
///
/// The listing owns the directory handle and closes it once the server
/// reports no more files. A finished listing cannot be restarted; open a
/// new one instead. `.` and `..` are returned like any other entry.
#[derive(Debug)]
pub struct DirectoryListing {
    handle: Option<FileHandle>,
    buffered: VecDeque<DirectoryEntry>,
    buffer_size: u32,
    first: bool,
}

impl DirectoryListing {
    pub(crate) fn new(handle: FileHandle, buffer_size: u32) -> Self {
        DirectoryListing {
            handle: Some(handle),
            buffered: VecDeque::new(),
            buffer_size,
            first: true,
        }
    }

    /// Path of the directory being listed, while the listing is still open.
    pub fn path(&self) -> Option<&str> {
        self.handle.as_ref().map(|h| h.path())
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_none() && self.buffered.is_empty()
    }

    /// Next entry, or `None` once the directory is exhausted.
    pub async fn next_entry(&mut self) -> Result<Option<DirectoryEntry>> {
        loop {
            if let Some(entry) = self.buffered.pop_front() {
                return Ok(Some(entry));
            }
            if self.handle.is_none() {
                return Ok(None);
            }
            self.fetch_page().await?;
        }
    }

    /// Drain the remaining entries.
    pub async fn collect_entries(mut self) -> Result<Vec<DirectoryEntry>> {
        let mut entries = Vec::new();
        while let Some(entry) = self.next_entry().await? {
            entries.push(entry);
        }
        Ok(entries)
    }

    async fn fetch_page(&mut self) -> Result<()> {
        let Some(handle) = self.handle.as_ref() else {
            return Ok(());
        };
        let req = QueryDirectoryRequest {
            file_information_class: FILE_ID_BOTH_DIRECTORY_INFORMATION,
            flags: if self.first { SL_RESTART_SCAN } else { 0 },
            file_index: 0,
            file_id: handle.file_id(),
            file_name_pattern: "*".to_string(),
            output_buffer_length: self.buffer_size,
        };
        let mut body = BytesMut::with_capacity(40);
        req.serialize(&mut body);
        self.first = false;

        let resp = handle.send(Smb2Command::QueryDirectory, &body).await?;
        if resp.status() == NtStatus::NoMoreFiles {
            return self.finish().await;
        }
        let resp = resp.expect_success(Smb2Command::QueryDirectory, handle.path())?;
        let page = QueryDirectoryResponse::parse(&resp.body)
            .ok_or_else(|| Error::MalformedResponse("QUERY_DIRECTORY response".into()))?;
        let entries = decode_directory_entries(&page.data)?;
        debug!(path = %handle.path(), count = entries.len(), "Directory page");
        if entries.is_empty() {
            return self.finish().await;
        }
        self.buffered.extend(entries);
        Ok(())
    }

    async fn finish(&mut self) -> Result<()> {
        if let Some(mut handle) = self.handle.take() {
            handle.close().await?;
        }
        Ok(())
    }
}
