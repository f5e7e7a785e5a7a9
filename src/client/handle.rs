//! Open file and directory handles.

use std::fmt;
use std::sync::Arc;

use bytes::BytesMut;
use tracing::{debug, warn};

use crate::client::connection::{Connection, Response};
use crate::client::session::SessionState;
use crate::client::share::TreeState;
use crate::error::{Error, Result};
use crate::fscc::{BasicInfoPatch, FileAllInformation, FileBasicInformation, FileDispositionInformation};
use crate::metadata;
use crate::smb2::close::CloseRequest;
use crate::smb2::create::AccessMask;
use crate::smb2::flush::{FlushRequest, FlushResponse};
use crate::smb2::query::{SetInfoRequest, FILE_DISPOSITION_INFORMATION, SMB2_0_INFO_FILE};
use crate::smb2::read::{ReadRequest, ReadResponse};
use crate::smb2::status::NtStatus;
use crate::smb2::write::{WriteRequest, WriteResponse};
use crate::smb2::{FileId, Smb2Command};

/// An open file or directory on a share.
///
/// Close it with [`FileHandle::close`]. A handle dropped while still open
/// inside a tokio runtime has a best-effort CLOSE sent in the background.
pub struct FileHandle {
    conn: Connection,
    session: Arc<SessionState>,
    tree: Arc<TreeState>,
    file_id: FileId,
    path: String,
    access: AccessMask,
    is_directory: bool,
    closed: bool,
}

impl fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileHandle")
            .field("path", &self.path)
            .field("file_id", &self.file_id)
            .field("access", &self.access)
            .field("is_directory", &self.is_directory)
            .field("closed", &self.closed)
            .finish()
    }
}

impl FileHandle {
    pub(crate) fn new(
        conn: Connection,
        session: Arc<SessionState>,
        tree: Arc<TreeState>,
        file_id: FileId,
        path: String,
        access: AccessMask,
        is_directory: bool,
    ) -> Self {
        FileHandle {
            conn,
            session,
            tree,
            file_id,
            path,
            access,
            is_directory,
            closed: false,
        }
    }

    pub fn file_id(&self) -> FileId {
        self.file_id
    }

    /// Share-relative path this handle was opened with.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Access requested when the handle was opened.
    pub fn access(&self) -> AccessMask {
        self.access
    }

    pub fn is_directory(&self) -> bool {
        self.is_directory
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Closed handles report `HandleClosed`; a dead connection reports
    /// `Connection`; a logged-off session or disconnected share makes the
    /// handle `HandleClosed` too.
    pub(crate) fn ensure_usable(&self) -> Result<()> {
        if self.closed {
            return Err(Error::HandleClosed);
        }
        self.conn.ensure_open()?;
        if !self.session.is_active() || !self.tree.is_connected() {
            return Err(Error::HandleClosed);
        }
        Ok(())
    }

    pub(crate) async fn send(&self, command: Smb2Command, body: &[u8]) -> Result<Response> {
        self.ensure_usable()?;
        self.conn.send(command, self.session.id, self.tree.id, body).await
    }

    pub async fn query_basic_information(&self) -> Result<FileBasicInformation> {
        metadata::query_basic_information(self).await
    }

    pub async fn set_basic_information(&self, patch: &BasicInfoPatch) -> Result<()> {
        metadata::set_basic_information(self, patch).await
    }

    pub async fn query_all_information(&self) -> Result<FileAllInformation> {
        metadata::query_all_information(self).await
    }

    /// Mark the file for deletion when its last handle closes.
    pub(crate) async fn set_delete_pending(&self, delete_pending: bool) -> Result<()> {
        let info = FileDispositionInformation { delete_pending }.encode();
        let req = SetInfoRequest {
            info_type: SMB2_0_INFO_FILE,
            file_info_class: FILE_DISPOSITION_INFORMATION,
            additional_information: 0,
            file_id: self.file_id,
            buffer: &info,
        };
        let mut body = BytesMut::with_capacity(32 + info.len());
        req.serialize(&mut body);
        self.send(Smb2Command::SetInfo, &body)
            .await?
            .expect_success(Smb2Command::SetInfo, &self.path)?;
        Ok(())
    }

    /// Read up to `len` bytes at `offset`. Fewer bytes come back at end of file.
    pub async fn read(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let chunk = self.conn.max_read_size() as usize;
        let mut out = Vec::with_capacity(len.min(chunk));
        while out.len() < len {
            let want = (len - out.len()).min(chunk);
            let data = self.read_chunk(offset + out.len() as u64, want as u32).await?;
            let got = data.len();
            out.extend_from_slice(&data);
            if got < want {
                break;
            }
        }
        Ok(out)
    }

    /// Read from offset 0 until end of file.
    pub async fn read_to_end(&self) -> Result<Vec<u8>> {
        let chunk = self.conn.max_read_size();
        let mut out = Vec::new();
        loop {
            let data = self.read_chunk(out.len() as u64, chunk).await?;
            if data.is_empty() {
                return Ok(out);
            }
            out.extend_from_slice(&data);
        }
    }

    async fn read_chunk(&self, offset: u64, length: u32) -> Result<Vec<u8>> {
        let req = ReadRequest {
            length,
            offset,
            file_id: self.file_id,
            minimum_count: 0,
        };
        let mut body = BytesMut::with_capacity(49);
        req.serialize(&mut body);

        let resp = self.send(Smb2Command::Read, &body).await?;
        if resp.status() == NtStatus::EndOfFile {
            return Ok(Vec::new());
        }
        let resp = resp.expect_success(Smb2Command::Read, &self.path)?;
        let read = ReadResponse::parse(&resp.body)
            .ok_or_else(|| Error::MalformedResponse("READ response".into()))?;
        if read.data.len() > length as usize {
            return Err(Error::MalformedResponse(format!(
                "READ returned {} bytes for a {}-byte request",
                read.data.len(),
                length
            )));
        }
        Ok(read.data)
    }

    /// Write `data` at `offset`, split into requests no larger than the
    /// negotiated write size. Returns the number of bytes written.
    pub async fn write(&self, offset: u64, data: &[u8]) -> Result<usize> {
        self.ensure_usable()?;
        let chunk = self.conn.max_write_size() as usize;
        let mut written = 0usize;
        for piece in data.chunks(chunk) {
            let req = WriteRequest {
                offset: offset + written as u64,
                file_id: self.file_id,
                data: piece,
            };
            let mut body = BytesMut::with_capacity(48 + piece.len());
            req.serialize(&mut body);

            let resp = self
                .send(Smb2Command::Write, &body)
                .await?
                .expect_success(Smb2Command::Write, &self.path)?;
            let count = WriteResponse::parse(&resp.body)
                .ok_or_else(|| Error::MalformedResponse("WRITE response".into()))?
                .count as usize;
            written += count;
            if count < piece.len() {
                warn!(path = %self.path, count, requested = piece.len(), "Short write");
                break;
            }
        }
        debug!(path = %self.path, offset, written, "Wrote");
        Ok(written)
    }

    pub async fn flush(&self) -> Result<()> {
        let mut body = BytesMut::with_capacity(24);
        FlushRequest { file_id: self.file_id }.serialize(&mut body);
        let resp = self
            .send(Smb2Command::Flush, &body)
            .await?
            .expect_success(Smb2Command::Flush, &self.path)?;
        FlushResponse::parse(&resp.body)
            .ok_or_else(|| Error::MalformedResponse("FLUSH response".into()))?;
        Ok(())
    }

    /// Send CLOSE. The handle is unusable afterwards whatever the outcome;
    /// closing it again fails with `HandleClosed`.
    pub async fn close(&mut self) -> Result<()> {
        if let Err(e) = self.ensure_usable() {
            self.tree.forget(self.file_id);
            return Err(e);
        }
        self.closed = true;
        self.tree.forget(self.file_id);

        let mut body = BytesMut::with_capacity(24);
        CloseRequest { flags: 0, file_id: self.file_id }.serialize(&mut body);
        self.conn
            .send(Smb2Command::Close, self.session.id, self.tree.id, &body)
            .await?
            .expect_success(Smb2Command::Close, &self.path)?;
        debug!(path = %self.path, file_id = self.file_id.volatile, "Closed");
        Ok(())
    }
}

impl Drop for FileHandle {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        self.tree.forget(self.file_id);
        if self.ensure_usable().is_err() {
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(path = %self.path, "Handle dropped outside a runtime; not closed");
            return;
        };
        warn!(path = %self.path, "Handle dropped without close; closing in background");

        let conn = self.conn.clone();
        let (session_id, tree_id, file_id) = (self.session.id, self.tree.id, self.file_id);
        let path = std::mem::take(&mut self.path);
        runtime.spawn(async move {
            let mut body = BytesMut::with_capacity(24);
            CloseRequest { flags: 0, file_id }.serialize(&mut body);
            if let Err(e) = conn.send(Smb2Command::Close, session_id, tree_id, &body).await {
                debug!(path = %path, error = %e, "Background close failed");
            }
        });
    }
}
