//! An attached share and its path-based operations.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::BytesMut;
use tracing::{debug, info, warn};

use crate::client::connection::Connection;
use crate::client::directory::DirectoryListing;
use crate::client::handle::FileHandle;
use crate::client::session::SessionState;
use crate::error::{Error, Result};
use crate::fscc::{BasicInfoPatch, FileAllInformation, FileAttributes};
use crate::smb2::create::{
    AccessMask, CreateDisposition, CreateOptions, CreateRequest, CreateResponse, ShareAccess,
};
use crate::smb2::tree::TreeDisconnect;
use crate::smb2::{FileId, Smb2Command};

/// Characters a path component may not contain.
const ILLEGAL_PATH_CHARS: &[char] = &['<', '>', ':', '"', '|', '?', '*', '\0'];

/// Normalize a share-relative path: either separator is accepted, the
/// result uses `\` with no leading or trailing separator. `.` components
/// are dropped; `..` and illegal characters are rejected.
pub fn normalize_path(path: &str) -> Result<String> {
    let mut parts = Vec::new();
    for component in path.split(&['/', '\\'][..]) {
        match component {
            "" | "." => continue,
            ".." => {
                return Err(Error::PathInvalid(format!("{}: parent components are not allowed", path)))
            }
            c if c.contains(ILLEGAL_PATH_CHARS) => {
                return Err(Error::PathInvalid(format!("{}: illegal character", path.escape_debug())))
            }
            c => parts.push(c),
        }
    }
    let normalized = parts.join("\\");
    // CREATE carries the name length in bytes as a u16
    if normalized.encode_utf16().count() * 2 > u16::MAX as usize {
        return Err(Error::PathInvalid(format!(
            "path of {} characters is too long",
            normalized.chars().count()
        )));
    }
    Ok(normalized)
}

pub(crate) fn join_path(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}\\{}", dir, name)
    }
}

/// How to open a file or directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenOptions {
    pub access: AccessMask,
    pub attributes: FileAttributes,
    pub share_access: ShareAccess,
    pub disposition: CreateDisposition,
    pub options: CreateOptions,
}

impl Default for OpenOptions {
    fn default() -> Self {
        OpenOptions {
            access: AccessMask::MAXIMUM_ALLOWED,
            attributes: FileAttributes::NORMAL,
            share_access: ShareAccess::READ | ShareAccess::WRITE,
            disposition: CreateDisposition::OpenIf,
            options: CreateOptions::empty(),
        }
    }
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn access(mut self, access: AccessMask) -> Self {
        self.access = access;
        self
    }

    pub fn attributes(mut self, attributes: FileAttributes) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn share_access(mut self, share_access: ShareAccess) -> Self {
        self.share_access = share_access;
        self
    }

    pub fn disposition(mut self, disposition: CreateDisposition) -> Self {
        self.disposition = disposition;
        self
    }

    pub fn options(mut self, options: CreateOptions) -> Self {
        self.options = options;
        self
    }

    /// Open an existing object only.
    pub fn existing(self) -> Self {
        self.disposition(CreateDisposition::Open)
    }

    pub fn directory(mut self) -> Self {
        self.options.remove(CreateOptions::NON_DIRECTORY_FILE);
        self.options.insert(CreateOptions::DIRECTORY_FILE);
        self
    }

    pub fn non_directory(mut self) -> Self {
        self.options.remove(CreateOptions::DIRECTORY_FILE);
        self.options.insert(CreateOptions::NON_DIRECTORY_FILE);
        self
    }
}

pub(crate) struct TreeState {
    pub id: u32,
    pub name: String,
    pub maximal_access: u32,
    connected: AtomicBool,
    open_files: Mutex<HashSet<FileId>>,
}

impl TreeState {
    pub fn new(id: u32, name: String, maximal_access: u32) -> Self {
        TreeState {
            id,
            name,
            maximal_access,
            connected: AtomicBool::new(true),
            open_files: Mutex::new(HashSet::new()),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn open_files(&self) -> std::sync::MutexGuard<'_, HashSet<FileId>> {
        self.open_files.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn track(&self, id: FileId) {
        self.open_files().insert(id);
    }

    pub fn forget(&self, id: FileId) {
        self.open_files().remove(&id);
    }
}

/// A connected share (tree connect).
///
/// Handles opened through a share are tracked and become unusable once the
/// share disconnects.
#[derive(Clone)]
pub struct Share {
    conn: Connection,
    session: Arc<SessionState>,
    tree: Arc<TreeState>,
}

impl fmt::Debug for Share {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Share")
            .field("name", &self.tree.name)
            .field("tree_id", &self.tree.id)
            .field("session_id", &self.session.id)
            .field("connected", &self.tree.is_connected())
            .finish()
    }
}

impl Share {
    pub(crate) fn new(conn: Connection, session: Arc<SessionState>, tree: Arc<TreeState>) -> Self {
        Share { conn, session, tree }
    }

    pub fn name(&self) -> &str {
        &self.tree.name
    }

    pub fn tree_id(&self) -> u32 {
        self.tree.id
    }

    /// Access the server granted on the share in TREE_CONNECT.
    pub fn maximal_access(&self) -> AccessMask {
        AccessMask::from_bits_retain(self.tree.maximal_access)
    }

    /// Number of handles opened through this share and not yet closed.
    pub fn open_handle_count(&self) -> usize {
        self.tree.open_files().len()
    }

    fn ensure_usable(&self) -> Result<()> {
        self.conn.ensure_open()?;
        if !self.session.is_active() || !self.tree.is_connected() {
            return Err(Error::HandleClosed);
        }
        Ok(())
    }

    /// Open (or create, depending on the disposition) `path`.
    pub async fn open(&self, path: &str, options: &OpenOptions) -> Result<FileHandle> {
        self.ensure_usable()?;
        let name = normalize_path(path)?;

        let req = CreateRequest {
            desired_access: options.access,
            file_attributes: options.attributes,
            share_access: options.share_access,
            create_disposition: options.disposition,
            create_options: options.options,
            name: name.clone(),
        };
        let mut body = BytesMut::with_capacity(64 + 2 * name.len());
        req.serialize(&mut body);

        let resp = self
            .conn
            .send(Smb2Command::Create, self.session.id, self.tree.id, &body)
            .await?
            .expect_success(Smb2Command::Create, &name)?;
        let created = CreateResponse::parse(&resp.body)
            .ok_or_else(|| Error::MalformedResponse("CREATE response".into()))?;

        debug!(
            path = %name,
            file_id = created.file_id.volatile,
            action = created.create_action,
            "Opened"
        );
        self.tree.track(created.file_id);
        Ok(FileHandle::new(
            self.conn.clone(),
            self.session.clone(),
            self.tree.clone(),
            created.file_id,
            name,
            options.access,
            created.basic.file_attributes.is_directory(),
        ))
    }

    /// Start listing the directory at `path`.
    pub async fn list(&self, path: &str) -> Result<DirectoryListing> {
        let options = OpenOptions::new()
            .access(AccessMask::FILE_READ_DATA | AccessMask::FILE_READ_ATTRIBUTES | AccessMask::SYNCHRONIZE)
            .share_access(ShareAccess::READ | ShareAccess::WRITE | ShareAccess::DELETE)
            .existing()
            .directory();
        let handle = self.open(path, &options).await?;
        Ok(DirectoryListing::new(
            handle,
            self.conn.config().query_directory_buffer_size,
        ))
    }

    /// Delete the file at `path`.
    pub async fn remove(&self, path: &str) -> Result<()> {
        let options = OpenOptions::new()
            .access(AccessMask::DELETE | AccessMask::FILE_READ_ATTRIBUTES)
            .share_access(ShareAccess::READ | ShareAccess::WRITE | ShareAccess::DELETE)
            .existing()
            .non_directory();
        self.delete_with(path, &options).await
    }

    /// Delete the directory at `path`. Without `recursive` the directory
    /// must be empty; with it, everything below is removed first.
    pub async fn remove_directory(&self, path: &str, recursive: bool) -> Result<()> {
        let root = normalize_path(path)?;
        if !recursive {
            return self.remove_empty_directory(&root).await;
        }

        // Files go as soon as they are seen; directories afterwards, deepest
        // first (reverse discovery order).
        let mut pending = vec![root];
        let mut directories = Vec::new();
        while let Some(dir) = pending.pop() {
            let mut listing = self.list(&dir).await?;
            while let Some(entry) = listing.next_entry().await? {
                if entry.is_virtual() {
                    continue;
                }
                let child = join_path(&dir, &entry.name);
                if entry.is_directory() {
                    pending.push(child);
                } else {
                    self.remove(&child).await?;
                }
            }
            directories.push(dir);
        }
        for dir in directories.iter().rev() {
            self.remove_empty_directory(dir).await?;
        }
        info!(share = %self.tree.name, path = %path, "Directory tree removed");
        Ok(())
    }

    async fn remove_empty_directory(&self, path: &str) -> Result<()> {
        let options = OpenOptions::new()
            .access(AccessMask::DELETE | AccessMask::FILE_READ_ATTRIBUTES)
            .share_access(ShareAccess::READ | ShareAccess::WRITE | ShareAccess::DELETE)
            .existing()
            .directory();
        self.delete_with(path, &options).await
    }

    async fn delete_with(&self, path: &str, options: &OpenOptions) -> Result<()> {
        let mut handle = self.open(path, options).await?;
        let result = handle.set_delete_pending(true).await;
        let closed = handle.close().await;
        result?;
        closed?;
        debug!(path = %handle.path(), "Deleted");
        Ok(())
    }

    /// Query FileAllInformation for `path` through a short-lived handle.
    pub async fn file_information(&self, path: &str) -> Result<FileAllInformation> {
        let options = OpenOptions::new()
            .access(AccessMask::FILE_READ_ATTRIBUTES)
            .share_access(ShareAccess::READ | ShareAccess::WRITE | ShareAccess::DELETE)
            .existing();
        let mut handle = self.open(path, &options).await?;
        let result = handle.query_all_information().await;
        let closed = handle.close().await;
        let info = result?;
        closed?;
        Ok(info)
    }

    /// Apply `patch` to `path` through a short-lived handle.
    pub async fn set_file_information(&self, path: &str, patch: &BasicInfoPatch) -> Result<()> {
        patch.validate()?;
        let options = OpenOptions::new()
            .access(AccessMask::FILE_READ_ATTRIBUTES | AccessMask::FILE_WRITE_ATTRIBUTES)
            .share_access(ShareAccess::READ | ShareAccess::WRITE | ShareAccess::DELETE)
            .existing();
        let mut handle = self.open(path, &options).await?;
        let result = handle.set_basic_information(patch).await;
        let closed = handle.close().await;
        result?;
        closed
    }

    pub async fn exists(&self, path: &str) -> Result<bool> {
        let options = OpenOptions::new()
            .access(AccessMask::FILE_READ_ATTRIBUTES)
            .share_access(ShareAccess::READ | ShareAccess::WRITE | ShareAccess::DELETE)
            .existing();
        match self.open(path, &options).await {
            Ok(mut handle) => {
                handle.close().await?;
                Ok(true)
            }
            Err(Error::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Create a new directory. Fails if something already exists at `path`.
    pub async fn create_directory(&self, path: &str) -> Result<()> {
        let options = OpenOptions::new()
            .access(AccessMask::FILE_READ_ATTRIBUTES)
            .attributes(FileAttributes::DIRECTORY)
            .disposition(CreateDisposition::Create)
            .directory();
        let mut handle = self.open(path, &options).await?;
        handle.close().await
    }

    /// Detach from the share. Handles still open become unusable.
    pub async fn disconnect(&self) -> Result<()> {
        if !self.tree.connected.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let orphaned = {
            let mut files = self.tree.open_files();
            let n = files.len();
            files.clear();
            n
        };
        if orphaned > 0 {
            warn!(share = %self.tree.name, orphaned, "Disconnecting with open handles");
        }
        self.conn.ensure_open()?;
        if !self.session.is_active() {
            return Err(Error::HandleClosed);
        }

        let mut body = BytesMut::with_capacity(4);
        TreeDisconnect.serialize(&mut body);
        self.conn
            .send(Smb2Command::TreeDisconnect, self.session.id, self.tree.id, &body)
            .await?
            .expect_success(Smb2Command::TreeDisconnect, &self.tree.name)?;
        info!(share = %self.tree.name, tree_id = self.tree.id, "Share disconnected");
        Ok(())
    }
}
