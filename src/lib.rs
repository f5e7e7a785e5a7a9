//! An async SMB2/3 client focused on file metadata.
//!
//! The client negotiates a dialect, authenticates a session through a
//! pluggable [`SecurityProvider`], attaches to shares and opens handles.
//! On a handle the centrepiece is the FileBasicInformation exchange:
//! [`FileHandle::query_basic_information`] returns all four timestamps and
//! the attributes, and [`FileHandle::set_basic_information`] applies a
//! [`BasicInfoPatch`] in which every slot is either a concrete time or
//! "do not update".
//!
//! ```no_run
//! # async fn demo(provider: &mut dyn smb2_client::SecurityProvider) -> smb2_client::Result<()> {
//! use smb2_client::{BasicInfoPatch, ClientConfig, FileTime, OpenOptions, SmbClient};
//!
//! let client = SmbClient::new(ClientConfig::default());
//! let conn = client.connect("fileserver").await?;
//! let session = conn.authenticate(provider).await?;
//! let share = session.connect_share("data").await?;
//!
//! let mut file = share.open("reports\\q3.txt", &OpenOptions::new()).await?;
//! let before = file.query_basic_information().await?;
//! let patch = BasicInfoPatch::keeping(before.file_attributes)
//!     .with_change_time(FileTime::now());
//! file.set_basic_information(&patch).await?;
//! file.close().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

pub mod client;
pub mod config;
pub mod error;
pub mod fscc;
pub mod metadata;
pub mod smb2;
pub mod transport;

pub use client::{
    normalize_path, AuthenticationContext, Connection, DirectoryListing, FileHandle, OpenOptions,
    SecurityProvider, Session, Share, SmbClient,
};
pub use config::{load_config, ClientConfig};
pub use error::{Error, Result};
pub use fscc::{
    BasicInfoPatch, DirectoryEntry, FileAllInformation, FileAttributes, FileBasicInformation,
    FileStandardInformation, FileTime, TimeField,
};
pub use smb2::create::{AccessMask, CreateDisposition, CreateOptions, ShareAccess};
pub use smb2::status::NtStatus;
pub use transport::{FrameReader, FrameWriter, StreamTransport, Transport};
