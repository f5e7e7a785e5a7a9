//! In-memory SMB2 server for integration tests.
//!
//! Speaks just enough of the protocol to exercise the client over a
//! `tokio::io::duplex` pipe, reusing the library's wire codecs for the
//! server side of each exchange.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, Once};
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::DuplexStream;
use tracing::{debug, warn};

use smb2_client::fscc::{
    encode_directory_entries, BasicInfoPatch, DirectoryEntry, FileAllInformation,
    FileBasicInformation, FileDispositionInformation, FileStandardInformation,
};
use smb2_client::smb2::close::{CloseRequest, CloseResponse};
use smb2_client::smb2::create::{CreateRequest, CreateResponse, FILE_CREATED, FILE_OPENED, FILE_OVERWRITTEN};
use smb2_client::smb2::flush::{FlushRequest, FlushResponse};
use smb2_client::smb2::header::{Smb2Header, FLAGS_ASYNC_COMMAND, SMB2_HEADER_SIZE};
use smb2_client::smb2::negotiate::{NegotiateRequest, NegotiateResponse, SIGNING_ENABLED};
use smb2_client::smb2::query::{
    QueryDirectoryRequest, QueryDirectoryResponse, QueryInfoRequest, QueryInfoResponse,
    SetInfoRequest, SetInfoResponse, FILE_ALL_INFORMATION, FILE_BASIC_INFORMATION,
    FILE_DISPOSITION_INFORMATION, FILE_ID_BOTH_DIRECTORY_INFORMATION, FILE_STANDARD_INFORMATION,
    SMB2_0_INFO_FILE,
};
use smb2_client::smb2::read::{ReadRequest, ReadResponse};
use smb2_client::smb2::session::{Logoff, SessionSetupRequest, SessionSetupResponse};
use smb2_client::smb2::status::NtStatus;
use smb2_client::smb2::tree::{TreeConnectRequest, TreeConnectResponse, TreeDisconnect, SHARE_TYPE_DISK};
use smb2_client::smb2::write::{WriteRequest, WriteResponse};
use smb2_client::smb2::{build_error_response_body, FileId, Smb2Command};
use smb2_client::transport::{read_frame, write_frame};
use smb2_client::{
    AccessMask, AuthenticationContext, ClientConfig, Connection, FileAttributes, FileTime,
    SecurityProvider, Session, Share, SmbClient, StreamTransport,
};

pub const USER: &str = "alice";
pub const PASSWORD: &str = "s3cret";
pub const DOMAIN: &str = "WORKGROUP";
pub const SHARE: &str = "data";

const CHALLENGE: &[u8] = b"CHALLENGE";
const FULL_ACCESS: u32 = 0x001F_01FF;

/// How the server relates ChangeTime and LastWriteTime on SET_INFO.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CouplingPolicy {
    /// Every slot is stored as sent.
    Independent,
    /// Setting one of ChangeTime/LastWriteTime without the other copies it
    /// into both, like servers that keep a single modification time.
    Mirrored,
}

/// Apply `patch` to `current` the way the server stores it, before any
/// coupling: `DontUpdate` slots and empty attributes keep the current value.
pub fn apply_patch(current: &FileBasicInformation, patch: &BasicInfoPatch) -> FileBasicInformation {
    FileBasicInformation {
        creation_time: patch.creation_time.value().unwrap_or(current.creation_time),
        last_access_time: patch.last_access_time.value().unwrap_or(current.last_access_time),
        last_write_time: patch.last_write_time.value().unwrap_or(current.last_write_time),
        change_time: patch.change_time.value().unwrap_or(current.change_time),
        file_attributes: if patch.file_attributes.is_empty() {
            current.file_attributes
        } else {
            patch.file_attributes
        },
    }
}

/// Timestamps given to files seeded with [`TestServer::put_file`]:
/// creation, last access, last write and change, one second apart.
pub fn seed_times() -> FileBasicInformation {
    let base = 1_600_000_000_000i64;
    FileBasicInformation {
        creation_time: FileTime::from_epoch_millis(base),
        last_access_time: FileTime::from_epoch_millis(base + 1_000),
        last_write_time: FileTime::from_epoch_millis(base + 2_000),
        change_time: FileTime::from_epoch_millis(base + 3_000),
        file_attributes: FileAttributes::ARCHIVE,
    }
}

pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

// ---- File tree ----

#[derive(Debug, Clone)]
struct Node {
    basic: FileBasicInformation,
    data: Vec<u8>,
    index: u64,
}

impl Node {
    fn is_directory(&self) -> bool {
        self.basic.file_attributes.is_directory()
    }
}

fn parent_of(path: &str) -> &str {
    path.rsplit_once('\\').map(|(p, _)| p).unwrap_or("")
}

fn leaf_of(path: &str) -> &str {
    path.rsplit_once('\\').map(|(_, l)| l).unwrap_or(path)
}

struct Tree {
    nodes: BTreeMap<String, Node>,
    next_index: u64,
}

impl Tree {
    fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            String::new(),
            Node {
                basic: FileBasicInformation {
                    file_attributes: FileAttributes::DIRECTORY,
                    ..seed_times()
                },
                data: Vec::new(),
                index: 1,
            },
        );
        Tree { nodes, next_index: 2 }
    }

    fn insert(&mut self, path: &str, basic: FileBasicInformation, data: Vec<u8>) {
        let index = self.next_index;
        self.next_index += 1;
        self.nodes.insert(path.to_string(), Node { basic, data, index });
    }

    fn children(&self, dir: &str) -> Vec<(String, Node)> {
        self.nodes
            .iter()
            .filter(|(path, _)| !path.is_empty() && parent_of(path) == dir)
            .map(|(path, node)| (leaf_of(path).to_string(), node.clone()))
            .collect()
    }

    fn entry(name: &str, node: &Node) -> DirectoryEntry {
        DirectoryEntry {
            name: name.to_string(),
            file_index: 0,
            basic: node.basic,
            end_of_file: node.data.len() as u64,
            allocation_size: (node.data.len() as u64 + 4095) & !4095,
            file_id: node.index,
        }
    }

    fn listing(&self, dir: &str) -> Vec<DirectoryEntry> {
        let mut entries = Vec::new();
        if let Some(node) = self.nodes.get(dir) {
            entries.push(Self::entry(".", node));
        }
        if let Some(node) = self.nodes.get(parent_of(dir)) {
            entries.push(Self::entry("..", node));
        }
        for (name, node) in self.children(dir) {
            entries.push(Self::entry(&name, &node));
        }
        entries
    }
}

// ---- Server ----

#[derive(Default)]
struct Controls {
    stall_once: Option<Smb2Command>,
    hang_up_on: Option<Smb2Command>,
    interim_on: Option<Smb2Command>,
    short_info_once: bool,
    mislabel_once: Option<Smb2Command>,
}

struct ServerShared {
    coupling: CouplingPolicy,
    shares: Vec<String>,
    max_io: u32,
    tree: Mutex<Tree>,
    controls: Mutex<Controls>,
    next_session_id: Mutex<u64>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

/// An in-memory server. Every `connect` gets its own connection state; the
/// file tree is shared.
#[derive(Clone)]
pub struct TestServer {
    shared: Arc<ServerShared>,
}

impl TestServer {
    pub fn new(coupling: CouplingPolicy) -> Self {
        Self::with_max_io(coupling, 64 * 1024)
    }

    /// A server that advertises `max_io` as its MaxReadSize and MaxWriteSize.
    pub fn with_max_io(coupling: CouplingPolicy, max_io: u32) -> Self {
        TestServer {
            shared: Arc::new(ServerShared {
                coupling,
                shares: vec![SHARE.to_string()],
                max_io,
                tree: Mutex::new(Tree::new()),
                controls: Mutex::new(Controls::default()),
                next_session_id: Mutex::new(0x1000),
            }),
        }
    }

    /// A fresh client-side transport wired to a new server connection task.
    pub fn connect(&self) -> StreamTransport<DuplexStream> {
        let (client, server) = tokio::io::duplex(256 * 1024);
        let shared = self.shared.clone();
        tokio::spawn(async move {
            serve(server, shared).await;
        });
        StreamTransport::new(client)
    }

    pub fn put_file(&self, path: &str, data: &[u8]) {
        lock(&self.shared.tree).insert(path, seed_times(), data.to_vec());
    }

    pub fn put_dir(&self, path: &str) {
        let basic = FileBasicInformation {
            file_attributes: FileAttributes::DIRECTORY,
            ..seed_times()
        };
        lock(&self.shared.tree).insert(path, basic, Vec::new());
    }

    pub fn exists(&self, path: &str) -> bool {
        lock(&self.shared.tree).nodes.contains_key(path)
    }

    pub fn basic(&self, path: &str) -> Option<FileBasicInformation> {
        lock(&self.shared.tree).nodes.get(path).map(|n| n.basic)
    }

    pub fn contents(&self, path: &str) -> Option<Vec<u8>> {
        lock(&self.shared.tree).nodes.get(path).map(|n| n.data.clone())
    }

    /// Swallow the next request carrying `command` without answering it.
    pub fn stall_once(&self, command: Smb2Command) {
        lock(&self.shared.controls).stall_once = Some(command);
    }

    /// Drop the connection when a request carrying `command` arrives.
    pub fn hang_up_on(&self, command: Smb2Command) {
        lock(&self.shared.controls).hang_up_on = Some(command);
    }

    /// Send a STATUS_PENDING interim reply before each final `command` reply.
    pub fn interim_on(&self, command: Smb2Command) {
        lock(&self.shared.controls).interim_on = Some(command);
    }

    /// Cut the next QUERY_INFO record one byte short of its real size.
    pub fn short_info_once(&self) {
        lock(&self.shared.controls).short_info_once = true;
    }

    /// Label the next `command` reply as an ECHO response.
    pub fn mislabel_once(&self, command: Smb2Command) {
        lock(&self.shared.controls).mislabel_once = Some(command);
    }
}

struct OpenFile {
    session_id: u64,
    tree_id: u32,
    path: String,
    granted: AccessMask,
    is_directory: bool,
    delete_pending: bool,
    listing: Option<Vec<DirectoryEntry>>,
}

struct SessionEntry {
    authenticated: bool,
    trees: HashMap<u32, String>,
}

struct ConnectionState {
    sessions: HashMap<u64, SessionEntry>,
    opens: HashMap<u64, OpenFile>,
    next_tree_id: u32,
    next_file_id: u64,
}

type HandlerResult = Result<(Smb2Header, Vec<u8>), NtStatus>;

enum Action {
    Reply,
    Stall,
    HangUp,
}

async fn serve(stream: DuplexStream, shared: Arc<ServerShared>) {
    let (mut reader, mut writer) = tokio::io::split(stream);
    let mut conn = ConnectionState {
        sessions: HashMap::new(),
        opens: HashMap::new(),
        next_tree_id: 1,
        next_file_id: 1,
    };

    loop {
        let frame = match read_frame(&mut reader).await {
            Ok(f) => f,
            Err(_) => return,
        };
        let Some(header) = Smb2Header::parse(&frame) else {
            warn!("test server: invalid header");
            return;
        };
        let body = &frame[SMB2_HEADER_SIZE..];
        let command = Smb2Command::from_u16(header.command);

        let (action, interim) = {
            let mut controls = lock(&shared.controls);
            let action = if command.is_some() && controls.hang_up_on == command {
                Action::HangUp
            } else if command.is_some() && controls.stall_once == command {
                controls.stall_once = None;
                Action::Stall
            } else {
                Action::Reply
            };
            (action, command.is_some() && controls.interim_on == command)
        };
        match action {
            Action::HangUp => {
                debug!(?command, "test server: hanging up");
                return;
            }
            Action::Stall => {
                debug!(?command, "test server: stalling");
                continue;
            }
            Action::Reply => {}
        }

        if interim {
            let mut pending = Smb2Header::new_response(&header, NtStatus::Pending);
            pending.flags |= FLAGS_ASYNC_COMMAND;
            pending.async_id = header.message_id + 1;
            let mut buf = BytesMut::new();
            pending.serialize(&mut buf);
            buf.extend_from_slice(&build_error_response_body());
            if write_frame(&mut writer, &buf).await.is_err() {
                return;
            }
        }

        let (mut resp_header, resp_body) = dispatch(&mut conn, &shared, &header, body);
        {
            let mut controls = lock(&shared.controls);
            if command.is_some() && controls.mislabel_once == command {
                controls.mislabel_once = None;
                resp_header.command = Smb2Command::Echo as u16;
            }
        }
        let mut buf = BytesMut::with_capacity(SMB2_HEADER_SIZE + resp_body.len());
        resp_header.serialize(&mut buf);
        buf.extend_from_slice(&resp_body);
        if write_frame(&mut writer, &buf).await.is_err() {
            return;
        }
    }
}

fn dispatch(
    conn: &mut ConnectionState,
    shared: &ServerShared,
    header: &Smb2Header,
    body: &[u8],
) -> (Smb2Header, Vec<u8>) {
    let result = match Smb2Command::from_u16(header.command) {
        Some(Smb2Command::Negotiate) => handle_negotiate(shared, header, body),
        Some(Smb2Command::SessionSetup) => handle_session_setup(conn, shared, header, body),
        Some(Smb2Command::Logoff) => handle_logoff(conn, header, body),
        Some(Smb2Command::TreeConnect) => handle_tree_connect(conn, shared, header, body),
        Some(Smb2Command::TreeDisconnect) => handle_tree_disconnect(conn, header, body),
        Some(Smb2Command::Create) => handle_create(conn, shared, header, body),
        Some(Smb2Command::Close) => handle_close(conn, shared, header, body),
        Some(Smb2Command::Flush) => handle_flush(conn, header, body),
        Some(Smb2Command::Read) => handle_read(conn, shared, header, body),
        Some(Smb2Command::Write) => handle_write(conn, shared, header, body),
        Some(Smb2Command::QueryDirectory) => handle_query_directory(conn, shared, header, body),
        Some(Smb2Command::QueryInfo) => handle_query_info(conn, shared, header, body),
        Some(Smb2Command::SetInfo) => handle_set_info(conn, shared, header, body),
        _ => Err(NtStatus::NotSupported),
    };
    match result {
        Ok(pair) => pair,
        Err(status) => (
            Smb2Header::new_response(header, status),
            build_error_response_body(),
        ),
    }
}

fn reply<F>(header: &Smb2Header, f: F) -> HandlerResult
where
    F: FnOnce(&mut BytesMut),
{
    let mut buf = BytesMut::with_capacity(128);
    f(&mut buf);
    Ok((Smb2Header::new_response(header, NtStatus::Success), buf.to_vec()))
}

fn check_tree(conn: &ConnectionState, header: &Smb2Header) -> Result<(), NtStatus> {
    let session = conn
        .sessions
        .get(&header.session_id)
        .filter(|s| s.authenticated)
        .ok_or(NtStatus::UserSessionDeleted)?;
    if !session.trees.contains_key(&header.tree_id) {
        return Err(NtStatus::NetworkNameDeleted);
    }
    Ok(())
}

fn open_mut<'a>(
    conn: &'a mut ConnectionState,
    header: &Smb2Header,
    file_id: FileId,
) -> Result<&'a mut OpenFile, NtStatus> {
    check_tree(conn, header)?;
    conn.opens
        .get_mut(&file_id.volatile)
        .filter(|o| o.session_id == header.session_id && o.tree_id == header.tree_id)
        .ok_or(NtStatus::FileClosed)
}

fn handle_negotiate(shared: &ServerShared, header: &Smb2Header, body: &[u8]) -> HandlerResult {
    let req = NegotiateRequest::parse(body).ok_or(NtStatus::InvalidParameter)?;
    let dialect = req
        .dialects
        .iter()
        .copied()
        .filter(|d| *d <= 0x0302)
        .max()
        .ok_or(NtStatus::NotSupported)?;
    reply(header, |buf| {
        NegotiateResponse {
            security_mode: SIGNING_ENABLED,
            dialect,
            server_guid: [7; 16],
            capabilities: 0,
            max_transact_size: shared.max_io,
            max_read_size: shared.max_io,
            max_write_size: shared.max_io,
            system_time: FileTime::now().ticks(),
            security_buffer: b"SPNEGO".to_vec(),
        }
        .serialize(buf)
    })
}

fn handle_session_setup(
    conn: &mut ConnectionState,
    shared: &ServerShared,
    header: &Smb2Header,
    body: &[u8],
) -> HandlerResult {
    let req = SessionSetupRequest::parse(body).ok_or(NtStatus::InvalidParameter)?;

    if header.session_id == 0 {
        let session_id = {
            let mut next = lock(&shared.next_session_id);
            *next += 1;
            *next
        };
        conn.sessions.insert(
            session_id,
            SessionEntry { authenticated: false, trees: HashMap::new() },
        );
        let mut resp = Smb2Header::new_response(header, NtStatus::MoreProcessingRequired);
        resp.session_id = session_id;
        let mut buf = BytesMut::new();
        SessionSetupResponse { session_flags: 0, security_buffer: CHALLENGE.to_vec() }
            .serialize(&mut buf);
        return Ok((resp, buf.to_vec()));
    }

    let session = conn
        .sessions
        .get_mut(&header.session_id)
        .ok_or(NtStatus::UserSessionDeleted)?;
    let expected = format!("{}\0{}\0{}", USER, PASSWORD, DOMAIN);
    if req.security_buffer != expected.as_bytes() {
        conn.sessions.remove(&header.session_id);
        return Err(NtStatus::LogonFailure);
    }
    session.authenticated = true;
    reply(header, |buf| {
        SessionSetupResponse { session_flags: 0, security_buffer: Vec::new() }.serialize(buf)
    })
}

fn handle_logoff(conn: &mut ConnectionState, header: &Smb2Header, body: &[u8]) -> HandlerResult {
    Logoff::parse(body).ok_or(NtStatus::InvalidParameter)?;
    conn.sessions
        .remove(&header.session_id)
        .ok_or(NtStatus::UserSessionDeleted)?;
    conn.opens.retain(|_, o| o.session_id != header.session_id);
    reply(header, |buf| Logoff.serialize(buf))
}

fn handle_tree_connect(
    conn: &mut ConnectionState,
    shared: &ServerShared,
    header: &Smb2Header,
    body: &[u8],
) -> HandlerResult {
    let req = TreeConnectRequest::parse(body).ok_or(NtStatus::InvalidParameter)?;
    let session = conn
        .sessions
        .get_mut(&header.session_id)
        .filter(|s| s.authenticated)
        .ok_or(NtStatus::UserSessionDeleted)?;
    let name = req.share_name().to_string();
    if !shared.shares.iter().any(|s| s.eq_ignore_ascii_case(&name)) {
        return Err(NtStatus::BadNetworkName);
    }

    let tree_id = conn.next_tree_id;
    conn.next_tree_id += 1;
    session.trees.insert(tree_id, name);

    let mut resp = Smb2Header::new_response(header, NtStatus::Success);
    resp.tree_id = tree_id;
    let mut buf = BytesMut::new();
    TreeConnectResponse {
        share_type: SHARE_TYPE_DISK,
        share_flags: 0,
        capabilities: 0,
        maximal_access: FULL_ACCESS,
    }
    .serialize(&mut buf);
    Ok((resp, buf.to_vec()))
}

fn handle_tree_disconnect(
    conn: &mut ConnectionState,
    header: &Smb2Header,
    body: &[u8],
) -> HandlerResult {
    TreeDisconnect::parse(body).ok_or(NtStatus::InvalidParameter)?;
    check_tree(conn, header)?;
    if let Some(session) = conn.sessions.get_mut(&header.session_id) {
        session.trees.remove(&header.tree_id);
    }
    conn.opens
        .retain(|_, o| !(o.session_id == header.session_id && o.tree_id == header.tree_id));
    reply(header, |buf| TreeDisconnect.serialize(buf))
}

fn handle_create(
    conn: &mut ConnectionState,
    shared: &ServerShared,
    header: &Smb2Header,
    body: &[u8],
) -> HandlerResult {
    check_tree(conn, header)?;
    let req = CreateRequest::parse(body).ok_or(NtStatus::InvalidParameter)?;
    let path = req.name.clone();
    let mut tree = lock(&shared.tree);

    let action = match tree.nodes.get_mut(&path) {
        Some(node) => {
            if req.create_disposition == smb2_client::CreateDisposition::Create {
                return Err(NtStatus::ObjectNameCollision);
            }
            if req.is_directory_request() && !node.is_directory() {
                return Err(NtStatus::NotADirectory);
            }
            if req
                .create_options
                .contains(smb2_client::CreateOptions::NON_DIRECTORY_FILE)
                && node.is_directory()
            {
                return Err(NtStatus::FileIsADirectory);
            }
            if req.create_disposition.truncates() && !node.is_directory() {
                node.data.clear();
                let now = FileTime::now();
                node.basic.last_write_time = now;
                node.basic.change_time = now;
                FILE_OVERWRITTEN
            } else {
                FILE_OPENED
            }
        }
        None => {
            if !req.create_disposition.may_create() {
                return Err(NtStatus::ObjectNameNotFound);
            }
            match tree.nodes.get(parent_of(&path)) {
                Some(parent) if parent.is_directory() => {}
                _ => return Err(NtStatus::ObjectPathNotFound),
            }
            let now = FileTime::now();
            let attributes = if req.is_directory_request() {
                FileAttributes::DIRECTORY
            } else {
                FileAttributes::ARCHIVE
            };
            tree.insert(
                &path,
                FileBasicInformation {
                    creation_time: now,
                    last_access_time: now,
                    last_write_time: now,
                    change_time: now,
                    file_attributes: attributes,
                },
                Vec::new(),
            );
            FILE_CREATED
        }
    };

    let node = tree.nodes.get(&path).ok_or(NtStatus::ObjectNameNotFound)?;
    let granted = if req.desired_access.contains(AccessMask::MAXIMUM_ALLOWED) {
        AccessMask::from_bits_retain(FULL_ACCESS)
    } else {
        req.desired_access
    };
    let file_id = FileId { persistent: node.index, volatile: conn.next_file_id };
    conn.next_file_id += 1;
    conn.opens.insert(
        file_id.volatile,
        OpenFile {
            session_id: header.session_id,
            tree_id: header.tree_id,
            path: path.clone(),
            granted,
            is_directory: node.is_directory(),
            delete_pending: false,
            listing: None,
        },
    );

    let resp = CreateResponse {
        create_action: action,
        basic: node.basic,
        allocation_size: (node.data.len() as u64 + 4095) & !4095,
        end_of_file: node.data.len() as u64,
        file_id,
    };
    reply(header, |buf| resp.serialize(buf))
}

fn handle_close(
    conn: &mut ConnectionState,
    shared: &ServerShared,
    header: &Smb2Header,
    body: &[u8],
) -> HandlerResult {
    let req = CloseRequest::parse(body).ok_or(NtStatus::InvalidParameter)?;
    open_mut(conn, header, req.file_id)?;
    let open = conn
        .opens
        .remove(&req.file_id.volatile)
        .ok_or(NtStatus::FileClosed)?;

    let mut tree = lock(&shared.tree);
    if open.delete_pending {
        tree.nodes.remove(&open.path);
        debug!(path = %open.path, "test server: deleted on close");
    }
    let attributes = if req.wants_post_query() {
        tree.nodes
            .get(&open.path)
            .map(|n| (n.basic, (n.data.len() as u64 + 4095) & !4095, n.data.len() as u64))
    } else {
        None
    };
    reply(header, |buf| CloseResponse { attributes }.serialize(buf))
}

fn handle_flush(conn: &mut ConnectionState, header: &Smb2Header, body: &[u8]) -> HandlerResult {
    let req = FlushRequest::parse(body).ok_or(NtStatus::InvalidParameter)?;
    open_mut(conn, header, req.file_id)?;
    reply(header, |buf| FlushResponse.serialize(buf))
}

fn handle_read(
    conn: &mut ConnectionState,
    shared: &ServerShared,
    header: &Smb2Header,
    body: &[u8],
) -> HandlerResult {
    let req = ReadRequest::parse(body).ok_or(NtStatus::InvalidParameter)?;
    let open = open_mut(conn, header, req.file_id)?;
    if open.is_directory {
        return Err(NtStatus::InvalidDeviceRequest);
    }
    if !open.granted.can_read_data() {
        return Err(NtStatus::AccessDenied);
    }
    let tree = lock(&shared.tree);
    let node = tree.nodes.get(&open.path).ok_or(NtStatus::FileClosed)?;
    let start = req.offset as usize;
    if start >= node.data.len() {
        return Err(NtStatus::EndOfFile);
    }
    let end = (start + req.length as usize).min(node.data.len());
    let data = node.data[start..end].to_vec();
    reply(header, |buf| ReadResponse { data }.serialize(buf))
}

fn handle_write(
    conn: &mut ConnectionState,
    shared: &ServerShared,
    header: &Smb2Header,
    body: &[u8],
) -> HandlerResult {
    let req = WriteRequest::parse(body).ok_or(NtStatus::InvalidParameter)?;
    let open = open_mut(conn, header, req.file_id)?;
    if open.is_directory {
        return Err(NtStatus::InvalidDeviceRequest);
    }
    if !open.granted.can_write_data() {
        return Err(NtStatus::AccessDenied);
    }
    let mut tree = lock(&shared.tree);
    let node = tree.nodes.get_mut(&open.path).ok_or(NtStatus::FileClosed)?;
    let start = req.offset as usize;
    let end = start + req.data.len();
    if node.data.len() < end {
        node.data.resize(end, 0);
    }
    node.data[start..end].copy_from_slice(req.data);
    let now = FileTime::now();
    node.basic.last_write_time = now;
    node.basic.change_time = now;
    let count = req.data.len() as u32;
    reply(header, |buf| WriteResponse { count }.serialize(buf))
}

fn handle_query_directory(
    conn: &mut ConnectionState,
    shared: &ServerShared,
    header: &Smb2Header,
    body: &[u8],
) -> HandlerResult {
    let req = QueryDirectoryRequest::parse(body).ok_or(NtStatus::InvalidParameter)?;
    if req.file_information_class != FILE_ID_BOTH_DIRECTORY_INFORMATION {
        return Err(NtStatus::InvalidParameter);
    }
    let open = open_mut(conn, header, req.file_id)?;
    if !open.is_directory {
        return Err(NtStatus::InvalidParameter);
    }
    if req.restart_scan() || open.listing.is_none() {
        open.listing = Some(lock(&shared.tree).listing(&open.path));
    }
    let remaining = open.listing.as_mut().ok_or(NtStatus::InvalidParameter)?;
    if remaining.is_empty() {
        return Err(NtStatus::NoMoreFiles);
    }

    let limit = req.output_buffer_length as usize;
    let mut used = 0usize;
    let mut take = 0usize;
    for entry in remaining.iter() {
        if used + entry.encoded_len() > limit {
            break;
        }
        used += entry.aligned_len();
        take += 1;
    }
    if take == 0 {
        return Err(NtStatus::BufferOverflow);
    }
    let page: Vec<DirectoryEntry> = remaining.drain(..take).collect();
    let data = encode_directory_entries(&page);
    reply(header, |buf| QueryDirectoryResponse { data }.serialize(buf))
}

fn handle_query_info(
    conn: &mut ConnectionState,
    shared: &ServerShared,
    header: &Smb2Header,
    body: &[u8],
) -> HandlerResult {
    let req = QueryInfoRequest::parse(body).ok_or(NtStatus::InvalidParameter)?;
    let open = open_mut(conn, header, req.file_id)?;
    if req.info_type != SMB2_0_INFO_FILE {
        return Err(NtStatus::NotSupported);
    }
    if !open.granted.can_read_attributes() {
        return Err(NtStatus::AccessDenied);
    }
    let tree = lock(&shared.tree);
    let node = tree.nodes.get(&open.path).ok_or(NtStatus::FileClosed)?;
    let standard = FileStandardInformation {
        allocation_size: (node.data.len() as u64 + 4095) & !4095,
        end_of_file: node.data.len() as u64,
        number_of_links: 1,
        delete_pending: open.delete_pending,
        directory: node.is_directory(),
    };

    let data = match req.file_info_class {
        FILE_BASIC_INFORMATION => node.basic.encode(),
        FILE_STANDARD_INFORMATION => {
            let mut buf = BytesMut::new();
            standard.encode_into(&mut buf);
            buf.to_vec()
        }
        FILE_ALL_INFORMATION => FileAllInformation {
            basic: node.basic,
            standard,
            index_number: node.index,
            ea_size: 0,
            access_flags: open.granted.bits(),
            current_byte_offset: 0,
            mode: 0,
            alignment_requirement: 0,
            name: format!("\\{}", open.path),
        }
        .encode(),
        _ => return Err(NtStatus::InvalidParameter),
    };
    if data.len() > req.output_buffer_length as usize {
        return Err(NtStatus::InfoLengthMismatch);
    }
    let mut data = data;
    if std::mem::take(&mut lock(&shared.controls).short_info_once) {
        data.pop();
    }
    reply(header, |buf| QueryInfoResponse { data }.serialize(buf))
}

fn handle_set_info(
    conn: &mut ConnectionState,
    shared: &ServerShared,
    header: &Smb2Header,
    body: &[u8],
) -> HandlerResult {
    let req = SetInfoRequest::parse(body).ok_or(NtStatus::InvalidParameter)?;
    let open = open_mut(conn, header, req.file_id)?;
    if req.info_type != SMB2_0_INFO_FILE {
        return Err(NtStatus::NotSupported);
    }
    let mut tree = lock(&shared.tree);

    match req.file_info_class {
        FILE_BASIC_INFORMATION => {
            if !open.granted.can_write_attributes() {
                return Err(NtStatus::AccessDenied);
            }
            let mut patch =
                BasicInfoPatch::decode(req.buffer).map_err(|_| NtStatus::InfoLengthMismatch)?;
            if shared.coupling == CouplingPolicy::Mirrored {
                match (patch.change_time.value(), patch.last_write_time.value()) {
                    (Some(t), None) => patch.last_write_time = t.into(),
                    (None, Some(t)) => patch.change_time = t.into(),
                    _ => {}
                }
            }
            let node = tree.nodes.get_mut(&open.path).ok_or(NtStatus::FileClosed)?;
            node.basic = apply_patch(&node.basic, &patch);
        }
        FILE_DISPOSITION_INFORMATION => {
            if !open.granted.can_delete() {
                return Err(NtStatus::AccessDenied);
            }
            let disposition = FileDispositionInformation::decode(req.buffer)
                .map_err(|_| NtStatus::InfoLengthMismatch)?;
            if disposition.delete_pending
                && open.is_directory
                && !tree.children(&open.path).is_empty()
            {
                return Err(NtStatus::DirectoryNotEmpty);
            }
            open.delete_pending = disposition.delete_pending;
        }
        _ => return Err(NtStatus::InvalidParameter),
    }
    drop(tree);
    reply(header, |buf| SetInfoResponse.serialize(buf))
}

// ---- Client-side helpers ----

/// Two-leg logon matching the server above: any first token, then the
/// credentials in answer to the challenge.
pub struct TestProvider {
    pub ctx: AuthenticationContext,
}

impl TestProvider {
    pub fn new(password: &str) -> Self {
        TestProvider {
            ctx: AuthenticationContext::new(USER, password, DOMAIN),
        }
    }
}

impl SecurityProvider for TestProvider {
    fn next_token(&mut self, server_token: &[u8]) -> smb2_client::Result<Vec<u8>> {
        if server_token == CHALLENGE {
            Ok(format!("{}\0{}\0{}", self.ctx.username, self.ctx.password, self.ctx.domain)
                .into_bytes())
        } else {
            Ok(b"HELLO".to_vec())
        }
    }
}

pub fn test_config() -> ClientConfig {
    ClientConfig {
        request_timeout_ms: 2_000,
        ..Default::default()
    }
}

pub async fn connect(server: &TestServer, config: ClientConfig) -> Connection {
    SmbClient::new(config)
        .connect_with(server.connect(), "testserver")
        .await
        .expect("negotiate")
}

/// Connect, log on and attach to [`SHARE`].
pub async fn open_share(server: &TestServer, config: ClientConfig) -> (Connection, Session, Share) {
    init_tracing();
    let conn = connect(server, config).await;
    let session = conn
        .authenticate(&mut TestProvider::new(PASSWORD))
        .await
        .expect("logon");
    let share = session.connect_share(SHARE).await.expect("tree connect");
    (conn, session, share)
}

pub fn short_timeout() -> Duration {
    Duration::from_millis(200)
}
