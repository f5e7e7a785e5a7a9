//! A negotiated SMB2 connection.
//!
//! One background task reads frames off the transport and routes each
//! response to the request waiting on its MessageId. Requests may be issued
//! concurrently from any task holding a clone of the [`Connection`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use bytes::BytesMut;
use rand::RngCore;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::client::session::{self, SecurityProvider, Session};
use crate::config::{ClientConfig, MAX_IO_SIZE};
use crate::error::{Error, Result};
use crate::smb2::header::{Smb2Header, SMB2_HEADER_SIZE};
use crate::smb2::negotiate::{NegotiateRequest, NegotiateResponse, SIGNING_ENABLED};
use crate::smb2::status::NtStatus;
use crate::smb2::Smb2Command;
use crate::transport::{FrameReader, FrameWriter, Transport, MAX_FRAME_SIZE};

/// A response frame split into its header and body.
#[derive(Debug)]
pub(crate) struct Response {
    pub header: Smb2Header,
    pub body: Vec<u8>,
}

impl Response {
    pub fn status(&self) -> NtStatus {
        self.header.status
    }

    /// Fail with the mapped error unless the server answered STATUS_SUCCESS.
    pub fn expect_success(self, command: Smb2Command, subject: &str) -> Result<Self> {
        match self.header.status {
            NtStatus::Success => Ok(self),
            status => Err(Error::from_status(command, status, subject)),
        }
    }
}

/// Parameters agreed in NEGOTIATE.
#[derive(Debug, Clone)]
struct Negotiated {
    dialect: u16,
    max_read_size: u32,
    max_write_size: u32,
    security_blob: Vec<u8>,
}

/// State shared between the connection and its reader task.
struct Shared {
    pending: Mutex<HashMap<u64, oneshot::Sender<Response>>>,
    closed: AtomicBool,
    close_reason: Mutex<Option<String>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Shared {
    /// Mark the connection dead and wake every waiter. The first reason wins.
    fn fail(&self, reason: String) {
        {
            let mut slot = lock(&self.close_reason);
            if slot.is_none() {
                *slot = Some(reason);
            }
        }
        self.closed.store(true, Ordering::SeqCst);
        lock(&self.pending).clear();
    }

    /// Park `tx` as the waiter for `message_id`. The closed flag is checked
    /// under the `pending` lock, so a concurrent `fail` either sees the new
    /// entry or the entry is never added.
    fn register(&self, message_id: u64, tx: oneshot::Sender<Response>) -> Result<()> {
        let mut pending = lock(&self.pending);
        if self.closed.load(Ordering::SeqCst) {
            return Err(self.closed_error());
        }
        pending.insert(message_id, tx);
        Ok(())
    }

    fn closed_error(&self) -> Error {
        let reason = lock(&self.close_reason)
            .clone()
            .unwrap_or_else(|| "connection closed".to_string());
        Error::Connection(reason)
    }
}

/// Removes a pending entry if the request future is dropped or times out.
struct PendingGuard<'a> {
    shared: &'a Shared,
    message_id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        lock(&self.shared.pending).remove(&self.message_id);
    }
}

pub(crate) struct ConnectionInner {
    writer: tokio::sync::Mutex<Box<dyn FrameWriter>>,
    shared: Arc<Shared>,
    next_message_id: AtomicU64,
    negotiated: OnceLock<Negotiated>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
    pub(crate) config: ClientConfig,
    pub(crate) server_name: String,
}

impl Drop for ConnectionInner {
    fn drop(&mut self) {
        if let Some(task) = lock(&self.reader_task).take() {
            task.abort();
        }
    }
}

/// An established, negotiated connection to one server.
///
/// Cheap to clone; all clones share the transport.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("server_name", &self.inner.server_name)
            .field("dialect", &self.dialect())
            .field("closed", &self.is_closed())
            .finish()
    }
}

async fn read_loop(mut reader: Box<dyn FrameReader>, shared: Arc<Shared>) {
    loop {
        let frame = match reader.read_frame().await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                debug!("Server closed the connection");
                shared.fail("connection closed by server".to_string());
                return;
            }
            Err(e) => {
                warn!(error = %e, "Transport read failed");
                shared.fail(format!("transport read failed: {}", e));
                return;
            }
        };

        let Some(header) = Smb2Header::parse(&frame) else {
            warn!(len = frame.len(), "Invalid SMB2 header from server");
            shared.fail("invalid SMB2 header from server".to_string());
            return;
        };

        if !header.is_response() {
            warn!(message_id = header.message_id, "Ignoring non-response frame");
            continue;
        }
        if header.is_interim() {
            debug!(message_id = header.message_id, async_id = header.async_id, "Interim response");
            continue;
        }

        let waiter = lock(&shared.pending).remove(&header.message_id);
        match waiter {
            Some(tx) => {
                let body = frame[SMB2_HEADER_SIZE..].to_vec();
                // The waiter may have given up in the meantime
                let _ = tx.send(Response { header, body });
            }
            None => {
                debug!(
                    message_id = header.message_id,
                    command = ?Smb2Command::from_u16(header.command),
                    "Discarding response nobody is waiting for"
                );
            }
        }
    }
}

impl Connection {
    /// Take over `transport`, start the reader and run NEGOTIATE.
    pub(crate) async fn establish(
        transport: Box<dyn Transport>,
        config: ClientConfig,
        server_name: String,
    ) -> Result<Connection> {
        let (reader, writer) = transport.split();
        let shared = Arc::new(Shared {
            pending: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            close_reason: Mutex::new(None),
        });
        let task = tokio::spawn(read_loop(reader, shared.clone()));

        let conn = Connection {
            inner: Arc::new(ConnectionInner {
                writer: tokio::sync::Mutex::new(writer),
                shared,
                next_message_id: AtomicU64::new(0),
                negotiated: OnceLock::new(),
                reader_task: Mutex::new(Some(task)),
                config,
                server_name,
            }),
        };
        conn.negotiate().await?;
        Ok(conn)
    }

    async fn negotiate(&self) -> Result<()> {
        let mut client_guid = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut client_guid);

        let req = NegotiateRequest {
            security_mode: SIGNING_ENABLED,
            capabilities: 0,
            client_guid,
            dialects: self.inner.config.dialects.clone(),
        };
        let mut body = BytesMut::with_capacity(36 + 2 * req.dialects.len());
        req.serialize(&mut body);

        let resp = self
            .send(Smb2Command::Negotiate, 0, 0, &body)
            .await?
            .expect_success(Smb2Command::Negotiate, &self.inner.server_name)?;
        let neg = NegotiateResponse::parse(&resp.body)
            .ok_or_else(|| Error::MalformedResponse("NEGOTIATE response".into()))?;

        if !self.inner.config.dialects.contains(&neg.dialect) {
            return Err(Error::Protocol(format!(
                "server selected dialect 0x{:04x}, which was not offered",
                neg.dialect
            )));
        }

        info!(
            server = %self.inner.server_name,
            dialect = format!("0x{:04x}", neg.dialect),
            max_read = neg.max_read_size,
            max_write = neg.max_write_size,
            "Negotiated"
        );
        let _ = self.inner.negotiated.set(Negotiated {
            dialect: neg.dialect,
            max_read_size: neg.max_read_size,
            max_write_size: neg.max_write_size,
            security_blob: neg.security_buffer,
        });
        Ok(())
    }

    /// Send one request and wait for its final response.
    pub(crate) async fn send(
        &self,
        command: Smb2Command,
        session_id: u64,
        tree_id: u32,
        body: &[u8],
    ) -> Result<Response> {
        let shared: &Shared = &self.inner.shared;
        if shared.closed.load(Ordering::SeqCst) {
            return Err(shared.closed_error());
        }

        let message_id = self.inner.next_message_id.fetch_add(1, Ordering::SeqCst);
        let header = Smb2Header::new_request(
            command,
            message_id,
            session_id,
            tree_id,
            self.inner.config.credits_requested,
        );
        let mut frame = BytesMut::with_capacity(SMB2_HEADER_SIZE + body.len());
        header.serialize(&mut frame);
        frame.extend_from_slice(body);
        if frame.len() > MAX_FRAME_SIZE as usize {
            return Err(Error::InvalidArgument(format!(
                "{:?} request of {} bytes exceeds the {} byte frame limit",
                command,
                frame.len(),
                MAX_FRAME_SIZE
            )));
        }

        let (tx, rx) = oneshot::channel();
        shared.register(message_id, tx)?;
        let _guard = PendingGuard { shared, message_id };

        debug!(?command, message_id, session_id, tree_id, "Sending request");
        {
            let mut writer = self.inner.writer.lock().await;
            if let Err(e) = writer.write_frame(&frame).await {
                warn!(?command, message_id, error = %e, "Transport write failed");
                shared.fail(format!("transport write failed: {}", e));
                return Err(shared.closed_error());
            }
        }

        let timeout = self.inner.config.request_timeout();
        let resp = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(_)) => return Err(shared.closed_error()),
            Err(_) => {
                warn!(?command, message_id, "Request timed out");
                return Err(Error::Timeout(timeout));
            }
        };

        if resp.header.command != command as u16 {
            return Err(Error::Protocol(format!(
                "response to {:?} (message {}) carries command {}",
                command, message_id, resp.header.command
            )));
        }
        debug!(?command, message_id, status = %resp.status(), "Received response");
        Ok(resp)
    }

    /// Authenticate a new session with `provider`. A rejected logon leaves
    /// the connection usable for another attempt.
    pub async fn authenticate(&self, provider: &mut dyn SecurityProvider) -> Result<Session> {
        session::authenticate(self.clone(), provider).await
    }

    /// Shut the transport down. Every later operation on this connection,
    /// or on anything opened through it, fails with `Error::Connection`.
    pub async fn close(&self) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        self.inner.shared.fail("connection closed by client".to_string());
        let result = self.inner.writer.lock().await.shutdown().await;
        if let Some(task) = lock(&self.inner.reader_task).take() {
            task.abort();
        }
        info!(server = %self.inner.server_name, "Connection closed");
        result.map_err(Error::from)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.shared.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(self.inner.shared.closed_error());
        }
        Ok(())
    }

    fn negotiated(&self) -> Option<&Negotiated> {
        self.inner.negotiated.get()
    }

    /// The dialect the server selected, `0` before NEGOTIATE completed.
    pub fn dialect(&self) -> u16 {
        self.negotiated().map(|n| n.dialect).unwrap_or(0)
    }

    pub fn server_name(&self) -> &str {
        &self.inner.server_name
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Largest single READ: the smallest of the configured limit, the
    /// negotiated limit and what fits in one frame.
    pub fn max_read_size(&self) -> u32 {
        let negotiated = self.negotiated().map(|n| n.max_read_size).unwrap_or(u32::MAX);
        self.inner.config.max_read_size.min(negotiated).clamp(1, MAX_IO_SIZE)
    }

    /// Largest single WRITE, bounded the same way as [`Self::max_read_size`].
    pub fn max_write_size(&self) -> u32 {
        let negotiated = self.negotiated().map(|n| n.max_write_size).unwrap_or(u32::MAX);
        self.inner.config.max_write_size.min(negotiated).clamp(1, MAX_IO_SIZE)
    }

    /// The security blob the server sent in NEGOTIATE.
    pub(crate) fn security_blob(&self) -> &[u8] {
        self.negotiated().map(|n| n.security_blob.as_slice()).unwrap_or(&[])
    }
}
