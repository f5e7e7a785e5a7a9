//! SESSION_SETUP exchange and the authenticated session.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use tracing::{debug, info, warn};

use crate::client::connection::Connection;
use crate::client::share::{Share, TreeState};
use crate::error::{Error, Result};
use crate::smb2::negotiate::SIGNING_ENABLED;
use crate::smb2::session::{Logoff, SessionSetupRequest, SessionSetupResponse};
use crate::smb2::status::NtStatus;
use crate::smb2::tree::{TreeConnectRequest, TreeConnectResponse};
use crate::smb2::Smb2Command;

/// Upper bound on SESSION_SETUP round trips for one logon.
const MAX_AUTH_LEGS: usize = 8;

/// Produces the security tokens carried in SESSION_SETUP.
///
/// The first call receives the blob from the NEGOTIATE response; each later
/// call receives the blob from the previous MORE_PROCESSING_REQUIRED reply.
pub trait SecurityProvider: Send {
    fn next_token(&mut self, server_token: &[u8]) -> Result<Vec<u8>>;
}

/// Identity handed to a [`SecurityProvider`].
#[derive(Clone, Default)]
pub struct AuthenticationContext {
    pub username: String,
    pub password: String,
    pub domain: String,
}

impl AuthenticationContext {
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        domain: impl Into<String>,
    ) -> Self {
        AuthenticationContext {
            username: username.into(),
            password: password.into(),
            domain: domain.into(),
        }
    }
}

impl fmt::Debug for AuthenticationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthenticationContext")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("domain", &self.domain)
            .finish()
    }
}

pub(crate) struct SessionState {
    pub id: u64,
    active: AtomicBool,
}

impl SessionState {
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

/// An authenticated session on a [`Connection`].
#[derive(Clone)]
pub struct Session {
    conn: Connection,
    state: Arc<SessionState>,
    guest: bool,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.state.id)
            .field("guest", &self.guest)
            .field("active", &self.state.is_active())
            .finish()
    }
}

pub(crate) async fn authenticate(
    conn: Connection,
    provider: &mut dyn SecurityProvider,
) -> Result<Session> {
    conn.ensure_open()?;
    let mut server_token = conn.security_blob().to_vec();
    let mut session_id = 0u64;

    for leg in 0..MAX_AUTH_LEGS {
        let req = SessionSetupRequest {
            flags: 0,
            security_mode: SIGNING_ENABLED as u8,
            capabilities: 0,
            previous_session_id: 0,
            security_buffer: provider.next_token(&server_token)?,
        };
        let mut body = BytesMut::with_capacity(24 + req.security_buffer.len());
        req.serialize(&mut body);

        let resp = conn.send(Smb2Command::SessionSetup, session_id, 0, &body).await?;
        session_id = resp.header.session_id;
        debug!(leg, session_id, status = %resp.status(), "SESSION_SETUP leg");

        match resp.status() {
            NtStatus::Success | NtStatus::MoreProcessingRequired => {}
            NtStatus::LogonFailure => {
                warn!(session_id, "Logon rejected");
                return Err(Error::AuthenticationFailed("logon failure".into()));
            }
            status => {
                return Err(Error::from_status(Smb2Command::SessionSetup, status, "session setup"))
            }
        }

        let setup = SessionSetupResponse::parse(&resp.body)
            .ok_or_else(|| Error::MalformedResponse("SESSION_SETUP response".into()))?;

        if resp.status() == NtStatus::Success {
            if session_id == 0 {
                return Err(Error::Protocol("server assigned session id 0".into()));
            }
            info!(session_id, guest = setup.is_guest(), "Session established");
            return Ok(Session {
                conn,
                state: Arc::new(SessionState {
                    id: session_id,
                    active: AtomicBool::new(true),
                }),
                guest: setup.is_guest(),
            });
        }
        server_token = setup.security_buffer;
    }

    Err(Error::Protocol(format!(
        "authentication did not finish within {} legs",
        MAX_AUTH_LEGS
    )))
}

impl Session {
    pub fn id(&self) -> u64 {
        self.state.id
    }

    pub fn is_guest(&self) -> bool {
        self.guest
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub(crate) fn ensure_active(&self) -> Result<()> {
        self.conn.ensure_open()?;
        if !self.state.is_active() {
            return Err(Error::HandleClosed);
        }
        Ok(())
    }

    /// Attach to `\\server\name`.
    pub async fn connect_share(&self, name: &str) -> Result<Share> {
        self.ensure_active()?;
        let name = name.trim_matches(|c| c == '\\' || c == '/');
        if name.is_empty() || name.contains(&['\\', '/'][..]) {
            return Err(Error::PathInvalid(format!("share name {:?}", name)));
        }

        let req = TreeConnectRequest {
            path: format!("\\\\{}\\{}", self.conn.server_name(), name),
        };
        let mut body = BytesMut::with_capacity(8 + 2 * req.path.len());
        req.serialize(&mut body);

        let resp = self
            .conn
            .send(Smb2Command::TreeConnect, self.state.id, 0, &body)
            .await?
            .expect_success(Smb2Command::TreeConnect, name)?;
        let tree = TreeConnectResponse::parse(&resp.body)
            .ok_or_else(|| Error::MalformedResponse("TREE_CONNECT response".into()))?;

        let tree_id = resp.header.tree_id;
        info!(
            session_id = self.state.id,
            tree_id,
            share = name,
            share_type = tree.share_type,
            "Share connected"
        );
        Ok(Share::new(
            self.conn.clone(),
            self.state.clone(),
            Arc::new(TreeState::new(tree_id, name.to_string(), tree.maximal_access)),
        ))
    }

    /// End the session. Shares and handles opened through it become unusable.
    /// Logging off twice is a no-op.
    pub async fn logoff(&self) -> Result<()> {
        if !self.state.active.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.conn.ensure_open()?;

        let mut body = BytesMut::with_capacity(4);
        Logoff.serialize(&mut body);
        self.conn
            .send(Smb2Command::Logoff, self.state.id, 0, &body)
            .await?
            .expect_success(Smb2Command::Logoff, "logoff")?;
        info!(session_id = self.state.id, "Logged off");
        Ok(())
    }
}
