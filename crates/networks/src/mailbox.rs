//! IMAP mailbox transport.
//!
//! The `imap` crate is synchronous, so every command runs on tokio's blocking pool.
//! The session is moved into the blocking closure and handed back afterwards.

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use async_trait::async_trait;
use native_tls::{TlsConnector, TlsStream};
use tracing::{debug, info, warn};

use bulkreg_core::{MailboxCredentials, MailboxError, MailboxTransport, MessageFilter, MessageId};

pub struct ImapMailbox {
    connect_timeout: Duration,
    io_timeout: Duration,
}

impl Default for ImapMailbox {
    fn default() -> Self {
        Self::new(Duration::from_secs(15), Duration::from_secs(30))
    }
}

enum ImapSession {
    Tls(imap::Session<TlsStream<TcpStream>>),
    Plain(imap::Session<TcpStream>),
}

/// Logged-in IMAP session with the configured folder selected
pub struct ImapConnection {
    inner: Option<ImapSession>,
    account: String,
}

impl ImapMailbox {
    pub fn new(connect_timeout: Duration, io_timeout: Duration) -> Self {
        Self { connect_timeout, io_timeout }
    }

    fn open(
        creds: &MailboxCredentials,
        connect_timeout: Duration,
        io_timeout: Duration,
    ) -> Result<ImapSession, MailboxError> {
        let addr = (creds.host.as_str(), creds.port)
            .to_socket_addrs()
            .map_err(|e| MailboxError::Connect(format!("{}: {}", creds.host, e)))?
            .next()
            .ok_or_else(|| MailboxError::Connect(format!("{}: no address", creds.host)))?;

        let stream = TcpStream::connect_timeout(&addr, connect_timeout)
            .map_err(|e| MailboxError::Connect(e.to_string()))?;
        stream
            .set_read_timeout(Some(io_timeout))
            .and_then(|_| stream.set_write_timeout(Some(io_timeout)))
            .map_err(|e| MailboxError::Connect(e.to_string()))?;

        if creds.tls {
            let connector = TlsConnector::builder()
                .danger_accept_invalid_certs(creds.accept_invalid_certs)
                .build()
                .map_err(|e| MailboxError::Connect(e.to_string()))?;
            let tls = connector
                .connect(&creds.host, stream)
                .map_err(|e| MailboxError::Connect(format!("tls: {}", e)))?;
            login(imap::Client::new(tls), creds).map(ImapSession::Tls)
        } else {
            login(imap::Client::new(stream), creds).map(ImapSession::Plain)
        }
    }
}

fn login<T: Read + Write>(
    mut client: imap::Client<T>,
    creds: &MailboxCredentials,
) -> Result<imap::Session<T>, MailboxError> {
    client
        .read_greeting()
        .map_err(|e| MailboxError::Connect(format!("greeting: {}", e)))?;
    let mut session = client
        .login(&creds.username, &creds.password)
        .map_err(|(e, _)| MailboxError::Login(e.to_string()))?;
    session
        .select(&creds.folder)
        .map_err(|e| MailboxError::Command(format!("select {}: {}", creds.folder, e)))?;
    Ok(session)
}

/// IMAP SEARCH criteria for a filter. Quotes are stripped from values.
pub fn search_query(filter: &MessageFilter) -> String {
    let mut parts = Vec::new();
    if let Some(sender) = &filter.sender {
        parts.push(format!("FROM \"{}\"", sender.replace('"', "")));
    }
    if let Some(recipient) = &filter.recipient {
        parts.push(format!("TO \"{}\"", recipient.replace('"', "")));
    }
    if filter.unseen_only {
        parts.push("UNSEEN".to_string());
    }
    if parts.is_empty() {
        "ALL".to_string()
    } else {
        parts.join(" ")
    }
}

fn search<T: Read + Write>(session: &mut imap::Session<T>, query: &str) -> Result<Vec<MessageId>, MailboxError> {
    let found = session
        .search(query)
        .map_err(|e| MailboxError::Command(format!("search: {}", e)))?;
    let mut ids: Vec<MessageId> = found.into_iter().map(MessageId).collect();
    ids.sort();
    Ok(ids)
}

fn fetch<T: Read + Write>(session: &mut imap::Session<T>, id: MessageId) -> Result<Vec<u8>, MailboxError> {
    let fetches = session
        .fetch(id.0.to_string(), "BODY.PEEK[]")
        .map_err(|e| MailboxError::Fetch { id: id.0, reason: e.to_string() })?;
    fetches
        .iter()
        .find_map(|f| f.body())
        .map(<[u8]>::to_vec)
        .ok_or_else(|| MailboxError::Fetch { id: id.0, reason: "empty body".to_string() })
}

fn mark_seen<T: Read + Write>(session: &mut imap::Session<T>, id: MessageId) -> Result<(), MailboxError> {
    session
        .store(id.0.to_string(), "+FLAGS (\\Seen)")
        .map(|_| ())
        .map_err(|e| MailboxError::Command(format!("store: {}", e)))
}

impl ImapSession {
    fn search(&mut self, query: &str) -> Result<Vec<MessageId>, MailboxError> {
        match self {
            ImapSession::Tls(s) => search(s, query),
            ImapSession::Plain(s) => search(s, query),
        }
    }

    fn fetch(&mut self, id: MessageId) -> Result<Vec<u8>, MailboxError> {
        match self {
            ImapSession::Tls(s) => fetch(s, id),
            ImapSession::Plain(s) => fetch(s, id),
        }
    }

    fn mark_seen(&mut self, id: MessageId) -> Result<(), MailboxError> {
        match self {
            ImapSession::Tls(s) => mark_seen(s, id),
            ImapSession::Plain(s) => mark_seen(s, id),
        }
    }

    fn logout(&mut self) -> Result<(), String> {
        match self {
            ImapSession::Tls(s) => s.logout().map_err(|e| e.to_string()),
            ImapSession::Plain(s) => s.logout().map_err(|e| e.to_string()),
        }
    }
}

impl ImapConnection {
    /// Run one blocking command against the session.
    async fn with_session<R, F>(&mut self, op: F) -> Result<R, MailboxError>
    where
        R: Send + 'static,
        F: FnOnce(&mut ImapSession) -> Result<R, MailboxError> + Send + 'static,
    {
        let mut session = self.inner.take().ok_or(MailboxError::Disconnected)?;
        let (session, result) = tokio::task::spawn_blocking(move || {
            let result = op(&mut session);
            (session, result)
        })
        .await
        .map_err(|_| MailboxError::Disconnected)?;
        self.inner = Some(session);
        result
    }
}

#[async_trait]
impl MailboxTransport for ImapMailbox {
    type Session = ImapConnection;

    async fn connect(&self, credentials: &MailboxCredentials) -> Result<ImapConnection, MailboxError> {
        let creds = credentials.clone();
        let (connect_timeout, io_timeout) = (self.connect_timeout, self.io_timeout);
        let session = tokio::task::spawn_blocking(move || Self::open(&creds, connect_timeout, io_timeout))
            .await
            .map_err(|e| MailboxError::Connect(e.to_string()))??;

        info!(account = %credentials.username, host = %credentials.host, "mailbox connected");
        Ok(ImapConnection {
            inner: Some(session),
            account: credentials.username.clone(),
        })
    }

    async fn list(
        &self,
        session: &mut ImapConnection,
        filter: &MessageFilter,
    ) -> Result<Vec<MessageId>, MailboxError> {
        let query = search_query(filter);
        let ids = session.with_session(move |s| s.search(&query)).await?;
        debug!(account = %session.account, matches = ids.len(), "mailbox search");
        Ok(ids)
    }

    async fn fetch(&self, session: &mut ImapConnection, id: MessageId) -> Result<Vec<u8>, MailboxError> {
        session.with_session(move |s| s.fetch(id)).await
    }

    async fn mark_seen(&self, session: &mut ImapConnection, id: MessageId) -> Result<(), MailboxError> {
        session.with_session(move |s| s.mark_seen(id)).await
    }

    async fn logout(&self, mut session: ImapConnection) {
        let account = session.account.clone();
        let Some(mut inner) = session.inner.take() else {
            return;
        };
        match tokio::task::spawn_blocking(move || inner.logout()).await {
            Ok(Ok(())) => debug!(account = %account, "mailbox logged out"),
            Ok(Err(e)) => warn!(account = %account, error = %e, "mailbox logout failed"),
            Err(e) => warn!(account = %account, error = %e, "mailbox logout task failed"),
        }
    }
}
