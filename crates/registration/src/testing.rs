//! In-memory transports for engine and orchestrator tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use bulkreg_core::config::TargetConfig;
use bulkreg_core::{
    MailboxCredentials, MailboxError, MailboxTransport, MessageFilter, MessageId, RegistrationTransport,
    StepRequest, StepResponse, TransportError,
};

use crate::poller::PollSettings;

pub const SENDER: &str = "noreply@signup.test";

pub fn mail_with_link(recipient: &str, token: &str) -> Vec<u8> {
    format!(
        "From: Signup <{sender}>\r\n\
To: {recipient}\r\n\
Subject: Verify your email\r\n\
Content-Type: text/html; charset=utf-8\r\n\
\r\n\
<html><body><a href=\"https://signup.test/activate?email={recipient}&amp;k={token}\">Activate</a></body></html>\r\n",
        sender = SENDER,
        recipient = recipient,
        token = token,
    )
    .into_bytes()
}

pub fn target_config() -> TargetConfig {
    toml::from_str(&format!(
        r#"
        kind = "result_code"
        name = "mock-site"
        base_url = "https://signup.test"
        verify_email_path = "/check"
        submit_form_path = "/join"
        activate_path = "/activate"
        complete_path = "/complete"
        mail_sender = "{}"
        rejection_markers = ["is not valid"]

        [token]
        kind = "link_parameter"
        name = "k"
        "#,
        SENDER
    ))
    .unwrap()
}

pub fn poll_settings(timeout_ms: u64, interval_ms: u64) -> PollSettings {
    PollSettings {
        timeout: Duration::from_millis(timeout_ms),
        interval: Duration::from_millis(interval_ms),
        recent_limit: 5,
        unseen_only: true,
        subject_keywords: Vec::new(),
    }
}

#[derive(Debug, Clone)]
struct StoredMail {
    recipient: String,
    raw: Vec<u8>,
    seen: bool,
}

#[derive(Default)]
struct MailboxState {
    mails: Mutex<Vec<StoredMail>>,
    seen: AtomicUsize,
    logouts: AtomicUsize,
    connects: AtomicUsize,
}

/// Shared catch-all mailbox
#[derive(Clone, Default)]
pub struct MockMailbox {
    state: Arc<MailboxState>,
    list_delay: Option<Duration>,
    refuse: bool,
}

impl MockMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_list_delay(mut self, delay: Duration) -> Self {
        self.list_delay = Some(delay);
        self
    }

    pub fn refusing_connections(mut self) -> Self {
        self.refuse = true;
        self
    }

    pub fn credentials() -> MailboxCredentials {
        MailboxCredentials {
            host: "imap.catch.test".to_string(),
            port: 993,
            tls: true,
            accept_invalid_certs: false,
            username: "collector@catch.test".to_string(),
            password: "collector-secret".to_string(),
            folder: "INBOX".to_string(),
        }
    }

    pub fn deliver(&self, recipient: &str, raw: Vec<u8>) {
        self.state.mails.lock().unwrap().push(StoredMail {
            recipient: recipient.to_string(),
            raw,
            seen: false,
        });
    }

    pub fn seen_count(&self) -> usize {
        self.state.seen.load(Ordering::SeqCst)
    }

    pub fn logouts(&self) -> usize {
        self.state.logouts.load(Ordering::SeqCst)
    }

    pub fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }
}

pub struct MockMailboxSession;

#[async_trait]
impl MailboxTransport for MockMailbox {
    type Session = MockMailboxSession;

    async fn connect(&self, _credentials: &MailboxCredentials) -> Result<MockMailboxSession, MailboxError> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        if self.refuse {
            return Err(MailboxError::Connect("connection refused".to_string()));
        }
        Ok(MockMailboxSession)
    }

    async fn list(
        &self,
        _session: &mut MockMailboxSession,
        filter: &MessageFilter,
    ) -> Result<Vec<MessageId>, MailboxError> {
        if let Some(delay) = self.list_delay {
            tokio::time::sleep(delay).await;
        }
        let mails = self.state.mails.lock().unwrap();
        Ok(mails
            .iter()
            .enumerate()
            .filter(|(_, m)| filter.recipient.as_deref().map_or(true, |r| r == m.recipient))
            .filter(|(_, m)| !(filter.unseen_only && m.seen))
            .map(|(i, _)| MessageId(i as u32 + 1))
            .collect())
    }

    async fn fetch(&self, _session: &mut MockMailboxSession, id: MessageId) -> Result<Vec<u8>, MailboxError> {
        let mails = self.state.mails.lock().unwrap();
        mails
            .get(id.0 as usize - 1)
            .map(|m| m.raw.clone())
            .ok_or(MailboxError::Fetch { id: id.0, reason: "no such message".to_string() })
    }

    async fn mark_seen(&self, _session: &mut MockMailboxSession, id: MessageId) -> Result<(), MailboxError> {
        let mut mails = self.state.mails.lock().unwrap();
        if let Some(m) = mails.get_mut(id.0 as usize - 1) {
            m.seen = true;
            self.state.seen.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn logout(&self, _session: MockMailboxSession) {
        self.state.logouts.fetch_add(1, Ordering::SeqCst);
    }
}

/// One exchange seen by the mock target
#[derive(Debug, Clone)]
pub struct Call {
    pub session: usize,
    pub purpose: &'static str,
    pub email: Option<String>,
}

#[derive(Default)]
struct TransportState {
    calls: Mutex<Vec<Call>>,
    sessions: AtomicUsize,
    live: AtomicUsize,
    peak_live: AtomicUsize,
}

/// Scripted registration target. Accepts everything unless a rule says otherwise and
/// mails a link token to the candidate address when the form is submitted.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<TransportState>,
    mailbox: Option<MockMailbox>,
    rules: Arc<Mutex<HashMap<(&'static str, String), StepResponse>>>,
    reject_all: Arc<Mutex<HashMap<&'static str, StepResponse>>>,
    panic_for: Option<String>,
    delay: Option<Duration>,
    silent: bool,
}

pub struct MockSession {
    id: usize,
    state: Arc<TransportState>,
}

impl Drop for MockSession {
    fn drop(&mut self) {
        self.state.live.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockTransport {
    pub fn new(mailbox: &MockMailbox) -> Self {
        Self {
            mailbox: Some(mailbox.clone()),
            ..Default::default()
        }
    }

    /// Reject `purpose` for one address with a result code
    pub fn reject(self, purpose: &'static str, email: &str, code: &str) -> Self {
        self.rules
            .lock()
            .unwrap()
            .insert((purpose, email.to_string()), json_code(code));
        self
    }

    /// Reject `purpose` for every address
    pub fn reject_every(self, purpose: &'static str, code: &str) -> Self {
        self.reject_all.lock().unwrap().insert(purpose, json_code(code));
        self
    }

    /// Panic inside the exchange when the address contains `needle`
    pub fn panic_for(mut self, needle: &str) -> Self {
        self.panic_for = Some(needle.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Accept the form but never send mail
    pub fn without_mail(mut self) -> Self {
        self.silent = true;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, purpose: &str) -> usize {
        self.calls().iter().filter(|c| c.purpose == purpose).count()
    }

    pub fn sessions_opened(&self) -> usize {
        self.state.sessions.load(Ordering::SeqCst)
    }

    pub fn peak_live_sessions(&self) -> usize {
        self.state.peak_live.load(Ordering::SeqCst)
    }
}

pub fn token_for(email: &str) -> String {
    format!("tok-{}", email.split('@').next().unwrap_or_default())
}

fn json_code(code: &str) -> StepResponse {
    StepResponse {
        status: 200,
        body: format!(r#"{{"ResultCode":"{}","ResultMsg":"rejected by mock"}}"#, code),
    }
}

#[async_trait]
impl RegistrationTransport for MockTransport {
    type Session = MockSession;

    async fn open_session(&self) -> Result<MockSession, TransportError> {
        let id = self.state.sessions.fetch_add(1, Ordering::SeqCst) + 1;
        let live = self.state.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.peak_live.fetch_max(live, Ordering::SeqCst);
        Ok(MockSession { id, state: Arc::clone(&self.state) })
    }

    async fn exchange(
        &self,
        session: &mut MockSession,
        request: &StepRequest,
    ) -> Result<StepResponse, TransportError> {
        let email = request
            .form
            .iter()
            .find(|(k, _)| k == "email")
            .map(|(_, v)| v.clone());
        self.state.calls.lock().unwrap().push(Call {
            session: session.id,
            purpose: request.purpose,
            email: email.clone(),
        });

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let (Some(needle), Some(email)) = (&self.panic_for, &email) {
            if email.contains(needle.as_str()) {
                panic!("mock target blew up for {}", email);
            }
        }

        let email = email.unwrap_or_default();
        if let Some(resp) = self.reject_all.lock().unwrap().get(request.purpose) {
            return Ok(resp.clone());
        }
        if let Some(resp) = self.rules.lock().unwrap().get(&(request.purpose, email.clone())) {
            return Ok(resp.clone());
        }

        if request.purpose == "submit_form" && !self.silent {
            if let Some(mailbox) = &self.mailbox {
                mailbox.deliver(&email, mail_with_link(&email, &token_for(&email)));
            }
        }
        if request.purpose == "activate" {
            let token = request.form.iter().find(|(k, _)| k == "k").map(|(_, v)| v.as_str());
            if token != Some(token_for(&email).as_str()) {
                return Ok(StepResponse {
                    status: 200,
                    body: "<script>alert('The authentication key is not valid');</script>".to_string(),
                });
            }
        }

        Ok(json_code("00"))
    }
}
