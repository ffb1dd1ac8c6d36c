use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use bulkreg_core::config::PollConfig;
use bulkreg_core::{MailboxCredentials, MailboxTransport, MessageFilter, MessageId, Token, TokenKind};
use bulkreg_parser::{extract_from_message, parse_message};

/// Polling behaviour shared by every attempt of a run
#[derive(Debug, Clone)]
pub struct PollSettings {
    pub timeout: Duration,
    pub interval: Duration,
    pub recent_limit: usize,
    pub unseen_only: bool,
    pub subject_keywords: Vec<String>,
}

impl From<&PollConfig> for PollSettings {
    fn from(config: &PollConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.timeout_secs),
            interval: Duration::from_millis(config.interval_ms.max(1)),
            recent_limit: config.recent_limit,
            unseen_only: config.unseen_only,
            subject_keywords: config.subject_keywords.clone(),
        }
    }
}

impl PollSettings {
    /// Request for mail sent to `recipient`
    pub fn request(&self, sender: Option<&str>, recipient: &str, kind: TokenKind) -> PollRequest {
        PollRequest {
            filter: MessageFilter {
                sender: sender.map(str::to_string),
                recipient: Some(recipient.to_string()),
                unseen_only: self.unseen_only,
            },
            kind,
            subject_keywords: self.subject_keywords.clone(),
            timeout: self.timeout,
            interval: self.interval,
            recent_limit: self.recent_limit,
        }
    }
}

/// What to look for and how long to wait
#[derive(Debug, Clone)]
pub struct PollRequest {
    pub filter: MessageFilter,
    pub kind: TokenKind,
    pub subject_keywords: Vec<String>,
    pub timeout: Duration,
    pub interval: Duration,
    /// Newest matching messages inspected per round
    pub recent_limit: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Token(Token),
    TimedOut,
    ConnectionFailed(String),
}

/// Wait for a verification token to arrive in a mailbox.
///
/// Connects once, then searches every `interval` until `timeout`. Never runs longer
/// than `timeout + interval`, however slow the mailbox is.
pub async fn await_token<M: MailboxTransport>(
    mailbox: &M,
    credentials: &MailboxCredentials,
    request: &PollRequest,
) -> PollOutcome {
    let hard_limit = request.timeout + request.interval;
    match tokio::time::timeout(hard_limit, poll(mailbox, credentials, request)).await {
        Ok(outcome) => outcome,
        Err(_) => {
            warn!(
                account = %credentials.username,
                limit_ms = hard_limit.as_millis() as u64,
                "mailbox poll hit hard limit"
            );
            PollOutcome::TimedOut
        }
    }
}

async fn poll<M: MailboxTransport>(
    mailbox: &M,
    credentials: &MailboxCredentials,
    request: &PollRequest,
) -> PollOutcome {
    let mut session = match mailbox.connect(credentials).await {
        Ok(session) => session,
        Err(e) => {
            warn!(account = %credentials.username, error = %e, "mailbox connection failed");
            return PollOutcome::ConnectionFailed(e.to_string());
        }
    };

    let deadline = Instant::now() + request.timeout;
    let mut rounds = 0u32;
    let outcome = loop {
        rounds += 1;
        if let Some((id, token)) = scan(mailbox, &mut session, request).await {
            if let Err(e) = mailbox.mark_seen(&mut session, id).await {
                debug!(message = id.0, error = %e, "mark seen failed");
            }
            info!(
                recipient = ?request.filter.recipient,
                rounds,
                "verification token received"
            );
            break PollOutcome::Token(token);
        }

        let now = Instant::now();
        if now >= deadline {
            info!(recipient = ?request.filter.recipient, rounds, "no verification token before timeout");
            break PollOutcome::TimedOut;
        }
        tokio::time::sleep(request.interval.min(deadline - now)).await;
    };

    mailbox.logout(session).await;
    outcome
}

/// One search round, newest messages first
async fn scan<M: MailboxTransport>(
    mailbox: &M,
    session: &mut M::Session,
    request: &PollRequest,
) -> Option<(MessageId, Token)> {
    let ids = match mailbox.list(session, &request.filter).await {
        Ok(ids) => ids,
        Err(e) => {
            warn!(error = %e, "mailbox search failed, will retry");
            return None;
        }
    };

    for id in ids.into_iter().rev().take(request.recent_limit.max(1)) {
        let raw = match mailbox.fetch(session, id).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(message = id.0, error = %e, "message fetch failed");
                continue;
            }
        };
        let Some(message) = parse_message(&raw) else {
            continue;
        };
        if !message.subject_contains_any(&request.subject_keywords) {
            debug!(message = id.0, subject = ?message.subject, "subject does not match");
            continue;
        }
        if let Some(token) = extract_from_message(&message, &request.kind) {
            return Some((id, token));
        }
        debug!(message = id.0, "no token in message");
    }
    None
}
