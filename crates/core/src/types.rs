use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

use crate::error::{MailboxError, TransportError};

/// Where the personal fields of an account came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Generated,
    Imported,
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceType::Generated => write!(f, "generated"),
            SourceType::Imported => write!(f, "imported"),
        }
    }
}

/// Personal fields shared by every slot of a generated run.
/// A `None` name means every slot gets a random display name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityTemplate {
    pub name: Option<String>,
    pub birthdate: NaiveDate,
    pub country: String,
    pub gender: String,
}

/// One row of imported identity data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportedIdentity {
    pub name: String,
    pub birthdate: NaiveDate,
    pub country: String,
    pub gender: String,
    /// Mailbox the owner already controls; tried before any generated address
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub mailbox_password: Option<String>,
}

#[derive(Debug, Clone)]
pub enum IdentitySource {
    Generated { template: IdentityTemplate, count: usize },
    Imported(Vec<ImportedIdentity>),
}

/// Immutable input of one registration run
#[derive(Debug, Clone)]
pub struct AccountRequest {
    pub identities: IdentitySource,
    /// Catch-all domain used for generated candidate addresses
    pub email_domain: Option<String>,
    pub concurrency: usize,
}

impl AccountRequest {
    /// Number of accounts requested
    pub fn count(&self) -> usize {
        match &self.identities {
            IdentitySource::Generated { count, .. } => *count,
            IdentitySource::Imported(rows) => rows.len(),
        }
    }

    /// Expand the request into one input per account slot (1-based)
    pub fn slots(&self) -> Vec<SlotInput> {
        match &self.identities {
            IdentitySource::Generated { template, count } => (1..=*count)
                .map(|index| SlotInput {
                    index,
                    name: template.name.clone().filter(|n| !n.trim().is_empty()),
                    birthdate: template.birthdate,
                    country: template.country.clone(),
                    gender: template.gender.clone(),
                    source: SourceType::Generated,
                    own_mailbox: None,
                })
                .collect(),
            IdentitySource::Imported(rows) => rows
                .iter()
                .enumerate()
                .map(|(i, row)| SlotInput {
                    index: i + 1,
                    name: Some(row.name.clone()).filter(|n| !n.trim().is_empty()),
                    birthdate: row.birthdate,
                    country: row.country.clone(),
                    gender: row.gender.clone(),
                    source: SourceType::Imported,
                    own_mailbox: match (&row.email, &row.mailbox_password) {
                        (Some(email), Some(password)) if !email.is_empty() => Some(OwnMailbox {
                            email: email.clone(),
                            password: password.clone(),
                        }),
                        _ => None,
                    },
                })
                .collect(),
        }
    }
}

/// Mailbox address and secret supplied with an imported identity
#[derive(Clone)]
pub struct OwnMailbox {
    pub email: String,
    pub password: String,
}

impl fmt::Debug for OwnMailbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnMailbox")
            .field("email", &self.email)
            .field("password", &"***")
            .finish()
    }
}

/// Input of a single account slot
#[derive(Debug, Clone)]
pub struct SlotInput {
    pub index: usize,
    pub name: Option<String>,
    pub birthdate: NaiveDate,
    pub country: String,
    pub gender: String,
    pub source: SourceType,
    pub own_mailbox: Option<OwnMailbox>,
}

/// A successfully registered account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub email: String,
    pub password: String,
    pub name: String,
    pub birthdate: NaiveDate,
    pub country: String,
    pub gender: String,
    pub source: SourceType,
    pub target: String,
    pub registered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    CandidatesExhausted,
    UnexpectedException,
}

/// A slot that produced no account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub slot: usize,
    pub name: Option<String>,
    pub birthdate: NaiveDate,
    pub country: String,
    pub gender: String,
    pub source: SourceType,
    pub kind: FailureKind,
    pub reason: String,
    pub failed_at: DateTime<Utc>,
}

impl FailureRecord {
    pub fn for_slot(slot: &SlotInput, kind: FailureKind, reason: impl Into<String>) -> Self {
        Self {
            slot: slot.index,
            name: slot.name.clone(),
            birthdate: slot.birthdate,
            country: slot.country.clone(),
            gender: slot.gender.clone(),
            source: slot.source,
            kind,
            reason: reason.into(),
            failed_at: Utc::now(),
        }
    }
}

/// Login for a mailbox reachable over IMAP
#[derive(Clone, PartialEq, Eq)]
pub struct MailboxCredentials {
    pub host: String,
    pub port: u16,
    pub tls: bool,
    pub accept_invalid_certs: bool,
    pub username: String,
    pub password: String,
    pub folder: String,
}

impl fmt::Debug for MailboxCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MailboxCredentials")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("tls", &self.tls)
            .field("username", &self.username)
            .field("folder", &self.folder)
            .finish_non_exhaustive()
    }
}

/// One address from an attempt's ranked fallback list, with the mailbox its mail lands in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub email: String,
    pub mailbox: MailboxCredentials,
}

/// One-time value delivered by email
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Token(pub String);

impl Token {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Shape of the token a target mails out
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TokenKind {
    /// Query parameter of an activation link, e.g. `?k=...`
    LinkParameter {
        name: String,
        /// Only links whose href contains this text are considered
        #[serde(default)]
        host: Option<String>,
    },
    /// Fixed-width numeric code, usually shown in an emphasized cell
    NumericCode {
        digits: usize,
        /// CSS color of the emphasized cell, e.g. `#00cd3c`
        #[serde(default)]
        accent: Option<String>,
    },
}

/// Network steps of one candidate's signup, in protocol order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    VerifyEmail,
    SubmitForm,
    Activate,
    Complete,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Step::VerifyEmail => "email check",
            Step::SubmitForm => "form submit",
            Step::Activate => "activation",
            Step::Complete => "final registration",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// One request/response exchange with a target
#[derive(Debug, Clone)]
pub struct StepRequest {
    /// Short label used in logs and in response checks
    pub purpose: &'static str,
    pub method: HttpMethod,
    pub url: Url,
    pub form: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct StepResponse {
    pub status: u16,
    pub body: String,
}

impl StepResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP-like exchange with a registration target.
///
/// A session carries cookies and must be reused for every exchange of one candidate.
#[async_trait]
pub trait RegistrationTransport: Send + Sync + 'static {
    type Session: Send + 'static;

    async fn open_session(&self) -> Result<Self::Session, TransportError>;

    async fn exchange(
        &self,
        session: &mut Self::Session,
        request: &StepRequest,
    ) -> Result<StepResponse, TransportError>;
}

/// Mailbox-local message number
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessageId(pub u32);

/// Server-side search criteria
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageFilter {
    pub sender: Option<String>,
    pub recipient: Option<String>,
    pub unseen_only: bool,
}

/// Message retrieval protocol
#[async_trait]
pub trait MailboxTransport: Send + Sync + 'static {
    type Session: Send + 'static;

    async fn connect(&self, credentials: &MailboxCredentials) -> Result<Self::Session, MailboxError>;

    async fn list(
        &self,
        session: &mut Self::Session,
        filter: &MessageFilter,
    ) -> Result<Vec<MessageId>, MailboxError>;

    async fn fetch(&self, session: &mut Self::Session, id: MessageId) -> Result<Vec<u8>, MailboxError>;

    async fn mark_seen(&self, _session: &mut Self::Session, _id: MessageId) -> Result<(), MailboxError> {
        Ok(())
    }

    async fn logout(&self, _session: Self::Session) {}
}
