use chrono::NaiveDate;
use serde::Deserialize;

use crate::error::ConfigError;
use crate::types::{MailboxCredentials, TokenKind};

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub general: GeneralConfig,
    pub identity: IdentityConfig,
    pub mailbox: MailboxConfig,
    #[serde(default)]
    pub poll: PollConfig,
    pub target: TargetConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.general.concurrency == 0 {
            return Err(ConfigError::Invalid("general.concurrency must be at least 1".into()));
        }
        if self.general.candidates_per_attempt == 0 {
            return Err(ConfigError::Invalid(
                "general.candidates_per_attempt must be at least 1".into(),
            ));
        }
        if self.poll.interval_ms == 0 {
            return Err(ConfigError::Invalid("poll.interval_ms must be positive".into()));
        }
        if let TokenKind::NumericCode { digits: 0, .. } = self.target.token {
            return Err(ConfigError::Invalid("target.token.digits must be positive".into()));
        }
        if self.target.kind == TargetKind::SealedForm && self.target.cipher_key.is_empty() {
            return Err(ConfigError::Invalid(
                "target.cipher_key is required for sealed_form targets".into(),
            ));
        }
        url::Url::parse(&self.target.base_url)
            .map_err(|e| ConfigError::Invalid(format!("target.base_url: {}", e)))?;
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GeneralConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Length of each attempt's fallback list
    #[serde(default = "default_candidates")]
    pub candidates_per_attempt: usize,
    #[serde(default = "default_export_path")]
    pub export_path: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IdentityConfig {
    /// Catch-all domain of generated addresses. Its mail must arrive in `[mailbox]`.
    pub email_domain: Option<String>,
    #[serde(default = "default_local_part_length")]
    pub local_part_length: usize,
    #[serde(default = "default_password_length")]
    pub password_length: usize,
    pub name: Option<String>,
    #[serde(default = "default_birthdate")]
    pub birthdate: NaiveDate,
    #[serde(default = "default_country")]
    pub country: String,
    #[serde(default = "default_gender")]
    pub gender: String,
}

/// Collector mailbox that receives mail for generated addresses
#[derive(Debug, Deserialize, Clone)]
pub struct MailboxConfig {
    pub host: String,
    #[serde(default = "default_imap_port")]
    pub port: u16,
    #[serde(default = "default_true")]
    pub tls: bool,
    #[serde(default)]
    pub accept_invalid_certs: bool,
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_folder")]
    pub folder: String,
}

impl MailboxConfig {
    pub fn credentials(&self) -> MailboxCredentials {
        MailboxCredentials {
            host: self.host.clone(),
            port: self.port,
            tls: self.tls,
            accept_invalid_certs: self.accept_invalid_certs,
            username: self.username.clone(),
            password: self.password.clone(),
            folder: self.folder.clone(),
        }
    }

    /// Credentials for a user-owned mailbox. Well-known providers get their own IMAP host,
    /// anything else falls back to `imap.<domain>`.
    pub fn credentials_for(&self, address: &str, password: &str) -> MailboxCredentials {
        let domain = address.rsplit_once('@').map(|(_, d)| d.to_lowercase()).unwrap_or_default();
        let host = known_imap_host(&domain)
            .map(str::to_string)
            .unwrap_or_else(|| format!("imap.{}", domain));
        MailboxCredentials {
            host,
            port: 993,
            tls: true,
            accept_invalid_certs: self.accept_invalid_certs,
            username: address.to_string(),
            password: password.to_string(),
            folder: default_folder(),
        }
    }
}

fn known_imap_host(domain: &str) -> Option<&'static str> {
    match domain {
        "qq.com" | "foxmail.com" => Some("imap.qq.com"),
        "gmail.com" | "googlemail.com" => Some("imap.gmail.com"),
        "outlook.com" | "hotmail.com" | "live.com" | "msn.com" => Some("outlook.office365.com"),
        "163.com" => Some("imap.163.com"),
        "126.com" => Some("imap.126.com"),
        "sina.com" | "sina.cn" => Some("imap.sina.com"),
        "yahoo.com" | "yahoo.cn" => Some("imap.mail.yahoo.com"),
        "naver.com" => Some("imap.naver.com"),
        _ => None,
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PollConfig {
    #[serde(default = "default_poll_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_poll_interval")]
    pub interval_ms: u64,
    /// How many of the newest matching messages are inspected per round
    #[serde(default = "default_recent_limit")]
    pub recent_limit: usize,
    #[serde(default = "default_true")]
    pub unseen_only: bool,
    #[serde(default)]
    pub subject_keywords: Vec<String>,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_poll_timeout(),
            interval_ms: default_poll_interval(),
            recent_limit: default_recent_limit(),
            unseen_only: true,
            subject_keywords: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    ResultCode,
    SealedForm,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TargetConfig {
    pub kind: TargetKind,
    pub name: String,
    pub base_url: String,
    #[serde(default)]
    pub landing_path: Option<String>,
    pub verify_email_path: String,
    pub submit_form_path: String,
    /// Separate exchange that asks the target to send the verification mail
    #[serde(default)]
    pub send_mail_path: Option<String>,
    pub activate_path: String,
    #[serde(default)]
    pub complete_path: Option<String>,
    /// Sender address of the verification mail
    #[serde(default)]
    pub mail_sender: Option<String>,
    pub token: TokenKind,
    /// Result codes of the email check that mean the address is free
    #[serde(default = "default_verify_codes")]
    pub verify_codes: Vec<String>,
    #[serde(default = "default_accept_codes")]
    pub accept_codes: Vec<String>,
    #[serde(default = "default_result_code_field")]
    pub result_code_field: String,
    #[serde(default = "default_result_message_field")]
    pub result_message_field: String,
    /// Body substrings that mark a rejection on HTML responses
    #[serde(default)]
    pub rejection_markers: Vec<String>,
    /// Hidden field copied from the form response into later requests
    #[serde(default)]
    pub carry_field: Option<String>,
    #[serde(default)]
    pub cipher_key: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default)]
    pub proxy: Option<String>,
}

fn default_concurrency() -> usize { 4 }
fn default_candidates() -> usize { 3 }
fn default_export_path() -> String { "accounts.json".to_string() }
fn default_local_part_length() -> usize { 10 }
fn default_password_length() -> usize { 12 }
fn default_birthdate() -> NaiveDate { NaiveDate::from_ymd_opt(2000, 1, 1).unwrap_or_default() }
fn default_country() -> String { "Korea".to_string() }
fn default_gender() -> String { "m".to_string() }
fn default_imap_port() -> u16 { 993 }
fn default_true() -> bool { true }
fn default_folder() -> String { "INBOX".to_string() }
fn default_poll_timeout() -> u64 { 300 }
fn default_poll_interval() -> u64 { 5_000 }
fn default_recent_limit() -> usize { 5 }
fn default_verify_codes() -> Vec<String> { vec!["00".to_string(), "03".to_string()] }
fn default_accept_codes() -> Vec<String> { vec!["00".to_string()] }
fn default_result_code_field() -> String { "ResultCode".to_string() }
fn default_result_message_field() -> String { "ResultMsg".to_string() }
fn default_request_timeout() -> u64 { 30 }
fn default_connect_timeout() -> u64 { 10 }
fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36".to_string()
}
