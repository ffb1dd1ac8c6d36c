pub mod register;

use anyhow::{bail, Context, Result};
use bulkreg_core::config::AppConfig;
use bulkreg_core::{ImportedIdentity, MailboxTransport, MessageFilter};
use bulkreg_networks::ImapMailbox;

/// Read a JSON array of identities
pub fn load_identities(path: &str) -> Result<Vec<ImportedIdentity>> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path))?;
    let identities: Vec<ImportedIdentity> =
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", path))?;
    if identities.is_empty() {
        bail!("{} contains no identities", path);
    }
    Ok(identities)
}

pub async fn run_probe(
    config: AppConfig,
    email: Option<String>,
    password: Option<String>,
    sender: Option<String>,
) -> Result<()> {
    let credentials = match (email, password) {
        (Some(email), Some(password)) => config.mailbox.credentials_for(&email, &password),
        (Some(_), None) => bail!("--email needs --password"),
        _ => config.mailbox.credentials(),
    };

    let mailbox = ImapMailbox::default();
    let mut session = match mailbox.connect(&credentials).await {
        Ok(session) => session,
        Err(e) => {
            println!("Mailbox {} ({}): ERROR - {}", credentials.username, credentials.host, e);
            return Ok(());
        }
    };
    println!("Mailbox {} ({}): connected", credentials.username, credentials.host);

    let filter = MessageFilter {
        sender,
        recipient: None,
        unseen_only: false,
    };
    let all = mailbox.list(&mut session, &filter).await;
    let unseen = mailbox
        .list(&mut session, &MessageFilter { unseen_only: true, ..filter })
        .await;
    mailbox.logout(session).await;

    println!("Folder:           {}", credentials.folder);
    println!("Messages:         {}", all?.len());
    println!("Unseen:           {}", unseen?.len());

    Ok(())
}
