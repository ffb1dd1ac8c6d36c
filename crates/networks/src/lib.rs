pub mod http;
pub mod mailbox;

pub use self::http::{HttpSession, HttpTransport};
pub use self::mailbox::{ImapConnection, ImapMailbox};
