//! Mailbox source: IMAP transport and MIME decoding
//!
//! - [`imap`]: tagged-command IMAP client and the [`ImapMailbox`] source
//! - [`mime`]: header and body extraction from raw messages

pub mod imap;
pub mod mime;

pub use imap::{ImapConnector, ImapError, ImapMailbox, ImapSession, TlsImapConnector};
pub use self::mime::{parse_message, ParsedMail};
