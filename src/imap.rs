//! IMAP transport and session operations
//!
//! Provides timeout-bounded wrappers around `async-imap` operations. All network
//! calls are enforced to use TLS and authentication uses the XOAUTH2 SASL
//! mechanism carrying an OAuth2 bearer token.

use std::sync::Arc;

use async_imap::types::{Fetch, Flag, Name};
use async_imap::{Authenticator, Client, Session};
use futures::TryStreamExt;
use rustls::ClientConfig;
use rustls::RootCertStore;
use rustls_pki_types::ServerName;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};

use crate::config::{MailboxConfig, Timeouts};
use crate::errors::{AppError, AppResult};

/// Type alias for authenticated IMAP session over TLS
///
/// Wraps the TLS stream type to simplify signatures throughout the codebase.
pub type ImapSession = Session<tokio_rustls::client::TlsStream<TcpStream>>;

/// Fetch items for a full message: flags, arrival date, and the raw source
///
/// `BODY.PEEK[]` leaves the `\Seen` flag untouched.
pub const FULL_MESSAGE_QUERY: &str = "(UID FLAGS INTERNALDATE BODY.PEEK[])";

/// XOAUTH2 SASL initial response
///
/// The first challenge is answered with `user=..^Aauth=Bearer ..^A^A`. When the
/// server rejects the token it sends a JSON error as a second challenge, which
/// must be acknowledged with an empty response before the tagged `NO` arrives.
struct XOAuth2 {
    user: String,
    access_token: String,
    sent: bool,
}

impl Authenticator for XOAuth2 {
    type Response = String;

    fn process(&mut self, challenge: &[u8]) -> Self::Response {
        if self.sent {
            warn!(
                challenge = %String::from_utf8_lossy(challenge),
                "XOAUTH2 rejected by server"
            );
            return String::new();
        }
        self.sent = true;
        xoauth2_payload(&self.user, &self.access_token)
    }
}

/// Build the unencoded XOAUTH2 payload; `async-imap` base64-encodes it
pub fn xoauth2_payload(user: &str, access_token: &str) -> String {
    format!("user={user}\x01auth=Bearer {access_token}\x01\x01")
}

/// Connect to IMAP server and authenticate with XOAUTH2
///
/// Performs full connection sequence with timeouts:
/// 1. TCP connect
/// 2. TLS handshake with bundled web PKI roots
/// 3. Read IMAP greeting
/// 4. `AUTHENTICATE XOAUTH2`
///
/// # Errors
///
/// - `Connection` for TCP, TLS, greeting failures and timeouts
/// - `Authentication` if the server rejects the bearer token
pub async fn connect_authenticated(
    config: &MailboxConfig,
    access_token: &str,
) -> AppResult<ImapSession> {
    let timeouts = config.timeouts;

    let tcp = timeout(
        timeouts.connect,
        TcpStream::connect((config.host.as_str(), config.port)),
    )
    .await
    .map_err(|_| AppError::Connection("tcp connect timeout".to_owned()))
    .and_then(|r| r.map_err(|e| AppError::Connection(format!("tcp connect failed: {e}"))))?;

    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls_config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(tls_config));

    let server_name = ServerName::try_from(config.host.clone())
        .map_err(|_| AppError::Connection("invalid IMAP host for TLS SNI".to_owned()))?;
    let tls_stream = timeout(timeouts.greeting, connector.connect(server_name, tcp))
        .await
        .map_err(|_| AppError::Connection("TLS handshake timeout".to_owned()))
        .and_then(|r| r.map_err(|e| AppError::Connection(format!("TLS handshake failed: {e}"))))?;

    let mut client = Client::new(tls_stream);
    let greeting = timeout(timeouts.greeting, client.read_response())
        .await
        .map_err(|_| AppError::Connection("IMAP greeting timeout".to_owned()))
        .and_then(|r| {
            r.map_err(|e| AppError::Connection(format!("IMAP greeting failed: {e}")))
        })?;

    if greeting.is_none() {
        return Err(AppError::Connection(
            "IMAP server closed connection before greeting".to_owned(),
        ));
    }

    let authenticator = XOAuth2 {
        user: config.mail_address.clone(),
        access_token: access_token.to_owned(),
        sent: false,
    };
    let session = timeout(
        timeouts.greeting,
        client.authenticate("XOAUTH2", authenticator),
    )
    .await
    .map_err(|_| AppError::Connection("IMAP authenticate timeout".to_owned()))
    .and_then(|r| {
        r.map_err(|(e, _)| match e {
            async_imap::error::Error::No(msg) | async_imap::error::Error::Bad(msg) => {
                AppError::Authentication(msg)
            }
            other => AppError::Connection(format!("IMAP authenticate failed: {other}")),
        })
    })?;

    debug!(host = %config.host, user = %config.mail_address, "IMAP session authenticated");
    Ok(session)
}

/// Send NOOP to test connection liveness
///
/// Used before reusing a session so a server-side close is detected without
/// surfacing a stale-connection error.
pub async fn noop(timeouts: &Timeouts, session: &mut ImapSession) -> AppResult<()> {
    timeout(timeouts.socket, session.noop())
        .await
        .map_err(|_| AppError::Connection("NOOP timed out".to_owned()))
        .and_then(|r| r.map_err(|e| AppError::Connection(format!("NOOP failed: {e}"))))
}

/// List direct children matching `pattern` under `reference`
pub async fn list_mailboxes(
    timeouts: &Timeouts,
    session: &mut ImapSession,
    reference: Option<&str>,
    pattern: &str,
) -> AppResult<Vec<Name>> {
    let stream = timeout(timeouts.socket, session.list(reference, Some(pattern)))
        .await
        .map_err(|_| AppError::Connection("LIST timed out".to_owned()))
        .and_then(|r| r.map_err(|e| AppError::Connection(format!("LIST failed: {e}"))))?;

    timeout(timeouts.socket, stream.try_collect::<Vec<_>>())
        .await
        .map_err(|_| AppError::Connection("LIST stream timed out".to_owned()))
        .and_then(|r| r.map_err(|e| AppError::Connection(format!("LIST stream failed: {e}"))))
}

/// Select mailbox in read-write mode
///
/// `mailbox` is the wire (modified UTF-7) name. A `NO` response maps to
/// `NotFound`; transport failures map to `Connection`.
pub async fn select_mailbox_readwrite(
    timeouts: &Timeouts,
    session: &mut ImapSession,
    mailbox: &str,
) -> AppResult<()> {
    let selected = timeout(timeouts.socket, session.select(mailbox))
        .await
        .map_err(|_| AppError::Connection(format!("SELECT timed out for mailbox '{mailbox}'")))
        .and_then(|r| {
            r.map_err(|e| match e {
                async_imap::error::Error::No(msg) | async_imap::error::Error::Bad(msg) => {
                    AppError::NotFound(format!("cannot select mailbox '{mailbox}': {msg}"))
                }
                other => AppError::Connection(format!("SELECT failed: {other}")),
            })
        })?;
    debug!(mailbox, exists = selected.exists, "mailbox selected");
    Ok(())
}

/// Fetch messages for a UID set in one command
///
/// Messages missing from the mailbox are simply absent from the result.
pub async fn uid_fetch(
    timeouts: &Timeouts,
    session: &mut ImapSession,
    uids: &[u32],
    query: &str,
) -> AppResult<Vec<Fetch>> {
    if uids.is_empty() {
        return Ok(Vec::new());
    }
    let set = uid_set(uids);
    let stream = timeout(timeouts.socket, session.uid_fetch(set, query))
        .await
        .map_err(|_| AppError::Connection("UID FETCH timed out".to_owned()))
        .and_then(|r| r.map_err(|e| AppError::Connection(format!("uid fetch failed: {e}"))))?;

    timeout(timeouts.socket, stream.try_collect())
        .await
        .map_err(|_| AppError::Connection("UID FETCH stream timed out".to_owned()))
        .and_then(|r| r.map_err(|e| AppError::Connection(format!("uid fetch stream failed: {e}"))))
}

/// Fetch a single message with custom query
///
/// # Errors
///
/// - `NotFound` if UID does not exist in mailbox
/// - `Connection` for network/protocol errors
pub async fn fetch_one(
    timeouts: &Timeouts,
    session: &mut ImapSession,
    uid: u32,
    query: &str,
) -> AppResult<Fetch> {
    uid_fetch(timeouts, session, &[uid], query)
        .await?
        .into_iter()
        .find(|f| f.uid == Some(uid))
        .ok_or_else(|| AppError::NotFound(format!("message uid {uid} not found")))
}

/// Search for messages matching query
///
/// Runs `UID SEARCH` and returns matching UIDs in ascending order. A `NO` or
/// `BAD` reply is an argument problem and leaves the session usable.
pub async fn uid_search(
    timeouts: &Timeouts,
    session: &mut ImapSession,
    query: &str,
) -> AppResult<Vec<u32>> {
    let set = timeout(timeouts.socket, session.uid_search(query))
        .await
        .map_err(|_| AppError::Connection("UID SEARCH timed out".to_owned()))
        .and_then(|r| {
            r.map_err(|e| match e {
                async_imap::error::Error::No(msg) | async_imap::error::Error::Bad(msg) => {
                    AppError::InvalidInput(format!("server rejected search: {msg}"))
                }
                other => AppError::Connection(format!("uid search failed: {other}")),
            })
        })?;
    let mut uids: Vec<u32> = set.into_iter().collect();
    uids.sort_unstable();
    Ok(uids)
}

/// Log out politely; errors are irrelevant since the session is discarded
pub async fn logout(timeouts: &Timeouts, session: &mut ImapSession) {
    if let Ok(Err(e)) = timeout(timeouts.greeting, session.logout()).await {
        debug!(error = %e, "LOGOUT failed");
    }
}

/// Convert fetch flags to IMAP spelling (`\Seen`, keyword text, ...)
pub fn flags_to_strings(fetch: &Fetch) -> Vec<String> {
    fetch.flags().map(|flag| flag_to_string(&flag)).collect()
}

fn flag_to_string(flag: &Flag<'_>) -> String {
    match flag {
        Flag::Seen => "\\Seen".to_owned(),
        Flag::Answered => "\\Answered".to_owned(),
        Flag::Flagged => "\\Flagged".to_owned(),
        Flag::Deleted => "\\Deleted".to_owned(),
        Flag::Draft => "\\Draft".to_owned(),
        Flag::Recent => "\\Recent".to_owned(),
        Flag::MayCreate => "\\*".to_owned(),
        Flag::Custom(name) => name.to_string(),
        #[allow(unreachable_patterns)]
        other => format!("\\{other:?}"),
    }
}

/// Render UIDs as a comma-separated IMAP sequence set
fn uid_set(uids: &[u32]) -> String {
    uids.iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::{Authenticator, XOAuth2, uid_set, xoauth2_payload};

    #[test]
    fn xoauth2_payload_matches_wire_format() {
        assert_eq!(
            xoauth2_payload("user@example.com", "tok"),
            "user=user@example.com\x01auth=Bearer tok\x01\x01"
        );
    }

    #[test]
    fn xoauth2_answers_error_challenge_with_empty_response() {
        let mut auth = XOAuth2 {
            user: "user@example.com".to_owned(),
            access_token: "tok".to_owned(),
            sent: false,
        };
        assert!(auth.process(b"").starts_with("user=user@example.com"));
        assert_eq!(auth.process(br#"{"status":"400"}"#), "");
    }

    #[test]
    fn uid_set_is_comma_separated() {
        assert_eq!(uid_set(&[9, 3, 12]), "9,3,12");
        assert_eq!(uid_set(&[7]), "7");
    }
}
