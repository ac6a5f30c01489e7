//! Stateful mailbox client
//!
//! [`MailboxClient`] owns one IMAP connection that is opened lazily on the
//! first operation and reused afterwards. Calls are serialized by the state
//! mutex. The session is moved out of the state while a command runs and only
//! put back once the command completes, so a cancelled call drops the
//! connection and the next call reconnects.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_imap::types::{Fetch, Name};
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::batch::Batch;
use crate::config::{MailboxConfig, Timeouts};
use crate::errors::{AppError, AppResult};
use crate::imap::{self, FULL_MESSAGE_QUERY, ImapSession};
use crate::mime;
use crate::models::{AttachmentContent, MessageRecord};
use crate::oauth::CredentialManager;
use crate::pagination::{latest, newest_first_page};

/// Connection state
enum SessionState {
    Disconnected,
    Connected(ImapSession),
    Selected {
        session: ImapSession,
        folder: String,
    },
}

/// Search filters; all present filters must match
#[derive(Debug, Clone, Default)]
pub struct SearchCriteria {
    /// Matched against subject or body
    pub query: Option<String>,
    /// Sender filter
    pub from: Option<String>,
    /// Subject filter
    pub subject: Option<String>,
    /// Messages on or after this date
    pub start: Option<NaiveDate>,
    /// Messages before this date
    pub end: Option<NaiveDate>,
}

/// Mailbox client for one account
pub struct MailboxClient {
    config: MailboxConfig,
    credentials: Arc<CredentialManager>,
    state: Mutex<SessionState>,
}

impl MailboxClient {
    /// Create a disconnected client
    pub fn new(config: MailboxConfig, credentials: Arc<CredentialManager>) -> Self {
        Self {
            config,
            credentials,
            state: Mutex::new(SessionState::Disconnected),
        }
    }

    /// Ensure an authenticated connection exists
    ///
    /// # Errors
    ///
    /// - credential errors from [`CredentialManager::get_valid_access_token`]
    /// - `Connection` on transport failure
    /// - `Authentication` if the server rejects the token
    pub async fn connect(&self) -> AppResult<()> {
        let mut state = self.state.lock().await;
        let (session, selected) = self.checkout(&mut state, None).await?;
        Self::checkin(&mut state, session, selected, &Ok(()));
        Ok(())
    }

    /// Close the connection if open; calling it again is a no-op
    pub async fn disconnect(&self) {
        let mut state = self.state.lock().await;
        match std::mem::replace(&mut *state, SessionState::Disconnected) {
            SessionState::Disconnected => {}
            SessionState::Connected(mut session) | SessionState::Selected { mut session, .. } => {
                imap::logout(&self.config.timeouts, &mut session).await;
                info!(host = %self.config.host, "mailbox disconnected");
            }
        }
    }

    /// Newest-first page of messages in `folder`
    ///
    /// Messages that fail to parse are left out.
    pub async fn list_messages(
        &self,
        folder: &str,
        limit: usize,
        offset: usize,
        since: Option<NaiveDate>,
        unread_only: bool,
    ) -> AppResult<Vec<MessageRecord>> {
        self.list_messages_detailed(folder, limit, offset, since, unread_only)
            .await
            .map(Batch::into_items)
    }

    /// Like [`Self::list_messages`], reporting messages that were skipped
    pub async fn list_messages_detailed(
        &self,
        folder: &str,
        limit: usize,
        offset: usize,
        since: Option<NaiveDate>,
        unread_only: bool,
    ) -> AppResult<Batch<MessageRecord>> {
        validate_folder(folder)?;
        let query = list_query(since, unread_only);
        let timeouts = self.config.timeouts;

        let mut state = self.state.lock().await;
        let (mut session, selected) = self.checkout(&mut state, Some(folder)).await?;
        let result = async {
            let uids = imap::uid_search(&timeouts, &mut session, &query).await?;
            let page = newest_first_page(&uids, limit, offset);
            debug!(folder, total = uids.len(), page = page.len(), "listing messages");
            fetch_records(&timeouts, &mut session, folder, &page).await
        }
        .await;
        Self::checkin(&mut state, session, selected, &result);
        result
    }

    /// Fetch exactly one message by id
    ///
    /// # Errors
    ///
    /// - `NotFound` if no message with this id exists in `folder`
    pub async fn get_message(&self, id: &str, folder: &str) -> AppResult<MessageRecord> {
        validate_folder(folder)?;
        let uid = parse_message_id(id)?;
        let timeouts = self.config.timeouts;

        let mut state = self.state.lock().await;
        let (mut session, selected) = self.checkout(&mut state, Some(folder)).await?;
        let result = async {
            let fetch = imap::fetch_one(&timeouts, &mut session, uid, FULL_MESSAGE_QUERY).await?;
            build_record(&FetchedMessage::from_fetch(&fetch), folder)
        }
        .await;
        Self::checkin(&mut state, session, selected, &result);
        result
    }

    /// Fetch the `index`-th attachment of a message with its content
    ///
    /// # Errors
    ///
    /// - `NotFound` if the message or the attachment index does not exist
    pub async fn get_attachment(
        &self,
        id: &str,
        folder: &str,
        index: usize,
    ) -> AppResult<AttachmentContent> {
        validate_folder(folder)?;
        let uid = parse_message_id(id)?;
        let timeouts = self.config.timeouts;

        let mut state = self.state.lock().await;
        let (mut session, selected) = self.checkout(&mut state, Some(folder)).await?;
        let result = async {
            let fetch = imap::fetch_one(&timeouts, &mut session, uid, FULL_MESSAGE_QUERY).await?;
            let raw = fetch
                .body()
                .ok_or_else(|| AppError::NotFound(format!("message uid {uid} has no body")))?;
            mime::extract_attachment(raw, index)
        }
        .await;
        Self::checkin(&mut state, session, selected, &result);
        result
    }

    /// Newest `limit` messages matching `criteria`, newest first
    pub async fn search_messages(
        &self,
        criteria: &SearchCriteria,
        folder: &str,
        limit: usize,
    ) -> AppResult<Vec<MessageRecord>> {
        self.search_messages_detailed(criteria, folder, limit)
            .await
            .map(Batch::into_items)
    }

    /// Like [`Self::search_messages`], reporting messages that were skipped
    pub async fn search_messages_detailed(
        &self,
        criteria: &SearchCriteria,
        folder: &str,
        limit: usize,
    ) -> AppResult<Batch<MessageRecord>> {
        validate_folder(folder)?;
        let query = search_query(criteria)?;
        let timeouts = self.config.timeouts;

        let mut state = self.state.lock().await;
        let (mut session, selected) = self.checkout(&mut state, Some(folder)).await?;
        let result = async {
            let uids = imap::uid_search(&timeouts, &mut session, &query).await?;
            let page = latest(&uids, limit);
            debug!(folder, matched = uids.len(), page = page.len(), "search complete");
            fetch_records(&timeouts, &mut session, folder, &page).await
        }
        .await;
        Self::checkin(&mut state, session, selected, &result);
        result
    }

    /// All folder names, nested ones as `parent<delimiter>child`
    pub async fn list_folders(&self) -> AppResult<Vec<String>> {
        let timeouts = self.config.timeouts;

        let mut state = self.state.lock().await;
        let (mut session, selected) = self.checkout(&mut state, None).await?;
        let result = walk_folders(&timeouts, &mut session).await;
        Self::checkin(&mut state, session, selected, &result);
        result
    }

    /// Take the session out of `state`, connecting or selecting as needed
    ///
    /// `state` is left `Disconnected` on return. A failed `SELECT` that is not
    /// connection-level puts the authenticated session back before returning
    /// the error.
    async fn checkout(
        &self,
        state: &mut SessionState,
        folder: Option<&str>,
    ) -> AppResult<(ImapSession, Option<String>)> {
        let timeouts = self.config.timeouts;
        let (mut session, mut selected) =
            match std::mem::replace(state, SessionState::Disconnected) {
                SessionState::Disconnected => (self.open().await?, None),
                SessionState::Connected(session) => match self.probe(session).await {
                    Some(live) => (live, None),
                    None => (self.open().await?, None),
                },
                SessionState::Selected { session, folder } => match self.probe(session).await {
                    Some(live) => (live, Some(folder)),
                    None => (self.open().await?, None),
                },
            };

        if let Some(folder) = folder
            && selected.as_deref() != Some(folder)
        {
            let wire = utf7_imap::encode_utf7_imap(folder.to_owned());
            if let Err(e) = imap::select_mailbox_readwrite(&timeouts, &mut session, &wire).await {
                if !e.is_connection_level() {
                    *state = SessionState::Connected(session);
                }
                return Err(e);
            }
            selected = Some(folder.to_owned());
        }
        Ok((session, selected))
    }

    /// Return the session to `state` unless `result` is a connection-level error
    fn checkin<T>(
        state: &mut SessionState,
        session: ImapSession,
        selected: Option<String>,
        result: &AppResult<T>,
    ) {
        if let Err(e) = result
            && e.is_connection_level()
        {
            warn!(error = %e, "dropping mailbox session");
            return;
        }
        *state = match selected {
            Some(folder) => SessionState::Selected { session, folder },
            None => SessionState::Connected(session),
        };
    }

    /// NOOP the session; `None` if it no longer responds
    async fn probe(&self, mut session: ImapSession) -> Option<ImapSession> {
        match imap::noop(&self.config.timeouts, &mut session).await {
            Ok(()) => Some(session),
            Err(e) => {
                warn!(error = %e, "stale mailbox session, reconnecting");
                None
            }
        }
    }

    async fn open(&self) -> AppResult<ImapSession> {
        let token = self.credentials.get_valid_access_token().await?;
        let session = imap::connect_authenticated(&self.config, &token).await?;
        info!(host = %self.config.host, port = self.config.port, "mailbox connected");
        Ok(session)
    }
}

/// Fetch `uids` in one command and parse them in the given order
async fn fetch_records(
    timeouts: &Timeouts,
    session: &mut ImapSession,
    folder: &str,
    uids: &[u32],
) -> AppResult<Batch<MessageRecord>> {
    let fetches = imap::uid_fetch(timeouts, session, uids, FULL_MESSAGE_QUERY).await?;
    let by_uid = fetches
        .iter()
        .map(FetchedMessage::from_fetch)
        .filter_map(|m| m.uid.map(|uid| (uid, m)))
        .collect();
    Ok(assemble_page(uids, by_uid, folder))
}

/// The parts of a FETCH response a record is built from
#[derive(Debug, Clone)]
struct FetchedMessage<'a> {
    uid: Option<u32>,
    sequence_id: u32,
    raw: Option<&'a [u8]>,
    internal_date: Option<DateTime<Utc>>,
    flags: Vec<String>,
}

impl<'a> FetchedMessage<'a> {
    fn from_fetch(fetch: &'a Fetch) -> Self {
        Self {
            uid: fetch.uid,
            sequence_id: fetch.message,
            raw: fetch.body(),
            internal_date: fetch.internal_date().map(|d| d.with_timezone(&Utc)),
            flags: imap::flags_to_strings(fetch),
        }
    }
}

/// Emit records in `uids` order; absent or unparseable messages are skipped
fn assemble_page(
    uids: &[u32],
    mut by_uid: HashMap<u32, FetchedMessage<'_>>,
    folder: &str,
) -> Batch<MessageRecord> {
    let mut batch = Batch::default();
    for uid in uids {
        let Some(message) = by_uid.remove(uid) else {
            batch.skip(format!("uid {uid}"), "message disappeared before fetch");
            continue;
        };
        match build_record(&message, folder) {
            Ok(record) => batch.push(record),
            Err(e) => batch.skip(format!("uid {uid}"), e.to_string()),
        }
    }
    batch
}

/// Convert a fetched message into a [`MessageRecord`]
///
/// The timestamp is the `Date` header, else the server INTERNALDATE.
fn build_record(message: &FetchedMessage<'_>, folder: &str) -> AppResult<MessageRecord> {
    let uid = message
        .uid
        .ok_or_else(|| AppError::Internal("FETCH response carried no UID".to_owned()))?;
    let raw = message
        .raw
        .ok_or_else(|| AppError::Internal(format!("uid {uid}: FETCH response carried no body")))?;
    let parsed = mime::parse_message(raw)?;

    let timestamp = parsed
        .date
        .or(message.internal_date)
        .ok_or_else(|| AppError::Internal(format!("uid {uid}: no usable date")))?;

    Ok(MessageRecord {
        id: uid.to_string(),
        sequence_id: message.sequence_id,
        canonical_message_id: parsed.message_id,
        subject: parsed.subject.unwrap_or_default(),
        from: parsed.from,
        to: parsed.to,
        cc: parsed.cc,
        bcc: parsed.bcc,
        timestamp,
        plain_body: parsed.body_text,
        html_body: parsed.body_html_sanitized,
        attachments: parsed.attachments,
        flags: message.flags.iter().cloned().collect(),
        folder: folder.to_owned(),
    })
}

/// Walk the folder hierarchy one level at a time with `%`
async fn walk_folders(
    timeouts: &Timeouts,
    session: &mut ImapSession,
) -> AppResult<Vec<String>> {
    let mut walk = FolderWalk::default();
    while let Some(pattern) = walk.next_pattern() {
        let names = imap::list_mailboxes(timeouts, session, None, &pattern).await?;
        walk.record(names.iter().map(ListedFolder::from_name));
    }
    let folders = walk.finish();
    debug!(count = folders.len(), "folders listed");
    Ok(folders)
}

/// One `LIST` response entry
#[derive(Debug, Clone, PartialEq, Eq)]
struct ListedFolder {
    /// Modified UTF-7 name as sent by the server
    wire: String,
    delimiter: Option<String>,
    may_have_children: bool,
}

impl ListedFolder {
    fn from_name(name: &Name) -> Self {
        let may_have_children = !name.attributes().iter().any(|attr| {
            let attr = format!("{attr:?}");
            attr.contains("NoInferiors") || attr.contains("HasNoChildren")
        });
        Self {
            wire: name.name().to_owned(),
            delimiter: name.delimiter().map(str::to_owned),
            may_have_children,
        }
    }
}

/// Breadth-first traversal state for [`walk_folders`]
#[derive(Debug)]
struct FolderWalk {
    folders: Vec<String>,
    seen: HashSet<String>,
    pending: VecDeque<String>,
}

impl Default for FolderWalk {
    fn default() -> Self {
        Self {
            folders: Vec::new(),
            seen: HashSet::new(),
            pending: VecDeque::from(["%".to_owned()]),
        }
    }
}

impl FolderWalk {
    fn next_pattern(&mut self) -> Option<String> {
        self.pending.pop_front()
    }

    fn record(&mut self, listed: impl IntoIterator<Item = ListedFolder>) {
        for folder in listed {
            if !self.seen.insert(folder.wire.clone()) {
                continue;
            }
            if let Some(delimiter) = &folder.delimiter
                && folder.may_have_children
            {
                self.pending
                    .push_back(child_pattern(&folder.wire, delimiter));
            }
            self.folders.push(utf7_imap::decode_utf7_imap(folder.wire));
        }
    }

    fn finish(self) -> Vec<String> {
        self.folders
    }
}

/// Quoted LIST pattern for the direct children of `wire_name`
fn child_pattern(wire_name: &str, delimiter: &str) -> String {
    let pattern = format!("{wire_name}{delimiter}%");
    format!("\"{}\"", pattern.replace('\\', "\\\\").replace('"', "\\\""))
}

/// `UNSEEN` and/or `SINCE`, else `ALL`
fn list_query(since: Option<NaiveDate>, unread_only: bool) -> String {
    let mut parts = Vec::new();
    if unread_only {
        parts.push("UNSEEN".to_owned());
    }
    if let Some(since) = since {
        parts.push(format!("SINCE {}", imap_date(since)));
    }
    if parts.is_empty() {
        "ALL".to_owned()
    } else {
        parts.join(" ")
    }
}

/// Build IMAP SEARCH query string from criteria
fn search_query(criteria: &SearchCriteria) -> AppResult<String> {
    let mut parts = Vec::new();
    if let Some(v) = &criteria.query {
        let quoted = escape_imap_quoted(v)?;
        parts.push(format!("OR SUBJECT \"{quoted}\" BODY \"{quoted}\""));
    }
    if let Some(v) = &criteria.from {
        parts.push(format!("FROM \"{}\"", escape_imap_quoted(v)?));
    }
    if let Some(v) = &criteria.subject {
        parts.push(format!("SUBJECT \"{}\"", escape_imap_quoted(v)?));
    }
    if let Some(start) = criteria.start {
        parts.push(format!("SINCE {}", imap_date(start)));
    }
    if let Some(end) = criteria.end {
        parts.push(format!("BEFORE {}", imap_date(end)));
    }

    if parts.is_empty() {
        Ok("ALL".to_owned())
    } else {
        Ok(parts.join(" "))
    }
}

/// Message ids are folder-scoped UIDs
fn parse_message_id(id: &str) -> AppResult<u32> {
    match id.trim().parse::<u32>() {
        Ok(uid) if uid > 0 => Ok(uid),
        _ => Err(AppError::NotFound(format!("no message with id '{id}'"))),
    }
}

/// Validate folder name format
fn validate_folder(folder: &str) -> AppResult<()> {
    if folder.is_empty() || folder.len() > 256 {
        return Err(AppError::invalid("folder must be 1..256 characters"));
    }
    validate_no_controls(folder, "folder")
}

/// Reject IMAP control characters in user-provided values
fn validate_no_controls(value: &str, field: &str) -> AppResult<()> {
    if value.chars().any(|ch| ch.is_ascii_control()) {
        return Err(AppError::InvalidInput(format!(
            "{field} must not contain control characters"
        )));
    }
    Ok(())
}

/// Validate search text field bounds and characters
///
/// Quoted strings are 7-bit, so non-ASCII text is rejected rather than sent.
fn validate_search_text(input: &str) -> AppResult<()> {
    if input.is_empty() || input.len() > 256 {
        return Err(AppError::invalid("search text fields must be 1..256 chars"));
    }
    if !input.is_ascii() {
        return Err(AppError::invalid("search text must be ASCII"));
    }
    validate_no_controls(input, "search text")
}

/// Escape backslashes and quotes for IMAP quoted strings
fn escape_imap_quoted(input: &str) -> AppResult<String> {
    validate_search_text(input)?;
    Ok(input.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Format date as IMAP SEARCH date (e.g., "1-Jan-2025")
fn imap_date(date: NaiveDate) -> String {
    date.format("%-d-%b-%Y").to_string()
}
