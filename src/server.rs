//! MCP server implementation with tool handlers
//!
//! Implements the `ServerHandler` trait and registers the authorization, mail
//! and calendar tools. Handles argument validation, delegates to the
//! credential manager and protocol clients, and formats responses.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, NaiveDate, Utc};
use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{ErrorData, ServerCapabilities, ServerInfo};
use rmcp::{Json, ServerHandler, tool, tool_handler, tool_router};
use serde::Serialize;

use crate::caldav::CalendarClient;
use crate::errors::{AppError, AppResult};
use crate::mailbox::{MailboxClient, SearchCriteria};
use crate::models::{
    AuthUrlInput, ExchangeCodeInput, FetchEventsInput, GetAttachmentInput, GetMessageInput,
    ListMessagesInput, Meta, SearchMessagesInput, ToolEnvelope,
};
use crate::oauth::CredentialManager;

/// Maximum messages per list or search call
const MAX_PAGE_LIMIT: usize = 100;

/// Mail and calendar MCP server
///
/// Holds the shared credential manager and protocol clients. Implements MCP
/// tool handlers via `#[tool]` attribute macro and `ServerHandler` trait.
#[derive(Clone)]
pub struct MailCalServer {
    credentials: Arc<CredentialManager>,
    mailbox: Arc<MailboxClient>,
    calendar: Arc<CalendarClient>,
    /// Tool router for dispatching MCP tool calls
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl MailCalServer {
    /// Create a new MCP server instance around already constructed clients
    pub fn new(
        credentials: Arc<CredentialManager>,
        mailbox: Arc<MailboxClient>,
        calendar: Arc<CalendarClient>,
    ) -> Self {
        Self {
            credentials,
            mailbox,
            calendar,
            tool_router: Self::tool_router(),
        }
    }

    /// Tool: Build the provider authorization URL
    #[tool(
        name = "auth_get_url",
        description = "Get the OAuth2 authorization URL to open in a browser"
    )]
    async fn auth_get_url(
        &self,
        Parameters(input): Parameters<AuthUrlInput>,
    ) -> Result<Json<ToolEnvelope<serde_json::Value>>, ErrorData> {
        let started = Instant::now();
        let result = self
            .credentials
            .authorization_url(input.state.as_deref())
            .map(|url| {
                (
                    "Open the URL and pass the returned code to auth_exchange_code".to_owned(),
                    serde_json::json!({ "url": url.as_str() }),
                )
            });
        finalize_tool(started, result)
    }

    /// Tool: Exchange an authorization code for tokens
    ///
    /// Tokens are persisted and never echoed back; the response carries the
    /// credential status only.
    #[tool(
        name = "auth_exchange_code",
        description = "Exchange an authorization code for tokens"
    )]
    async fn auth_exchange_code(
        &self,
        Parameters(input): Parameters<ExchangeCodeInput>,
    ) -> Result<Json<ToolEnvelope<serde_json::Value>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(started, self.exchange_code_impl(input).await)
    }

    /// Tool: Report whether usable credentials exist
    #[tool(name = "auth_status", description = "Show credential status")]
    async fn auth_status(&self) -> Result<Json<ToolEnvelope<serde_json::Value>>, ErrorData> {
        let started = Instant::now();
        let result = async {
            let status = self.credentials.status().await?;
            let summary = if status.authenticated {
                "Credentials present".to_owned()
            } else {
                "Not authenticated".to_owned()
            };
            Ok::<_, AppError>((summary, to_value(&status)?))
        }
        .await;
        finalize_tool(started, result)
    }

    /// Tool: Delete stored credentials and close the mailbox session
    #[tool(
        name = "auth_clear",
        description = "Delete stored credentials and disconnect"
    )]
    async fn auth_clear(&self) -> Result<Json<ToolEnvelope<serde_json::Value>>, ErrorData> {
        let started = Instant::now();
        let result = async {
            self.credentials.clear_credentials().await?;
            self.mailbox.disconnect().await;
            Ok::<_, AppError>((
                "Credentials cleared".to_owned(),
                serde_json::json!({ "cleared": true }),
            ))
        }
        .await;
        finalize_tool(started, result)
    }

    /// Tool: Force a refresh-token exchange
    #[tool(
        name = "auth_refresh",
        description = "Refresh the access token now"
    )]
    async fn auth_refresh(&self) -> Result<Json<ToolEnvelope<serde_json::Value>>, ErrorData> {
        let started = Instant::now();
        let result = async {
            self.credentials.refresh_access_token().await?;
            let status = self.credentials.status().await?;
            Ok::<_, AppError>(("Access token refreshed".to_owned(), to_value(&status)?))
        }
        .await;
        finalize_tool(started, result)
    }

    /// Tool: Verify mailbox and calendar connectivity
    ///
    /// Connects the mailbox and discovers the calendar home; reports latency
    /// and the failure of each side separately.
    #[tool(
        name = "account_verify",
        description = "Verify mailbox and calendar connectivity"
    )]
    async fn account_verify(&self) -> Result<Json<ToolEnvelope<serde_json::Value>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(started, self.verify_impl().await)
    }

    /// Tool: List messages newest first with offset pagination
    #[tool(
        name = "mail_list_messages",
        description = "List messages in a folder, newest first"
    )]
    async fn mail_list_messages(
        &self,
        Parameters(input): Parameters<ListMessagesInput>,
    ) -> Result<Json<ToolEnvelope<serde_json::Value>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(started, self.list_messages_impl(input).await)
    }

    /// Tool: Get one parsed message
    #[tool(name = "mail_get_message", description = "Get a parsed message by id")]
    async fn mail_get_message(
        &self,
        Parameters(input): Parameters<GetMessageInput>,
    ) -> Result<Json<ToolEnvelope<serde_json::Value>>, ErrorData> {
        let started = Instant::now();
        let result = async {
            let record = self.mailbox.get_message(&input.id, &input.folder).await?;
            Ok::<_, AppError>(("Message retrieved".to_owned(), to_value(&record)?))
        }
        .await;
        finalize_tool(started, result)
    }

    /// Tool: Search messages with IMAP SEARCH criteria
    #[tool(
        name = "mail_search_messages",
        description = "Search messages by text, sender, subject and date range"
    )]
    async fn mail_search_messages(
        &self,
        Parameters(input): Parameters<SearchMessagesInput>,
    ) -> Result<Json<ToolEnvelope<serde_json::Value>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(started, self.search_messages_impl(input).await)
    }

    /// Tool: List all folders, nested ones flattened
    #[tool(name = "mail_list_folders", description = "List mail folders")]
    async fn mail_list_folders(&self) -> Result<Json<ToolEnvelope<serde_json::Value>>, ErrorData> {
        let started = Instant::now();
        let result = async {
            let folders = self.mailbox.list_folders().await?;
            Ok::<_, AppError>((
                format!("{} folder(s)", folders.len()),
                serde_json::json!({ "folders": folders }),
            ))
        }
        .await;
        finalize_tool(started, result)
    }

    /// Tool: Download one attachment as base64
    #[tool(
        name = "mail_get_attachment",
        description = "Get attachment content (base64) by message id and attachment index"
    )]
    async fn mail_get_attachment(
        &self,
        Parameters(input): Parameters<GetAttachmentInput>,
    ) -> Result<Json<ToolEnvelope<serde_json::Value>>, ErrorData> {
        let started = Instant::now();
        let result = async {
            let content = self
                .mailbox
                .get_attachment(&input.id, &input.folder, input.index)
                .await?;
            let summary = format!(
                "Attachment '{}' ({} bytes)",
                content.attachment.filename, content.attachment.size_bytes
            );
            Ok::<_, AppError>((summary, to_value(&content)?))
        }
        .await;
        finalize_tool(started, result)
    }

    /// Tool: List calendar collections
    #[tool(name = "calendar_list", description = "List calendars")]
    async fn calendar_list(&self) -> Result<Json<ToolEnvelope<serde_json::Value>>, ErrorData> {
        let started = Instant::now();
        let result = async {
            let calendars = self.calendar.list_calendars().await?;
            Ok::<_, AppError>((
                format!("{} calendar(s)", calendars.len()),
                serde_json::json!({ "calendars": calendars }),
            ))
        }
        .await;
        finalize_tool(started, result)
    }

    /// Tool: Fetch events in a date range
    #[tool(
        name = "calendar_fetch_events",
        description = "Fetch calendar events overlapping a date range"
    )]
    async fn calendar_fetch_events(
        &self,
        Parameters(input): Parameters<FetchEventsInput>,
    ) -> Result<Json<ToolEnvelope<serde_json::Value>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(started, self.fetch_events_impl(input).await)
    }
}

/// MCP server handler implementation
///
/// Provides server info and capabilities to MCP client.
#[tool_handler(router = self.tool_router)]
impl ServerHandler for MailCalServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo::new(ServerCapabilities::builder().enable_tools().build()).with_instructions(
            "Read-only mail and calendar access. Authorize first: call auth_get_url, open the URL, then pass the code to auth_exchange_code.",
        )
    }
}

/// Tool implementation methods
///
/// Private methods handle argument conversion and delegation, separated from
/// the public `#[tool]` methods that handle response formatting.
impl MailCalServer {
    async fn exchange_code_impl(
        &self,
        input: ExchangeCodeInput,
    ) -> AppResult<(String, serde_json::Value)> {
        let code = input.code.trim();
        if code.is_empty() {
            return Err(AppError::invalid("code must not be empty"));
        }
        self.credentials.exchange_code(code).await?;
        // A session opened with the previous token must not outlive it.
        self.mailbox.disconnect().await;
        let status = self.credentials.status().await?;
        Ok(("Authorization complete".to_owned(), to_value(&status)?))
    }

    async fn verify_impl(&self) -> AppResult<(String, serde_json::Value)> {
        if !self.credentials.has_credentials().await? {
            return Err(AppError::NoCredentials(
                "not authenticated; run auth_get_url and auth_exchange_code first".to_owned(),
            ));
        }

        let mailbox_started = Instant::now();
        let mailbox = self.mailbox.connect().await;
        let mailbox_ms = duration_ms(mailbox_started);

        let calendar_started = Instant::now();
        let calendar = self.calendar.initialize().await;
        let calendar_ms = duration_ms(calendar_started);

        for outcome in [&mailbox, &calendar] {
            if let Err(e) = outcome
                && e.is_credential()
            {
                return Err(e.clone());
            }
        }

        let summary = match (&mailbox, &calendar) {
            (Ok(()), Ok(())) => "Mailbox and calendar reachable".to_owned(),
            _ => "Verification found problems".to_owned(),
        };
        Ok((
            summary,
            serde_json::json!({
                "mailbox": probe_report(&mailbox, mailbox_ms),
                "calendar": probe_report(&calendar, calendar_ms),
            }),
        ))
    }

    async fn list_messages_impl(
        &self,
        input: ListMessagesInput,
    ) -> AppResult<(String, serde_json::Value)> {
        validate_limit(input.limit)?;
        let since = input.since.as_deref().map(parse_ymd).transpose()?;
        let batch = self
            .mailbox
            .list_messages_detailed(
                &input.folder,
                input.limit,
                input.offset,
                since,
                input.unread_only,
            )
            .await?;
        let summary = format!(
            "{} message(s) returned, {} skipped",
            batch.items.len(),
            batch.skipped.len()
        );
        Ok((summary, to_value(&batch)?))
    }

    async fn search_messages_impl(
        &self,
        input: SearchMessagesInput,
    ) -> AppResult<(String, serde_json::Value)> {
        validate_limit(input.limit)?;
        let criteria = SearchCriteria {
            start: input.start_date.as_deref().map(parse_ymd).transpose()?,
            end: input.end_date.as_deref().map(parse_ymd).transpose()?,
            query: input.query,
            from: input.from,
            subject: input.subject,
        };
        let batch = self
            .mailbox
            .search_messages_detailed(&criteria, &input.folder, input.limit)
            .await?;
        let summary = format!(
            "{} message(s) matched, {} skipped",
            batch.items.len(),
            batch.skipped.len()
        );
        Ok((summary, to_value(&batch)?))
    }

    async fn fetch_events_impl(
        &self,
        input: FetchEventsInput,
    ) -> AppResult<(String, serde_json::Value)> {
        let start = parse_calendar_bound(&input.start_date)?;
        let end = parse_calendar_bound(&input.end_date)?;
        let batch = self
            .calendar
            .fetch_events_detailed(input.calendar_id.as_deref(), start, end)
            .await?;
        let summary = format!(
            "{} event(s) returned, {} skipped",
            batch.items.len(),
            batch.skipped.len()
        );
        Ok((summary, to_value(&batch)?))
    }
}

/// Calculate elapsed milliseconds
fn duration_ms(started: Instant) -> u64 {
    started.elapsed().as_millis().min(u128::from(u64::MAX)) as u64
}

/// Build a standardized MCP tool response envelope from business logic output
fn finalize_tool<T>(
    started: Instant,
    result: AppResult<(String, T)>,
) -> Result<Json<ToolEnvelope<T>>, ErrorData>
where
    T: schemars::JsonSchema,
{
    match result {
        Ok((summary, data)) => Ok(Json(ToolEnvelope {
            summary,
            data,
            meta: Meta::now(duration_ms(started)),
        })),
        Err(e) => Err(e.to_error_data()),
    }
}

fn probe_report(outcome: &AppResult<()>, latency_ms: u64) -> serde_json::Value {
    serde_json::json!({
        "ok": outcome.is_ok(),
        "latency_ms": latency_ms,
        "error": outcome.as_ref().err().map(ToString::to_string),
    })
}

fn to_value<T: Serialize>(value: &T) -> AppResult<serde_json::Value> {
    serde_json::to_value(value)
        .map_err(|e| AppError::Internal(format!("serialization failure: {e}")))
}

fn validate_limit(limit: usize) -> AppResult<()> {
    if limit > MAX_PAGE_LIMIT {
        return Err(AppError::InvalidInput(format!(
            "limit must be in range 0..={MAX_PAGE_LIMIT}"
        )));
    }
    Ok(())
}

/// Parse YYYY-MM-DD date string
fn parse_ymd(input: &str) -> AppResult<NaiveDate> {
    NaiveDate::parse_from_str(input.trim(), "%Y-%m-%d")
        .map_err(|_| AppError::DateFormat(format!("invalid date '{input}', expected YYYY-MM-DD")))
}

/// Parse a calendar range bound: `YYYY-MM-DD` (UTC midnight) or RFC 3339
fn parse_calendar_bound(input: &str) -> AppResult<DateTime<Utc>> {
    let input = input.trim();
    if let Ok(date) = NaiveDate::parse_from_str(input, "%Y-%m-%d") {
        return Ok(date.and_time(chrono::NaiveTime::MIN).and_utc());
    }
    DateTime::parse_from_rfc3339(input)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| {
            AppError::DateFormat(format!(
                "invalid date '{input}', expected YYYY-MM-DD or RFC 3339"
            ))
        })
}
