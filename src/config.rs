//! Configuration for the OAuth client, mailbox, and calendar endpoints
//!
//! All configuration is loaded from environment variables prefixed with
//! `MAILCAL_`. The resulting structs are immutable and handed to each
//! component at construction time.

use std::env;
use std::env::VarError;
use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use url::Url;

use crate::errors::{AppError, AppResult};

const DEFAULT_OAUTH_BASE_URL: &str = "https://api.login.yahoo.com/";
const DEFAULT_IMAP_HOST: &str = "imap.mail.yahoo.com";
const DEFAULT_CALDAV_URL: &str = "https://caldav.calendar.yahoo.com/";
const DEFAULT_TOKEN_DIR_NAME: &str = ".mailcal-mcp";

/// OAuth2 client registration and provider endpoints
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    /// Registered client identifier
    pub client_id: String,
    /// Client secret stored in a type that prevents accidental logging
    pub client_secret: SecretString,
    /// Redirect URI registered with the provider
    pub redirect_uri: String,
    /// Provider base URL; `oauth2/request_auth` and `oauth2/get_token` are
    /// resolved against it
    pub base_url: Url,
    /// Directory holding `tokens.json`
    pub token_dir: PathBuf,
}

/// Mailbox connection settings
///
/// Immutable per [`MailboxClient`](crate::mailbox::MailboxClient) instance.
#[derive(Debug, Clone)]
pub struct MailboxConfig {
    /// IMAP server hostname
    pub host: String,
    /// IMAP server port (993 for implicit TLS)
    pub port: u16,
    /// Account mail address, used as the XOAUTH2 user
    pub mail_address: String,
    /// Network timeouts applied to every IMAP step
    pub timeouts: Timeouts,
}

/// Calendar endpoint settings
#[derive(Debug, Clone)]
pub struct CalendarConfig {
    /// Base collection URL used for principal discovery
    pub base_url: Url,
}

/// Network timeouts for the mailbox transport
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    /// TCP connect timeout
    pub connect: Duration,
    /// TLS handshake, greeting, and authentication timeout
    pub greeting: Duration,
    /// Per-command socket I/O timeout
    pub socket: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_millis(30_000),
            greeting: Duration::from_millis(15_000),
            socket: Duration::from_millis(300_000),
        }
    }
}

/// Server-wide configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// OAuth client and credential storage
    pub oauth: OAuthConfig,
    /// Mailbox endpoint
    pub mailbox: MailboxConfig,
    /// Calendar endpoint
    pub calendar: CalendarConfig,
}

impl ServerConfig {
    /// Load all configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if required environment variables are missing
    /// or malformed.
    ///
    /// # Example Environment
    ///
    /// ```text
    /// MAILCAL_CLIENT_ID=dj0yJmk9...
    /// MAILCAL_CLIENT_SECRET=secret
    /// MAILCAL_REDIRECT_URI=https://localhost/callback
    /// MAILCAL_EMAIL=user@yahoo.com
    /// MAILCAL_TOKEN_DIR=/var/lib/mailcal
    /// ```
    pub fn load_from_env() -> AppResult<Self> {
        let token_dir = match optional_env("MAILCAL_TOKEN_DIR")? {
            Some(dir) => PathBuf::from(dir),
            None => default_token_dir()?,
        };

        let oauth = OAuthConfig {
            client_id: required_env("MAILCAL_CLIENT_ID")?,
            client_secret: SecretString::new(required_env("MAILCAL_CLIENT_SECRET")?.into()),
            redirect_uri: required_env("MAILCAL_REDIRECT_URI")?,
            base_url: parse_url_env("MAILCAL_OAUTH_BASE_URL", DEFAULT_OAUTH_BASE_URL)?,
            token_dir,
        };

        let timeouts = Timeouts {
            connect: Duration::from_millis(parse_u64_env("MAILCAL_CONNECT_TIMEOUT_MS", 30_000)?),
            greeting: Duration::from_millis(parse_u64_env("MAILCAL_GREETING_TIMEOUT_MS", 15_000)?),
            socket: Duration::from_millis(parse_u64_env("MAILCAL_SOCKET_TIMEOUT_MS", 300_000)?),
        };

        let mailbox = MailboxConfig {
            host: optional_env("MAILCAL_IMAP_HOST")?.unwrap_or_else(|| DEFAULT_IMAP_HOST.to_owned()),
            port: parse_u16_env("MAILCAL_IMAP_PORT", 993)?,
            mail_address: required_env("MAILCAL_EMAIL")?,
            timeouts,
        };

        let calendar = CalendarConfig {
            base_url: parse_url_env("MAILCAL_CALDAV_URL", DEFAULT_CALDAV_URL)?,
        };

        Ok(Self {
            oauth,
            mailbox,
            calendar,
        })
    }
}

/// Per-user hidden directory used when `MAILCAL_TOKEN_DIR` is unset
fn default_token_dir() -> AppResult<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(DEFAULT_TOKEN_DIR_NAME))
        .ok_or_else(|| {
            AppError::InvalidInput(
                "cannot determine home directory; set MAILCAL_TOKEN_DIR".to_owned(),
            )
        })
}

/// Read a required environment variable, returning error if missing or empty
fn required_env(key: &str) -> AppResult<String> {
    match env::var(key) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(AppError::InvalidInput(format!(
            "missing required environment variable {key}"
        ))),
    }
}

/// Read an optional environment variable; empty values count as unset
fn optional_env(key: &str) -> AppResult<Option<String>> {
    match env::var(key) {
        Ok(v) if v.trim().is_empty() => Ok(None),
        Ok(v) => Ok(Some(v)),
        Err(VarError::NotPresent) => Ok(None),
        Err(VarError::NotUnicode(_)) => Err(AppError::InvalidInput(format!(
            "environment variable {key} contains non-unicode data"
        ))),
    }
}

/// Parse a URL environment variable with default fallback
///
/// A trailing slash is enforced so relative endpoint paths join beneath the
/// configured path instead of replacing its last segment.
fn parse_url_env(key: &str, default: &str) -> AppResult<Url> {
    let raw = optional_env(key)?.unwrap_or_else(|| default.to_owned());
    parse_base_url(&raw)
        .map_err(|e| AppError::InvalidInput(format!("invalid URL environment variable {key}: {e}")))
}

fn parse_base_url(raw: &str) -> Result<Url, url::ParseError> {
    let trimmed = raw.trim();
    if trimmed.ends_with('/') {
        Url::parse(trimmed)
    } else {
        Url::parse(&format!("{trimmed}/"))
    }
}

/// Parse a `u16` environment variable with default fallback
///
/// # Errors
///
/// Returns `InvalidInput` if the variable is set but not a valid `u16`.
fn parse_u16_env(key: &str, default: u16) -> AppResult<u16> {
    match optional_env(key)? {
        Some(v) => v.trim().parse::<u16>().map_err(|_| {
            AppError::InvalidInput(format!("invalid u16 environment variable {key}: '{v}'"))
        }),
        None => Ok(default),
    }
}

/// Parse a `u64` environment variable with default fallback
///
/// # Errors
///
/// Returns `InvalidInput` if the variable is set but not a valid `u64`.
fn parse_u64_env(key: &str, default: u64) -> AppResult<u64> {
    match optional_env(key)? {
        Some(v) => v.trim().parse::<u64>().map_err(|_| {
            AppError::InvalidInput(format!("invalid u64 environment variable {key}: '{v}'"))
        }),
        None => Ok(default),
    }
}
