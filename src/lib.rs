//! mailcal-mcp-rs: read-only mail and calendar MCP server over stdio
//!
//! Gives an MCP client read access to one account's IMAP mailbox and CalDAV
//! calendars, authorized through the provider's OAuth2 authorization-code
//! flow. Tokens are persisted locally and refreshed on demand.
//!
//! # Architecture
//!
//! - [`config`]: Environment-driven configuration
//! - [`errors`]: Application error model with MCP error mapping
//! - [`credentials`]: Credential set and its on-disk store
//! - [`oauth`]: Code exchange, refresh coalescing and token hand-out
//! - [`imap`]: IMAP transport/session operations with timeout wrappers
//! - [`mailbox`]: Stateful mailbox client with lazy reconnect
//! - [`mime`]: Message parsing, address/body extraction, and sanitization
//! - [`pagination`]: Newest-first window selection
//! - [`batch`]: Per-item outcomes for batch fetches
//! - [`caldav`]: Calendar discovery and time-ranged event queries
//! - [`dav_xml`]: WebDAV request bodies and multistatus parsing
//! - [`ical`]: iCalendar event reader
//! - [`models`]: Records and schema-bearing tool inputs
//! - [`server`]: MCP tool handlers

pub mod batch;
pub mod caldav;
pub mod config;
pub mod credentials;
pub mod dav_xml;
pub mod errors;
pub mod ical;
pub mod imap;
pub mod mailbox;
pub mod mime;
pub mod models;
pub mod oauth;
pub mod pagination;
pub mod server;
