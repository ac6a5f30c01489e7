//! Message parsing and MIME handling
//!
//! Parses RFC822 messages using `mailparse`, extracts addresses, body
//! text/HTML and attachment metadata. Sanitizes HTML with `ammonia`.

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use mailparse::{DispositionType, MailAddr, MailHeaderMap, ParsedMail};
use tracing::debug;

use crate::errors::{AppError, AppResult};
use crate::models::{AttachmentContent, AttachmentMeta, EmailAddress};

/// Parsed message representation
///
/// Contains decoded headers, body content, and attachment metadata.
#[derive(Debug, Clone)]
pub struct ParsedMessage {
    /// `Message-ID` without angle brackets
    pub message_id: Option<String>,
    /// Decoded Subject header
    pub subject: Option<String>,
    /// Parsed Date header; `None` when absent or malformed
    pub date: Option<DateTime<Utc>>,
    /// From addresses
    pub from: Vec<EmailAddress>,
    /// To addresses
    pub to: Vec<EmailAddress>,
    /// Cc addresses
    pub cc: Vec<EmailAddress>,
    /// Bcc addresses
    pub bcc: Vec<EmailAddress>,
    /// Plain text body
    pub body_text: Option<String>,
    /// Sanitized HTML body
    pub body_html_sanitized: Option<String>,
    /// Attachment metadata
    pub attachments: Vec<AttachmentMeta>,
}

/// Attachment part collected during the MIME walk
struct AttachmentPart {
    meta: AttachmentMeta,
    content: Option<Vec<u8>>,
}

/// Parse RFC822 message into structured representation
///
/// Attachment bodies are decoded only to measure them; their content is not
/// retained.
///
/// # Errors
///
/// - `Internal` if `mailparse` fails or an address header is malformed
pub fn parse_message(raw: &[u8]) -> AppResult<ParsedMessage> {
    let parsed = mailparse::parse_mail(raw)
        .map_err(|e| AppError::Internal(format!("failed to parse RFC822 message: {e}")))?;

    let mut body_text = None;
    let mut body_html = None;
    let mut attachments = Vec::new();
    walk_parts(
        &parsed,
        &mut body_text,
        &mut body_html,
        &mut attachments,
        false,
    )?;

    let headers = &parsed.headers;
    let date = headers
        .get_first_value("Date")
        .and_then(|value| parse_date(&value));

    Ok(ParsedMessage {
        message_id: headers
            .get_first_value("Message-ID")
            .map(|v| strip_angle_brackets(&v)),
        subject: headers.get_first_value("Subject"),
        date,
        from: addresses(&parsed, "From")?,
        to: addresses(&parsed, "To")?,
        cc: addresses(&parsed, "Cc")?,
        bcc: addresses(&parsed, "Bcc")?,
        body_text,
        body_html_sanitized: body_html,
        attachments: attachments.into_iter().map(|a| a.meta).collect(),
    })
}

/// Extract the `index`-th attachment with its decoded content
///
/// # Errors
///
/// - `NotFound` if the message has fewer attachments
/// - `Internal` if the message cannot be parsed
pub fn extract_attachment(raw: &[u8], index: usize) -> AppResult<AttachmentContent> {
    let parsed = mailparse::parse_mail(raw)
        .map_err(|e| AppError::Internal(format!("failed to parse RFC822 message: {e}")))?;

    let mut attachments = Vec::new();
    walk_parts(&parsed, &mut None, &mut None, &mut attachments, true)?;

    let part = attachments
        .into_iter()
        .nth(index)
        .ok_or_else(|| AppError::NotFound(format!("attachment index {index} not found")))?;
    Ok(AttachmentContent {
        content_base64: STANDARD.encode(part.content.unwrap_or_default()),
        attachment: part.meta,
    })
}

/// Walk MIME part tree recursively
///
/// Keeps the first text/plain and text/html bodies that are not attachments.
fn walk_parts(
    part: &ParsedMail<'_>,
    body_text: &mut Option<String>,
    body_html: &mut Option<String>,
    attachments: &mut Vec<AttachmentPart>,
    keep_content: bool,
) -> AppResult<()> {
    if part.subparts.is_empty() {
        let ctype = part.ctype.mimetype.to_ascii_lowercase();
        let disp = part.get_content_disposition();
        let filename = attachment_filename(part, &disp.params);
        let is_attachment = disp.disposition == DispositionType::Attachment || filename.is_some();

        if !is_attachment {
            if ctype == "text/plain"
                && body_text.is_none()
                && let Ok(text) = part.get_body()
            {
                *body_text = Some(text);
            }

            if ctype == "text/html"
                && body_html.is_none()
                && let Ok(html) = part.get_body()
            {
                *body_html = Some(ammonia::clean(&html));
            }
            return Ok(());
        }

        let raw_body = part
            .get_body_raw()
            .map_err(|e| AppError::Internal(format!("failed decoding attachment body: {e}")))?;
        attachments.push(AttachmentPart {
            meta: AttachmentMeta {
                filename: filename.unwrap_or_else(|| "unnamed".to_owned()),
                content_type: ctype,
                size_bytes: raw_body.len(),
                content_id: part
                    .headers
                    .get_first_value("Content-ID")
                    .map(|v| strip_angle_brackets(&v)),
            },
            content: keep_content.then_some(raw_body),
        });
        return Ok(());
    }

    for sub in &part.subparts {
        walk_parts(sub, body_text, body_html, attachments, keep_content)?;
    }
    Ok(())
}

/// Extract attachment filename from part
///
/// Checks Content-Disposition parameter first, falls back to Content-Type
/// name parameter.
fn attachment_filename(
    part: &ParsedMail<'_>,
    disp_params: &BTreeMap<String, String>,
) -> Option<String> {
    disp_params
        .get("filename")
        .cloned()
        .or_else(|| part.ctype.params.get("name").cloned())
}

/// Parse an address header, flattening groups
fn addresses(parsed: &ParsedMail<'_>, key: &str) -> AppResult<Vec<EmailAddress>> {
    let Some(header) = parsed.headers.get_first_header(key) else {
        return Ok(Vec::new());
    };
    let list = mailparse::addrparse_header(header)
        .map_err(|e| AppError::Internal(format!("malformed {key} header: {e}")))?;

    let mut out = Vec::new();
    for addr in list.iter() {
        match addr {
            MailAddr::Single(single) => out.push(EmailAddress {
                display_name: single.display_name.clone(),
                address: single.addr.clone(),
            }),
            MailAddr::Group(group) => {
                out.extend(group.addrs.iter().map(|single| EmailAddress {
                    display_name: single.display_name.clone(),
                    address: single.addr.clone(),
                }));
            }
        }
    }
    Ok(out)
}

/// Parse a Date header; malformed values yield `None` so callers can fall
/// back to the server arrival time
///
/// Strict RFC 2822 is tried first. `mailparse::dateparse` is lenient and maps
/// text it cannot read to the epoch, so only positive results are kept.
fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc2822(value.trim()) {
        return Some(dt.with_timezone(&Utc));
    }
    match mailparse::dateparse(value) {
        Ok(secs) if secs > 0 => DateTime::from_timestamp(secs, 0),
        Ok(_) => {
            debug!(value, "ignoring unreadable Date header");
            None
        }
        Err(e) => {
            debug!(value, error = %e, "ignoring malformed Date header");
            None
        }
    }
}

fn strip_angle_brackets(value: &str) -> String {
    value
        .trim()
        .trim_start_matches('<')
        .trim_end_matches('>')
        .to_owned()
}

#[cfg(test)]
mod tests {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;

    use super::{extract_attachment, parse_date, parse_message};
    use crate::errors::AppError;

    const MULTIPART: &[u8] = b"From: \"Jane Doe\" <jane@example.com>\r\n\
To: user@example.com, Team: a@example.com, b@example.com;\r\n\
Cc: <carol@example.com>\r\n\
Subject: =?UTF-8?B?UXVhcnRlcmx5IHJlcG9ydA==?=\r\n\
Date: Mon, 15 Jan 2024 09:30:00 +0000\r\n\
Message-ID: <abc123@example.com>\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"XYZ\"\r\n\
\r\n\
--XYZ\r\n\
Content-Type: multipart/alternative; boundary=\"ALT\"\r\n\
\r\n\
--ALT\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
Numbers attached.\r\n\
--ALT\r\n\
Content-Type: text/html; charset=utf-8\r\n\
\r\n\
<p>Numbers <b>attached</b>.</p><script>alert(1)</script>\r\n\
--ALT--\r\n\
--XYZ\r\n\
Content-Type: application/pdf; name=\"report.pdf\"\r\n\
Content-Disposition: attachment; filename=\"report.pdf\"\r\n\
Content-Transfer-Encoding: base64\r\n\
Content-ID: <part1@example.com>\r\n\
\r\n\
JVBERi0xLjQK\r\n\
--XYZ--\r\n";

    #[test]
    fn parses_simple_plain_text_message() {
        let raw = b"From: sender@example.com\r\nTo: user@example.com\r\nSubject: Hi\r\nDate: Wed, 1 Jan 2025 00:00:00 +0000\r\n\r\nHello there";
        let parsed = parse_message(raw).expect("parse should succeed");

        assert_eq!(parsed.subject.as_deref(), Some("Hi"));
        assert_eq!(parsed.from.len(), 1);
        assert_eq!(parsed.from[0].address, "sender@example.com");
        assert_eq!(parsed.to[0].address, "user@example.com");
        assert_eq!(parsed.body_text.as_deref(), Some("Hello there"));
        assert_eq!(
            parsed.date.map(|d| d.to_rfc3339()).as_deref(),
            Some("2025-01-01T00:00:00+00:00")
        );
        assert!(parsed.attachments.is_empty());
    }

    #[test]
    fn parses_addresses_bodies_and_attachment_metadata() {
        let parsed = parse_message(MULTIPART).expect("parse should succeed");

        assert_eq!(parsed.subject.as_deref(), Some("Quarterly report"));
        assert_eq!(parsed.message_id.as_deref(), Some("abc123@example.com"));
        assert_eq!(parsed.from[0].display_name.as_deref(), Some("Jane Doe"));
        assert_eq!(parsed.from[0].address, "jane@example.com");

        let to: Vec<&str> = parsed.to.iter().map(|a| a.address.as_str()).collect();
        assert_eq!(to, vec!["user@example.com", "a@example.com", "b@example.com"]);
        assert_eq!(parsed.cc[0].address, "carol@example.com");
        assert!(parsed.bcc.is_empty());

        assert_eq!(
            parsed.body_text.as_deref().map(str::trim),
            Some("Numbers attached.")
        );
        let html = parsed.body_html_sanitized.expect("html body");
        assert!(html.contains("<b>attached</b>"));
        assert!(!html.contains("script"));

        assert_eq!(parsed.attachments.len(), 1);
        let attachment = &parsed.attachments[0];
        assert_eq!(attachment.filename, "report.pdf");
        assert_eq!(attachment.content_type, "application/pdf");
        assert_eq!(attachment.size_bytes, 9);
        assert_eq!(attachment.content_id.as_deref(), Some("part1@example.com"));
    }

    #[test]
    fn extracts_attachment_content_on_request() {
        let content = extract_attachment(MULTIPART, 0).expect("attachment");
        assert_eq!(content.attachment.filename, "report.pdf");
        let decoded = STANDARD
            .decode(content.content_base64)
            .expect("valid base64");
        assert_eq!(decoded, b"%PDF-1.4\n");
    }

    #[test]
    fn missing_attachment_index_is_not_found() {
        let err = extract_attachment(MULTIPART, 3).expect_err("must fail");
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[test]
    fn garbage_date_values_are_not_the_epoch() {
        for value in ["garbage", "yesterday-ish"] {
            assert!(parse_date(value).is_none(), "{value:?}");
        }
    }

    #[test]
    fn dates_with_and_without_weekday_are_read() {
        let strict = parse_date("Mon, 15 Jan 2024 09:30:00 +0100").expect("strict date");
        assert_eq!(strict.to_rfc3339(), "2024-01-15T08:30:00+00:00");
        let lenient = parse_date("5 Feb 2024 10:00:00 +0000").expect("lenient date");
        assert_eq!(lenient.to_rfc3339(), "2024-02-05T10:00:00+00:00");
    }

    #[test]
    fn malformed_date_is_left_empty() {
        let raw = b"From: a@example.com\r\nDate: yesterday-ish\r\n\r\nbody";
        let parsed = parse_message(raw).expect("parse should succeed");
        assert!(parsed.date.is_none());
    }
}
