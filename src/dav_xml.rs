//! WebDAV multistatus parsing and request bodies
//!
//! Elements are matched by local name only, so servers are free to pick any
//! namespace prefixes. Property groups whose `propstat` status is not 2xx are
//! discarded.

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::errors::{AppError, AppResult};

/// `PROPFIND` body for the authenticated user's principal
pub const PROPFIND_PRINCIPAL: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<d:propfind xmlns:d="DAV:">
  <d:prop>
    <d:current-user-principal/>
  </d:prop>
</d:propfind>"#;

/// `PROPFIND` body for the principal's calendar home
pub const PROPFIND_HOME_SET: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<d:propfind xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav">
  <d:prop>
    <c:calendar-home-set/>
  </d:prop>
</d:propfind>"#;

/// `PROPFIND` body listing collections under the calendar home
pub const PROPFIND_CALENDARS: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<d:propfind xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav" xmlns:a="http://apple.com/ns/ical/">
  <d:prop>
    <d:displayname/>
    <d:resourcetype/>
    <c:calendar-description/>
    <a:calendar-color/>
  </d:prop>
</d:propfind>"#;

/// `REPORT` body for events overlapping `[start, end]`
///
/// Both bounds are UTC in `YYYYMMDDTHHMMSSZ` form.
pub fn calendar_query(start: &str, end: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<c:calendar-query xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav">
  <d:prop>
    <d:getetag/>
    <c:calendar-data/>
  </d:prop>
  <c:filter>
    <c:comp-filter name="VCALENDAR">
      <c:comp-filter name="VEVENT">
        <c:time-range start="{start}" end="{end}"/>
      </c:comp-filter>
    </c:comp-filter>
  </c:filter>
</c:calendar-query>"#
    )
}

/// Properties of one `response` element
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DavProps {
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub color: Option<String>,
    /// `resourcetype` includes `calendar`
    pub is_calendar: bool,
    pub current_user_principal: Option<String>,
    pub calendar_home_set: Option<String>,
    pub calendar_data: Option<String>,
}

impl DavProps {
    fn merge(&mut self, other: DavProps) {
        self.display_name = other.display_name.or(self.display_name.take());
        self.description = other.description.or(self.description.take());
        self.color = other.color.or(self.color.take());
        self.is_calendar |= other.is_calendar;
        self.current_user_principal = other
            .current_user_principal
            .or(self.current_user_principal.take());
        self.calendar_home_set = other.calendar_home_set.or(self.calendar_home_set.take());
        self.calendar_data = other.calendar_data.or(self.calendar_data.take());
    }
}

/// One `response` of a multistatus document
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DavResponse {
    /// `href` as sent by the server, usually an absolute path
    pub href: String,
    pub props: DavProps,
}

/// Parse a `207 Multi-Status` body
///
/// # Errors
///
/// `Connection` if the body is not well-formed XML.
pub fn parse_multistatus(xml: &str) -> AppResult<Vec<DavResponse>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut responses = Vec::new();
    let mut stack: Vec<String> = Vec::new();
    let mut text = String::new();

    let mut response: Option<DavResponse> = None;
    let mut response_ok = true;
    let mut group = DavProps::default();
    let mut group_ok = true;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| AppError::Connection(format!("malformed multistatus body: {e}")))?;
        match event {
            Event::Start(e) => {
                let name = local_name(&e);
                match name.as_str() {
                    "response" => {
                        response = Some(DavResponse::default());
                        response_ok = true;
                    }
                    "propstat" => {
                        group = DavProps::default();
                        group_ok = true;
                    }
                    _ => {}
                }
                stack.push(name);
                text.clear();
            }
            Event::Empty(e) => {
                if local_name(&e) == "calendar" && parent_is(&stack, "resourcetype") {
                    group.is_calendar = true;
                }
            }
            Event::Text(t) => {
                let unescaped = t
                    .unescape()
                    .map_err(|e| AppError::Connection(format!("malformed multistatus text: {e}")))?;
                text.push_str(&unescaped);
            }
            Event::CData(c) => {
                text.push_str(&String::from_utf8_lossy(&c.into_inner()));
            }
            Event::End(_) => {
                let Some(name) = stack.pop() else {
                    continue;
                };
                let value = std::mem::take(&mut text);
                match name.as_str() {
                    "href" if parent_is(&stack, "response") => {
                        if let Some(r) = response.as_mut() {
                            r.href = value.trim().to_owned();
                        }
                    }
                    "href" if parent_is(&stack, "current-user-principal") => {
                        group.current_user_principal = non_empty(value);
                    }
                    "href" if parent_is(&stack, "calendar-home-set") => {
                        group.calendar_home_set = non_empty(value);
                    }
                    "calendar" if parent_is(&stack, "resourcetype") => group.is_calendar = true,
                    "displayname" => group.display_name = non_empty(value),
                    "calendar-description" => group.description = non_empty(value),
                    "calendar-color" => group.color = non_empty(value),
                    "calendar-data" => group.calendar_data = non_empty(value),
                    "status" if parent_is(&stack, "propstat") => group_ok = is_success(&value),
                    "status" if parent_is(&stack, "response") => response_ok = is_success(&value),
                    "propstat" => {
                        if group_ok && let Some(r) = response.as_mut() {
                            r.props.merge(std::mem::take(&mut group));
                        }
                    }
                    "response" => {
                        if let Some(r) = response.take()
                            && response_ok
                            && !r.href.is_empty()
                        {
                            responses.push(r);
                        }
                    }
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(responses)
}

fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).to_ascii_lowercase()
}

fn parent_is(stack: &[String], name: &str) -> bool {
    stack.last().is_some_and(|top| top == name)
}

/// `HTTP/1.1 200 OK` and friends
fn is_success(status: &str) -> bool {
    status
        .split_whitespace()
        .nth(1)
        .is_some_and(|code| code.starts_with('2'))
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_owned())
}
