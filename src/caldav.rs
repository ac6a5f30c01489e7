//! CalDAV calendar client
//!
//! [`CalendarClient`] discovers the calendar home once per process, lists
//! calendar collections under it and runs time-ranged `calendar-query`
//! reports. Every request carries a bearer token fetched fresh from the
//! [`CredentialManager`], so token refresh stays invisible to callers.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client as HttpClient, Method, StatusCode};
use tokio::sync::Mutex;
use tracing::{debug, info};
use url::Url;

use crate::batch::Batch;
use crate::config::CalendarConfig;
use crate::dav_xml::{self, DavResponse};
use crate::errors::{AppError, AppResult};
use crate::ical;
use crate::models::{CalendarCollection, CalendarEventRecord};
use crate::oauth::CredentialManager;

const XML_CONTENT_TYPE: &str = "application/xml; charset=utf-8";
const CALDAV_TIME_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// Discovered session state
#[derive(Debug, Clone)]
struct CalendarSession {
    home_url: Url,
}

/// CalDAV client for one account
pub struct CalendarClient {
    config: CalendarConfig,
    credentials: Arc<CredentialManager>,
    http: HttpClient,
    session: Mutex<Option<CalendarSession>>,
}

impl CalendarClient {
    /// Create a client; discovery runs on the first operation
    pub fn new(
        config: CalendarConfig,
        credentials: Arc<CredentialManager>,
        http: HttpClient,
    ) -> Self {
        Self {
            config,
            credentials,
            http,
            session: Mutex::new(None),
        }
    }

    /// Discover the calendar home; later calls are no-ops
    ///
    /// Follows `current-user-principal` and then `calendar-home-set`. When
    /// the server does not advertise either, the base URL is used as home.
    pub async fn initialize(&self) -> AppResult<()> {
        self.home_url().await.map(|_| ())
    }

    /// Calendar collections directly under the calendar home
    pub async fn list_calendars(&self) -> AppResult<Vec<CalendarCollection>> {
        let home = self.home_url().await?;
        let responses = self
            .dav_request("PROPFIND", &home, "1", dav_xml::PROPFIND_CALENDARS.to_owned())
            .await?;

        let mut calendars = Vec::new();
        for response in responses {
            if !response.props.is_calendar {
                continue;
            }
            let location = resolve_href(&home, &response.href)?;
            let id = collection_id(&location);
            calendars.push(CalendarCollection {
                display_name: response.props.display_name.unwrap_or_else(|| id.clone()),
                id,
                description: response.props.description,
                location_url: location.to_string(),
                color: response.props.color,
            });
        }
        debug!(count = calendars.len(), "calendars listed");
        Ok(calendars)
    }

    /// Events overlapping `[start, end]`, from one calendar or all of them
    ///
    /// Calendars that fail and objects that cannot be parsed are left out.
    pub async fn fetch_events(
        &self,
        calendar_id: Option<&str>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> AppResult<Vec<CalendarEventRecord>> {
        self.fetch_events_detailed(calendar_id, start, end)
            .await
            .map(Batch::into_items)
    }

    /// Like [`Self::fetch_events`], reporting skipped calendars and objects
    ///
    /// # Errors
    ///
    /// - `InvalidInput` if `start > end`
    /// - `CalendarNotFound` if `calendar_id` names no discovered calendar
    /// - credential errors, even when raised for a single calendar
    pub async fn fetch_events_detailed(
        &self,
        calendar_id: Option<&str>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> AppResult<Batch<CalendarEventRecord>> {
        if start > end {
            return Err(AppError::invalid("start date must not be after end date"));
        }

        let mut calendars = self.list_calendars().await?;
        if let Some(id) = calendar_id {
            calendars.retain(|c| c.id == id);
            if calendars.is_empty() {
                return Err(AppError::CalendarNotFound(id.to_owned()));
            }
        }

        let body = dav_xml::calendar_query(
            &start.format(CALDAV_TIME_FORMAT).to_string(),
            &end.format(CALDAV_TIME_FORMAT).to_string(),
        );
        let results = join_all(
            calendars
                .iter()
                .map(|calendar| self.calendar_events(calendar, body.clone())),
        )
        .await;

        let mut batch = Batch::default();
        for (calendar, result) in calendars.iter().zip(results) {
            match result {
                Ok(events) => batch.extend(events),
                Err(e) if e.is_credential() => return Err(e),
                Err(e) => batch.skip(format!("calendar {}", calendar.id), e.to_string()),
            }
        }
        info!(
            calendars = calendars.len(),
            events = batch.items.len(),
            skipped = batch.skipped.len(),
            "events fetched"
        );
        Ok(batch)
    }

    async fn calendar_events(
        &self,
        calendar: &CalendarCollection,
        body: String,
    ) -> AppResult<Batch<CalendarEventRecord>> {
        let url = Url::parse(&calendar.location_url)
            .map_err(|e| AppError::Internal(format!("invalid calendar url: {e}")))?;
        let responses = self.dav_request("REPORT", &url, "1", body).await?;

        let mut batch = Batch::default();
        for response in responses {
            let Some(data) = response.props.calendar_data.as_deref() else {
                batch.skip(response.href, "no calendar-data returned");
                continue;
            };
            match ical::parse_event(data, &calendar.id) {
                Ok(Some(event)) => batch.push(event),
                Ok(None) => batch.skip(response.href, "missing UID, SUMMARY, DTSTART or DTEND"),
                Err(e) => batch.skip(response.href, e.to_string()),
            }
        }
        Ok(batch)
    }

    /// Return the cached home URL, discovering it under the lock on first use
    async fn home_url(&self) -> AppResult<Url> {
        let mut session = self.session.lock().await;
        if let Some(existing) = session.as_ref() {
            return Ok(existing.home_url.clone());
        }
        let home_url = self.discover_home().await?;
        info!(home = %home_url, "calendar home discovered");
        *session = Some(CalendarSession {
            home_url: home_url.clone(),
        });
        Ok(home_url)
    }

    async fn discover_home(&self) -> AppResult<Url> {
        let base = &self.config.base_url;
        let principal = self
            .dav_request("PROPFIND", base, "0", dav_xml::PROPFIND_PRINCIPAL.to_owned())
            .await?
            .into_iter()
            .find_map(|r| r.props.current_user_principal);
        let Some(principal) = principal else {
            debug!("no current-user-principal, using base url as calendar home");
            return Ok(base.clone());
        };

        let principal_url = resolve_href(base, &principal)?;
        let home = self
            .dav_request(
                "PROPFIND",
                &principal_url,
                "0",
                dav_xml::PROPFIND_HOME_SET.to_owned(),
            )
            .await?
            .into_iter()
            .find_map(|r| r.props.calendar_home_set);
        match home {
            Some(home) => resolve_href(base, &home),
            None => {
                debug!(principal = %principal_url, "no calendar-home-set, using base url");
                Ok(base.clone())
            }
        }
    }

    /// Send a WebDAV request and parse the multistatus response
    async fn dav_request(
        &self,
        method: &str,
        url: &Url,
        depth: &str,
        body: String,
    ) -> AppResult<Vec<DavResponse>> {
        let token = self.credentials.get_valid_access_token().await?;
        let http_method = Method::from_bytes(method.as_bytes())
            .map_err(|e| AppError::Internal(format!("invalid HTTP method {method}: {e}")))?;

        let response = self
            .http
            .request(http_method, url.clone())
            .bearer_auth(token)
            .header("Depth", depth)
            .header(CONTENT_TYPE, XML_CONTENT_TYPE)
            .body(body)
            .send()
            .await
            .map_err(|e| AppError::Connection(format!("{method} {url} failed: {e}")))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(AppError::Authentication(format!(
                "{method} {url} returned {status}"
            )));
        }
        if !status.is_success() {
            return Err(AppError::Connection(format!(
                "{method} {url} returned {status}"
            )));
        }

        let text = response
            .text()
            .await
            .map_err(|e| AppError::Connection(format!("reading {method} {url} body: {e}")))?;
        debug!(method, %url, %status, bytes = text.len(), "dav response");
        dav_xml::parse_multistatus(&text)
    }
}

fn resolve_href(base: &Url, href: &str) -> AppResult<Url> {
    base.join(href.trim())
        .map_err(|e| AppError::Connection(format!("server returned invalid href '{href}': {e}")))
}

/// Trailing non-empty path segment, percent-decoded
fn collection_id(url: &Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.rfind(|s| !s.is_empty()))
        .map(|segment| {
            urlencoding::decode(segment)
                .map(|decoded| decoded.into_owned())
                .unwrap_or_else(|_| segment.to_owned())
        })
        .unwrap_or_else(|| url.to_string())
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Arc;

    use chrono::{DateTime, Duration, TimeZone, Utc};
    use secrecy::SecretString;
    use url::Url;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::{CalendarClient, collection_id};
    use crate::config::{CalendarConfig, OAuthConfig};
    use crate::credentials::{CredentialSet, CredentialStore};
    use crate::errors::AppError;
    use crate::oauth::CredentialManager;

    async fn client(server: &MockServer, token_dir: &Path) -> CalendarClient {
        CredentialStore::new(token_dir)
            .save(&CredentialSet {
                access_token: "access-abc".to_owned(),
                refresh_token: "refresh-abc".to_owned(),
                expires_at_epoch_millis: (Utc::now() + Duration::hours(1)).timestamp_millis(),
                token_type: "bearer".to_owned(),
            })
            .await
            .expect("seed credentials");

        let oauth = OAuthConfig {
            client_id: "client".to_owned(),
            client_secret: SecretString::new("secret".to_owned().into()),
            redirect_uri: "https://localhost/callback".to_owned(),
            base_url: Url::parse(&format!("{}/", server.uri())).expect("url"),
            token_dir: token_dir.to_path_buf(),
        };
        let credentials = Arc::new(CredentialManager::new(oauth, reqwest::Client::new()));
        CalendarClient::new(
            CalendarConfig {
                base_url: Url::parse(&format!("{}/dav/", server.uri())).expect("url"),
            },
            credentials,
            reqwest::Client::new(),
        )
    }

    fn multistatus(body: &str) -> ResponseTemplate {
        ResponseTemplate::new(207).set_body_string(format!(
            r#"<?xml version="1.0"?><d:multistatus xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav">{body}</d:multistatus>"#
        ))
    }

    fn calendar_response(href: &str, name: &str) -> String {
        format!(
            "<d:response><d:href>{href}</d:href><d:propstat><d:prop>\
<d:resourcetype><d:collection/><c:calendar/></d:resourcetype>\
<d:displayname>{name}</d:displayname></d:prop>\
<d:status>HTTP/1.1 200 OK</d:status></d:propstat></d:response>"
        )
    }

    fn event_response(href: &str, ics: &str) -> String {
        format!(
            "<d:response><d:href>{href}</d:href><d:propstat><d:prop>\
<c:calendar-data><![CDATA[{ics}]]></c:calendar-data></d:prop>\
<d:status>HTTP/1.1 200 OK</d:status></d:propstat></d:response>"
        )
    }

    fn ics(uid: &str, summary: Option<&str>) -> String {
        let summary = summary
            .map(|s| format!("SUMMARY:{s}\r\n"))
            .unwrap_or_default();
        format!(
            "BEGIN:VCALENDAR\r\nBEGIN:VEVENT\r\nUID:{uid}\r\n{summary}\
DTSTART:20240115T090000Z\r\nDTEND:20240115T100000Z\r\nEND:VEVENT\r\nEND:VCALENDAR\r\n"
        )
    }

    async fn mount_discovery(server: &MockServer) {
        Mock::given(method("PROPFIND"))
            .and(path("/dav/"))
            .and(header("Authorization", "Bearer access-abc"))
            .and(body_string_contains("current-user-principal"))
            .respond_with(multistatus(
                "<d:response><d:href>/dav/</d:href><d:propstat><d:prop>\
<d:current-user-principal><d:href>/principals/user/</d:href></d:current-user-principal>\
</d:prop><d:status>HTTP/1.1 200 OK</d:status></d:propstat></d:response>",
            ))
            .expect(1)
            .mount(server)
            .await;
        Mock::given(method("PROPFIND"))
            .and(path("/principals/user/"))
            .respond_with(multistatus(
                "<d:response><d:href>/principals/user/</d:href><d:propstat><d:prop>\
<c:calendar-home-set><d:href>/calendars/user/</d:href></c:calendar-home-set>\
</d:prop><d:status>HTTP/1.1 200 OK</d:status></d:propstat></d:response>",
            ))
            .expect(1)
            .mount(server)
            .await;
        let collections = [
            "<d:response><d:href>/calendars/user/</d:href><d:propstat><d:prop>\
<d:resourcetype><d:collection/></d:resourcetype></d:prop>\
<d:status>HTTP/1.1 200 OK</d:status></d:propstat></d:response>"
                .to_owned(),
            calendar_response("/calendars/user/work/", "Work"),
            calendar_response("/calendars/user/home/", "Home"),
            calendar_response("/calendars/user/broken/", "Broken"),
        ]
        .concat();
        Mock::given(method("PROPFIND"))
            .and(path("/calendars/user/"))
            .and(header("Depth", "1"))
            .respond_with(multistatus(&collections))
            .mount(server)
            .await;
    }

    fn range() -> (DateTime<Utc>, DateTime<Utc>) {
        (
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().expect("start"),
            Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).single().expect("end"),
        )
    }

    #[tokio::test]
    async fn discovers_home_and_lists_calendars() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().expect("tempdir");
        mount_discovery(&server).await;
        let client = client(&server, dir.path()).await;

        client.initialize().await.expect("initialize");
        client.initialize().await.expect("initialize is idempotent");
        let calendars = client.list_calendars().await.expect("calendars");

        let ids: Vec<&str> = calendars.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["work", "home", "broken"]);
        assert_eq!(calendars[0].display_name, "Work");
        assert_eq!(
            calendars[0].location_url,
            format!("{}/calendars/user/work/", server.uri())
        );
    }

    #[tokio::test]
    async fn failing_calendar_does_not_hide_the_others() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().expect("tempdir");
        mount_discovery(&server).await;

        Mock::given(method("REPORT"))
            .and(path("/calendars/user/work/"))
            .and(body_string_contains(
                r#"start="20240101T000000Z" end="20240201T000000Z""#,
            ))
            .respond_with(multistatus(
                &[
                    event_response("/calendars/user/work/a.ics", &ics("a", Some("Standup"))),
                    event_response("/calendars/user/work/b.ics", &ics("b", None)),
                ]
                .concat(),
            ))
            .mount(&server)
            .await;
        Mock::given(method("REPORT"))
            .and(path("/calendars/user/home/"))
            .respond_with(multistatus(&event_response(
                "/calendars/user/home/c.ics",
                &ics("c", Some("Dentist")),
            )))
            .mount(&server)
            .await;
        Mock::given(method("REPORT"))
            .and(path("/calendars/user/broken/"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = client(&server, dir.path()).await;
        let (start, end) = range();
        let batch = client
            .fetch_events_detailed(None, start, end)
            .await
            .expect("events");

        let summaries: Vec<&str> = batch.items.iter().map(|e| e.summary.as_str()).collect();
        assert_eq!(summaries, vec!["Standup", "Dentist"]);
        assert_eq!(batch.items[0].calendar_id, "work");
        assert_eq!(batch.items[1].calendar_id, "home");

        let skipped: Vec<&str> = batch.skipped.iter().map(|s| s.item.as_str()).collect();
        assert_eq!(
            skipped,
            vec!["/calendars/user/work/b.ics", "calendar broken"]
        );

        let events = client.fetch_events(None, start, end).await.expect("events");
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn unknown_calendar_id_is_rejected() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().expect("tempdir");
        mount_discovery(&server).await;
        let client = client(&server, dir.path()).await;

        let (start, end) = range();
        let err = client
            .fetch_events(Some("travel"), start, end)
            .await
            .expect_err("must fail");
        assert!(matches!(err, AppError::CalendarNotFound(id) if id == "travel"));
    }

    #[tokio::test]
    async fn inverted_range_fails_before_any_request() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().expect("tempdir");
        Mock::given(method("PROPFIND"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;
        let client = client(&server, dir.path()).await;

        let (start, end) = range();
        let err = client
            .fetch_events(None, end, start)
            .await
            .expect_err("must fail");
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn unauthorized_maps_to_authentication_error() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().expect("tempdir");
        Mock::given(method("PROPFIND"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        let client = client(&server, dir.path()).await;

        let err = client.initialize().await.expect_err("must fail");
        assert!(matches!(err, AppError::Authentication(_)));
    }

    #[tokio::test]
    async fn base_url_is_home_without_principal() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().expect("tempdir");
        Mock::given(method("PROPFIND"))
            .and(path("/dav/"))
            .and(header("Depth", "0"))
            .respond_with(multistatus(
                "<d:response><d:href>/dav/</d:href><d:propstat><d:prop>\
<d:current-user-principal/></d:prop>\
<d:status>HTTP/1.1 404 Not Found</d:status></d:propstat></d:response>",
            ))
            .mount(&server)
            .await;
        Mock::given(method("PROPFIND"))
            .and(path("/dav/"))
            .and(header("Depth", "1"))
            .respond_with(multistatus(&calendar_response("/dav/personal/", "Personal")))
            .mount(&server)
            .await;
        let client = client(&server, dir.path()).await;

        let calendars = client.list_calendars().await.expect("calendars");
        assert_eq!(calendars.len(), 1);
        assert_eq!(calendars[0].id, "personal");
    }

    #[tokio::test]
    async fn missing_credentials_propagate() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().expect("tempdir");
        let oauth = OAuthConfig {
            client_id: "client".to_owned(),
            client_secret: SecretString::new("secret".to_owned().into()),
            redirect_uri: "https://localhost/callback".to_owned(),
            base_url: Url::parse(&format!("{}/", server.uri())).expect("url"),
            token_dir: dir.path().to_path_buf(),
        };
        let client = CalendarClient::new(
            CalendarConfig {
                base_url: Url::parse(&format!("{}/dav/", server.uri())).expect("url"),
            },
            Arc::new(CredentialManager::new(oauth, reqwest::Client::new())),
            reqwest::Client::new(),
        );

        let err = client.list_calendars().await.expect_err("must fail");
        assert!(matches!(err, AppError::NoCredentials(_)));
    }

    #[test]
    fn collection_id_is_last_decoded_segment() {
        let url = Url::parse("https://dav.example.com/calendars/user/Team%20Events/").expect("url");
        assert_eq!(collection_id(&url), "Team Events");
    }
}
