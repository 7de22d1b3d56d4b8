//! Google Calendar REST client.

use crate::auth::{ServiceAccountAuth, ServiceAccountKey, TokenSource};
use crate::error::{CalendarError, CalendarResult};
use crate::mapping::{
    calendar_body, entry_body, event_from_calendar, session_from_entry, CalendarItem, EntryItem,
};
use crate::remote::{RemoteCalendar, SnapshotSource};
use async_trait::async_trait;
use planning_model::{EventRecord, SessionRecord};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, error, info, warn};
use url::Url;

/// Production API root.
pub const DEFAULT_BASE_URL: &str = "https://www.googleapis.com/calendar/v3";

const PAGE_SIZE: &str = "250";

#[derive(Debug, Deserialize)]
struct Created {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct Page<T> {
    #[serde(default)]
    items: Vec<T>,
    #[serde(rename = "nextPageToken", default)]
    next_page_token: Option<String>,
}

/// Calendar API client acting for one (possibly impersonated) user.
pub struct GoogleCalendarClient {
    http_client: reqwest::Client,
    base_url: Url,
    tokens: TokenSource,
}

impl GoogleCalendarClient {
    pub fn new(tokens: TokenSource) -> CalendarResult<Self> {
        Self::with_base_url(DEFAULT_BASE_URL, tokens)
    }

    /// Client against a different API root (proxies, test servers).
    pub fn with_base_url(base_url: &str, tokens: TokenSource) -> CalendarResult<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| CalendarError::Config(format!("invalid base URL {base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(CalendarError::Config(format!(
                "base URL {base_url} cannot carry a path"
            )));
        }
        Ok(Self {
            http_client: reqwest::Client::new(),
            base_url,
            tokens,
        })
    }

    /// Client authenticated with a service account key file.
    ///
    /// `subject` is the user to impersonate; without it the service account
    /// acts as itself.
    pub fn from_service_account_file(
        key_path: &Path,
        subject: Option<String>,
        base_url: &str,
    ) -> CalendarResult<Self> {
        let key = ServiceAccountKey::from_file(key_path)?;
        info!(client_email = %key.client_email, subject = ?subject, "Using service account credentials");
        let auth = ServiceAccountAuth::new(key, subject)?;
        Self::with_base_url(base_url, TokenSource::ServiceAccount(auth))
    }

    /// URL of `segments` below the API root, each segment percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> CalendarResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| CalendarError::Config("base URL cannot carry a path".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    // =========================================================================
    // HTTP helpers
    // =========================================================================

    async fn send(&self, request: reqwest::RequestBuilder) -> CalendarResult<reqwest::Response> {
        let token = self.tokens.token(&self.http_client).await?;
        let response = request.bearer_auth(token).send().await?;
        self.check_response(response).await
    }

    /// Map error statuses; 404 and 410 become [`CalendarError::NotFound`].
    async fn check_response(&self, response: reqwest::Response) -> CalendarResult<reqwest::Response> {
        let status = response.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            return Err(CalendarError::NotFound(response.url().path().to_string()));
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            error!("Calendar request failed: {} - {}", status, message);
            return Err(CalendarError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response)
    }

    async fn post<T: Serialize + ?Sized>(&self, url: Url, body: &T) -> CalendarResult<String> {
        let response = self.send(self.http_client.post(url).json(body)).await?;
        let created: Created = response.json().await?;
        Ok(created.id)
    }

    async fn patch<T: Serialize + ?Sized>(&self, url: Url, body: &T) -> CalendarResult<()> {
        self.send(self.http_client.patch(url).json(body)).await?;
        Ok(())
    }

    /// DELETE that treats an already-missing resource as deleted.
    async fn delete(&self, url: Url) -> CalendarResult<()> {
        match self.send(self.http_client.delete(url)).await {
            Ok(_) => Ok(()),
            Err(CalendarError::NotFound(path)) => {
                warn!(%path, "Remote resource already deleted");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Follow `nextPageToken` until every item of a collection is read.
    async fn list_all<T: DeserializeOwned>(
        &self,
        url: Url,
        query: &[(&str, &str)],
    ) -> CalendarResult<Vec<T>> {
        let mut items = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .http_client
                .get(url.clone())
                .query(query)
                .query(&[("maxResults", PAGE_SIZE)]);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }

            let page: Page<T> = self.send(request).await?.json().await?;
            items.extend(page.items);

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(items)
    }
}

#[async_trait]
impl RemoteCalendar for GoogleCalendarClient {
    async fn create_container(&self, event: &EventRecord) -> CalendarResult<String> {
        debug!(entity_id = %event.id, "Creating calendar for event");
        let calendar_id = self.post(self.endpoint(&["calendars"])?, &calendar_body(event)).await?;
        info!(entity_id = %event.id, %calendar_id, "Calendar created");
        Ok(calendar_id)
    }

    async fn update_container(&self, container_id: &str, event: &EventRecord) -> CalendarResult<()> {
        debug!(entity_id = %event.id, container_id, "Updating calendar for event");
        self.patch(self.endpoint(&["calendars", container_id])?, &calendar_body(event))
            .await
    }

    async fn delete_container(&self, container_id: &str) -> CalendarResult<()> {
        debug!(container_id, "Deleting calendar");
        self.delete(self.endpoint(&["calendars", container_id])?).await
    }

    async fn create_entry(&self, container_id: &str, session: &SessionRecord) -> CalendarResult<String> {
        debug!(entity_id = %session.id, container_id, "Creating calendar entry for session");
        let url = self.endpoint(&["calendars", container_id, "events"])?;
        let entry_id = self.post(url, &entry_body(session)).await?;
        info!(entity_id = %session.id, %entry_id, "Calendar entry created");
        Ok(entry_id)
    }

    async fn update_entry(
        &self,
        container_id: &str,
        entry_id: &str,
        session: &SessionRecord,
    ) -> CalendarResult<()> {
        debug!(entity_id = %session.id, entry_id, "Updating calendar entry for session");
        let url = self.endpoint(&["calendars", container_id, "events", entry_id])?;
        self.patch(url, &entry_body(session)).await
    }

    async fn delete_entry(&self, container_id: &str, entry_id: &str) -> CalendarResult<()> {
        debug!(container_id, entry_id, "Deleting calendar entry");
        self.delete(self.endpoint(&["calendars", container_id, "events", entry_id])?)
            .await
    }
}

#[async_trait]
impl SnapshotSource for GoogleCalendarClient {
    async fn fetch_events(&self) -> CalendarResult<Vec<EventRecord>> {
        let url = self.endpoint(&["users", "me", "calendarList"])?;
        let calendars: Vec<CalendarItem> = self.list_all(url, &[]).await?;
        let events: Vec<EventRecord> = calendars.iter().filter_map(event_from_calendar).collect();
        debug!(calendars = calendars.len(), events = events.len(), "Fetched event snapshot");
        Ok(events)
    }

    async fn fetch_sessions(&self, events: &[EventRecord]) -> CalendarResult<Vec<SessionRecord>> {
        let mut sessions = Vec::new();
        for event in events {
            let Some(calendar_id) = event.remote_container_id.as_deref() else {
                continue;
            };
            let url = self.endpoint(&["calendars", calendar_id, "events"])?;
            let entries: Vec<EntryItem> = self
                .list_all(url, &[("singleEvents", "true"), ("showDeleted", "false")])
                .await?;
            sessions.extend(
                entries
                    .iter()
                    .filter_map(|entry| session_from_entry(event, calendar_id, entry)),
            );
        }
        debug!(sessions = sessions.len(), "Fetched session snapshot");
        Ok(sessions)
    }
}

impl std::fmt::Debug for GoogleCalendarClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoogleCalendarClient")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}
