//! Visit history: per-page counters in local storage and the current
//! session's browsing trail in session storage.
//!
//! Page names come from the client, so they are normalized to a bounded path
//! and both the counter map and the trail are capped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::signals::{Attribution, UrlParams};
use crate::storage::{Storage, StorageError};

pub const VISITS_KEY: &str = "infetech_user_visits";
pub const SESSION_DATA_KEY: &str = "infetech_session_data";
pub const MAX_TRACKED_PAGES: usize = 200;
pub const MAX_PAGES_VIEWED: usize = 50;
pub const MAX_PAGE_LEN: usize = 128;

/// Lowercased path without query or fragment, limited to URL path characters
/// and `MAX_PAGE_LEN`. Anything unusable becomes `/`.
pub fn normalize_page(page: &str) -> String {
    let path = page.trim().split(['?', '#']).next().unwrap_or("");
    let mut normalized = String::from("/");
    for c in path.chars().filter(|c| c.is_ascii_alphanumeric() || "/-_.".contains(*c)) {
        if normalized.len() >= MAX_PAGE_LEN {
            break;
        }
        if c == '/' && normalized.ends_with('/') {
            continue;
        }
        normalized.push(c.to_ascii_lowercase());
    }
    if normalized.len() > 1 && normalized.ends_with('/') {
        normalized.pop();
    }
    normalized
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VisitBucket {
    FirstTime,
    Returning,
    Regular,
    Loyal,
}

impl VisitBucket {
    /// 1 → first-time, 2–3 → returning, 4–9 → regular, 10+ → loyal.
    pub fn from_count(count: u32) -> Self {
        match count {
            0 | 1 => VisitBucket::FirstTime,
            2..=3 => VisitBucket::Returning,
            4..=9 => VisitBucket::Regular,
            _ => VisitBucket::Loyal,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VisitBucket::FirstTime => "first_time",
            VisitBucket::Returning => "returning",
            VisitBucket::Regular => "regular",
            VisitBucket::Loyal => "loyal",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PageVisits {
    pub count: u32,
    pub first_visit: DateTime<Utc>,
    pub last_visit: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionData {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub landing_page: String,
    pub pages_viewed: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribution: Option<Attribution>,
}

pub struct VisitTracker {
    storage: Storage,
}

impl VisitTracker {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    /// Bump the counter for `page` and return its bucket.
    /// Past `MAX_TRACKED_PAGES` the least recently visited page is dropped.
    pub fn record_visit(&self, page: &str, now: DateTime<Utc>) -> Result<VisitBucket, StorageError> {
        let page = normalize_page(page);
        let mut visits = self.visits();
        let entry = visits.entry(page.clone()).or_insert(PageVisits {
            count: 0,
            first_visit: now,
            last_visit: now,
        });
        entry.count += 1;
        entry.last_visit = now;
        let bucket = VisitBucket::from_count(entry.count);

        while visits.len() > MAX_TRACKED_PAGES {
            let stalest = visits
                .iter()
                .filter(|(key, _)| **key != page)
                .min_by_key(|(_, v)| v.last_visit)
                .map(|(key, _)| key.clone());
            match stalest {
                Some(key) => visits.remove(&key),
                None => break,
            };
        }
        self.storage.set_json(VISITS_KEY, &visits)?;
        debug!(page = %page, bucket = bucket.as_str(), "visit recorded");
        Ok(bucket)
    }

    /// Bucket for `page` without counting a visit.
    pub fn bucket_for(&self, page: &str) -> Option<VisitBucket> {
        self.visits()
            .get(&normalize_page(page))
            .map(|v| VisitBucket::from_count(v.count))
    }

    /// Per-page counters. Unreadable data counts as no history.
    pub fn visits(&self) -> BTreeMap<String, PageVisits> {
        self.storage
            .get_json(VISITS_KEY)
            .ok()
            .flatten()
            .unwrap_or_default()
    }

    /// Append `page` to the session trail, starting a session if needed.
    /// The first UTM attribution seen in the session is kept, and the trail
    /// keeps the last `MAX_PAGES_VIEWED` pages.
    pub fn track_session(
        &self,
        page: &str,
        params: &UrlParams,
        now: DateTime<Utc>,
    ) -> Result<SessionData, StorageError> {
        let page = normalize_page(page);
        let existing = match self.storage.get_session_json::<SessionData>(SESSION_DATA_KEY) {
            Ok(existing) => existing,
            Err(e) => {
                warn!(error = %e, "unreadable session data, starting a new session");
                self.storage.remove_session_item(SESSION_DATA_KEY)?;
                None
            }
        };
        let mut session = existing.unwrap_or_else(|| SessionData {
            session_id: format!("sess_{}", Uuid::new_v4().simple()),
            started_at: now,
            landing_page: page.clone(),
            pages_viewed: vec![],
            attribution: None,
        });
        session.pages_viewed.push(page);
        if session.pages_viewed.len() > MAX_PAGES_VIEWED {
            let overflow = session.pages_viewed.len() - MAX_PAGES_VIEWED;
            session.pages_viewed.drain(..overflow);
        }
        if session.attribution.is_none() {
            session.attribution = params.attribution();
        }
        self.storage.set_session_json(SESSION_DATA_KEY, &session)?;
        Ok(session)
    }

    pub fn session(&self) -> Option<SessionData> {
        self.storage.get_session_json(SESSION_DATA_KEY).ok().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_boundaries() {
        assert_eq!(VisitBucket::from_count(1), VisitBucket::FirstTime);
        assert_eq!(VisitBucket::from_count(2), VisitBucket::Returning);
        assert_eq!(VisitBucket::from_count(3), VisitBucket::Returning);
        assert_eq!(VisitBucket::from_count(4), VisitBucket::Regular);
        assert_eq!(VisitBucket::from_count(9), VisitBucket::Regular);
        assert_eq!(VisitBucket::from_count(10), VisitBucket::Loyal);
    }

    #[test]
    fn test_record_visit_counts_per_page() {
        let tracker = VisitTracker::new(Storage::temporary().unwrap());
        let now = Utc::now();

        assert_eq!(tracker.record_visit("/seo", now).unwrap(), VisitBucket::FirstTime);
        assert_eq!(tracker.record_visit("/seo", now).unwrap(), VisitBucket::Returning);
        assert_eq!(tracker.record_visit("/ppc", now).unwrap(), VisitBucket::FirstTime);
        assert_eq!(tracker.bucket_for("/seo"), Some(VisitBucket::Returning));
        assert_eq!(tracker.bucket_for("/about"), None);
        assert_eq!(tracker.visits()["/seo"].count, 2);
    }

    #[test]
    fn test_session_keeps_first_attribution() {
        let tracker = VisitTracker::new(Storage::temporary().unwrap());
        let now = Utc::now();

        tracker
            .track_session("/landing", &UrlParams::parse("utm_source=google&utm_campaign=a"), now)
            .unwrap();
        let session = tracker
            .track_session("/contact", &UrlParams::parse("utm_source=bing"), now)
            .unwrap();

        assert_eq!(session.landing_page, "/landing");
        assert_eq!(session.pages_viewed, vec!["/landing", "/contact"]);
        assert_eq!(session.attribution.unwrap().source, "google");
        assert!(tracker.session().is_some());
    }

    #[test]
    fn test_normalize_page() {
        assert_eq!(normalize_page("/SEO/"), "/seo");
        assert_eq!(normalize_page("seo-services?utm_source=x#top"), "/seo-services");
        assert_eq!(normalize_page("//a//b"), "/a/b");
        assert_eq!(normalize_page("<script>"), "/script");
        assert_eq!(normalize_page(""), "/");
        assert_eq!(normalize_page(&"x".repeat(1000)).len(), MAX_PAGE_LEN);
    }

    #[test]
    fn test_page_counters_are_capped() {
        let tracker = VisitTracker::new(Storage::temporary().unwrap());
        let start = Utc::now();
        tracker.record_visit("/home", start).unwrap();

        for i in 0..MAX_TRACKED_PAGES + 20 {
            let at = start + chrono::Duration::seconds(i as i64 + 1);
            tracker.record_visit(&format!("/junk-{}", i), at).unwrap();
        }

        let visits = tracker.visits();
        assert_eq!(visits.len(), MAX_TRACKED_PAGES);
        // The oldest pages went first
        assert!(!visits.contains_key("/home"));
        assert!(!visits.contains_key("/junk-0"));
        assert!(visits.contains_key(&format!("/junk-{}", MAX_TRACKED_PAGES + 19)));
    }

    #[test]
    fn test_session_trail_keeps_latest_pages() {
        let tracker = VisitTracker::new(Storage::temporary().unwrap());
        let now = Utc::now();
        let params = UrlParams::parse("");

        for i in 0..MAX_PAGES_VIEWED + 10 {
            tracker.track_session(&format!("/p{}", i), &params, now).unwrap();
        }

        let session = tracker.session().unwrap();
        assert_eq!(session.pages_viewed.len(), MAX_PAGES_VIEWED);
        assert_eq!(session.pages_viewed[0], "/p10");
        assert_eq!(session.landing_page, "/p0");
    }

    #[test]
    fn test_corrupt_session_data_starts_over() {
        let storage = Storage::temporary().unwrap();
        storage.set_session_item(SESSION_DATA_KEY, "{not json").unwrap();
        let tracker = VisitTracker::new(storage);

        let session = tracker.track_session("/seo", &UrlParams::parse(""), Utc::now()).unwrap();
        assert_eq!(session.pages_viewed, vec!["/seo"]);
        assert_eq!(tracker.session().unwrap().session_id, session.session_id);
    }
}
