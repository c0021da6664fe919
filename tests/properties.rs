//! End-to-end checks through the public API.

use chrono::{Duration, Utc};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;

use infetech_site::analytics::MemoryAnalytics;
use infetech_site::auth::AuthGate;
use infetech_site::geo::{GeoLocator, Location, LocationSource};
use infetech_site::lead_form::{Captcha, FormConfig, FormError, LeadFormWidget, LeadSubmission};
use infetech_site::models::{Campaign, Lead};
use infetech_site::rules::{location_headline, ContentSource, RuleEngine};
use infetech_site::signals::Signals;
use infetech_site::storage::Storage;
use infetech_site::store::RecordStore;

#[test]
fn add_grows_store_by_one_with_unique_ids() {
    let storage = Storage::temporary().unwrap();
    let mut store = RecordStore::<Campaign>::open(storage.clone()).unwrap();

    for i in 0..25 {
        let before = store.load().unwrap().len();
        let added = store
            .add(Campaign {
                name: format!("Campaign {}", i),
                ..Default::default()
            })
            .unwrap();

        let reloaded = store.load().unwrap();
        assert_eq!(reloaded.len(), before + 1);
        assert_eq!(reloaded.iter().filter(|c| c.id == added.id).count(), 1);
    }

    let ids: HashSet<String> = store.all().iter().map(|c| c.id.clone()).collect();
    assert_eq!(ids.len(), 25);
}

#[test]
fn update_twice_equals_update_once() {
    let storage = Storage::temporary().unwrap();
    let mut store = RecordStore::<Lead>::open(storage.clone()).unwrap();
    let lead = store
        .add(Lead {
            name: "Asha".to_string(),
            email: "asha@example.com".to_string(),
            ..Default::default()
        })
        .unwrap();

    let patch = json!({"status": "contacted", "tags": ["hot"], "budget": "1L+"});
    store.update(&lead.id, &patch).unwrap();
    let once = RecordStore::<Lead>::open(storage.clone()).unwrap().get(&lead.id).cloned();
    store.update(&lead.id, &patch).unwrap();
    let twice = RecordStore::<Lead>::open(storage).unwrap().get(&lead.id).cloned();

    assert!(once.is_some());
    assert_eq!(once, twice);
}

#[test]
fn remove_then_get_is_not_found() {
    let mut store = RecordStore::<Lead>::open(Storage::temporary().unwrap()).unwrap();
    let a = store.add(Lead { name: "A".to_string(), ..Default::default() }).unwrap();
    store.add(Lead { name: "B".to_string(), ..Default::default() }).unwrap();

    assert!(store.remove(&a.id).unwrap());
    assert!(store.get(&a.id).is_none());

    let len = store.len();
    assert!(!store.remove("lead_0_doesnotex").unwrap());
    assert_eq!(store.len(), len);
}

#[test]
fn url_headline_beats_location() {
    let location = Location {
        city: "Mumbai".to_string(),
        state: "Maharashtra".to_string(),
        country: "India".to_string(),
        isp: "Jio".to_string(),
        source: LocationSource::Table,
    };
    let signals = Signals::from_query("headline=Rank%20Higher%20Today&city=pune").with_location(Some(location));

    let content = RuleEngine::default().resolve(&signals);
    assert_eq!(content.source, ContentSource::Url);
    assert_eq!(content.headline, "Rank Higher Today");
}

#[test]
fn unmapped_city_uses_template() {
    assert_eq!(location_headline("Testville", "SEO"), "SEO Services in Testville");
}

#[tokio::test]
async fn ip_ranges_resolve_known_cities() {
    let geo = GeoLocator::new().fallback_to_default(false);

    let mumbai = geo.resolve("103.21.244.5").await.unwrap().unwrap();
    assert_eq!(mumbai.city, "Mumbai");

    let google = geo.resolve("8.8.8.8").await.unwrap().unwrap();
    assert_eq!(google.city, "Mountain View");

    assert!(geo.resolve("1.2.3.4").await.unwrap().is_none());
}

fn jo(answer: &str) -> LeadSubmission {
    LeadSubmission {
        name: "Jo".to_string(),
        email: "jo@example.com".to_string(),
        message: "Need a quote for services".to_string(),
        captcha_answer: Some(answer.to_string()),
        ..Default::default()
    }
}

#[test]
fn captcha_only_accepts_the_sum() {
    let storage = Storage::temporary().unwrap();
    let mut widget = LeadFormWidget::new(storage.clone(), FormConfig::default());
    widget.set_captcha(Captcha::with_operands(3, 4));

    for wrong in ["6", "8", "", "seven", "-7"] {
        let err = widget.submit(jo(wrong), Utc::now()).unwrap_err();
        assert!(matches!(err, FormError::Captcha));
        assert!(err.to_string().contains("Security check failed"));
    }
    assert!(RecordStore::<Lead>::open(storage.clone()).unwrap().is_empty());

    widget.submit(jo("7"), Utc::now()).unwrap();
    assert_eq!(RecordStore::<Lead>::open(storage).unwrap().len(), 1);
}

#[test]
fn session_ttl_is_24_hours() {
    let storage = Storage::temporary().unwrap();
    let auth = AuthGate::new(storage, "test-secret");
    auth.seed_default_admin("admin@infetech.com", "admin123").unwrap();
    let now = Utc::now();

    auth.login("admin@infetech.com", "admin123", now - Duration::hours(1)).unwrap();
    assert!(auth.check_auth(now));
    assert!(auth.visibility(now).admin_content);

    auth.login("admin@infetech.com", "admin123", now - Duration::hours(25)).unwrap();
    assert!(!auth.check_auth(now));
    let visibility = auth.visibility(now);
    assert!(visibility.login_form);
    assert!(!visibility.admin_content);
}

#[test]
fn lead_form_submission_end_to_end() {
    let storage = Storage::temporary().unwrap();
    let analytics = Arc::new(MemoryAnalytics::new());
    let mut widget = LeadFormWidget::new(storage.clone(), FormConfig::default()).with_analytics(analytics.clone());
    widget.set_captcha(Captcha::with_operands(3, 4));

    let before = Utc::now();
    let outcome = widget.submit(jo("7"), Utc::now()).unwrap();

    let leads = RecordStore::<Lead>::open(storage).unwrap();
    assert_eq!(leads.len(), 1);
    let stored = &leads.all()[0];
    assert_eq!(stored, &outcome.lead);
    assert_eq!(stored.name, "Jo");
    assert_eq!(stored.email, "jo@example.com");
    assert_eq!(stored.message, "Need a quote for services");
    assert!(stored.id.starts_with("lead_"));
    assert!(stored.created_at.unwrap() >= before - Duration::seconds(1));
    assert_eq!(analytics.names(), vec!["form_submit", "generate_lead"]);
}
