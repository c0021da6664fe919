//! Configurable lead-capture form: rendering, validation, math captcha,
//! submit throttling and persistence into the lead store.
//!
//! The captcha and throttle live in memory on the widget. They deter casual
//! spam only and reset whenever a new widget is built. A server hands out one
//! widget per page load through `FormRegistry`.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::analytics::{AnalyticsEvent, AnalyticsSink};
use crate::models::{Lead, LeadStatus};
use crate::signals::Attribution;
use crate::storage::{Storage, StorageError};
use crate::store::{RecordStore, StoreError};
use crate::validation::{
    escape_html, sanitize, validate_email, validate_message, validate_name, validate_phone,
    ValidationError,
};

pub const CSRF_TOKEN_KEY: &str = "csrfToken";
pub const RESUBMIT_INTERVAL_MS: i64 = 5_000;
pub const BANNER_DISMISS_MS: u64 = 5_000;
pub const FORM_TTL_SECS: i64 = 60 * 60;
pub const MAX_OPEN_FORMS: usize = 10_000;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FormField {
    Name,
    Email,
    Phone,
    Company,
    Service,
    Message,
}

impl FormField {
    fn label(&self) -> &'static str {
        match self {
            FormField::Name => "Full Name",
            FormField::Email => "Email Address",
            FormField::Phone => "Phone Number",
            FormField::Company => "Company",
            FormField::Service => "Service Interested In",
            FormField::Message => "Message",
        }
    }

    fn key(&self) -> &'static str {
        match self {
            FormField::Name => "name",
            FormField::Email => "email",
            FormField::Phone => "phone",
            FormField::Company => "company",
            FormField::Service => "service",
            FormField::Message => "message",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FormTheme {
    #[default]
    Light,
    Dark,
    Minimal,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase", default)]
pub struct FormConfig {
    pub form_id: String,
    pub fields: Vec<FormField>,
    pub required: Vec<FormField>,
    pub theme: FormTheme,
    pub captcha: bool,
    pub submit_label: String,
    pub services: Vec<String>,
}

impl Default for FormConfig {
    fn default() -> Self {
        Self {
            form_id: "leadForm".to_string(),
            fields: vec![
                FormField::Name,
                FormField::Email,
                FormField::Phone,
                FormField::Service,
                FormField::Message,
            ],
            required: vec![FormField::Name, FormField::Email, FormField::Message],
            theme: FormTheme::Light,
            captcha: true,
            submit_label: "Get Free Consultation".to_string(),
            services: ["SEO", "PPC", "Social Media Marketing", "Web Design", "Content Marketing"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl FormConfig {
    fn shows(&self, field: FormField) -> bool {
        self.fields.contains(&field)
    }

    fn requires(&self, field: FormField) -> bool {
        self.required.contains(&field)
    }
}

/// Two operands in 1..=10; the answer is their sum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Captcha {
    a: u8,
    b: u8,
}

impl Captcha {
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        Self {
            a: rng.gen_range(1..=10),
            b: rng.gen_range(1..=10),
        }
    }

    pub fn with_operands(a: u8, b: u8) -> Self {
        Self { a, b }
    }

    pub fn question(&self) -> String {
        format!("What is {} + {}?", self.a, self.b)
    }

    pub fn expected(&self) -> u32 {
        self.a as u32 + self.b as u32
    }

    pub fn check(&self, answer: &str) -> bool {
        answer.trim().parse::<u32>().ok() == Some(self.expected())
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct LeadSubmission {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub company: String,
    pub service: String,
    pub message: String,
    pub budget: String,
    pub timeline: String,
    pub captcha_answer: Option<String>,
    pub csrf_token: Option<String>,
}

#[derive(Debug, Error)]
pub enum FormError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Security check failed. Please solve the math question correctly.")]
    Captcha,

    #[error("Please wait {wait_secs} seconds before submitting again")]
    RateLimited { wait_secs: i64 },

    #[error("Your session has expired. Please reload the page and try again.")]
    Csrf,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl FormError {
    pub fn banner(&self) -> Banner {
        let message = match self {
            FormError::Store(_) => {
                "Sorry, something went wrong saving your request. Please try again.".to_string()
            }
            other => other.to_string(),
        };
        Banner {
            kind: BannerKind::Error,
            message,
            dismiss_after_ms: BANNER_DISMISS_MS,
        }
    }
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BannerKind {
    Success,
    Error,
}

/// Transient notice shown above the form.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Banner {
    pub kind: BannerKind,
    pub message: String,
    pub dismiss_after_ms: u64,
}

#[derive(Serialize, Debug, Clone)]
pub struct SubmitOutcome {
    pub lead: Lead,
    pub banner: Banner,
    /// Question for the next submission from the same form.
    pub next_captcha: Option<String>,
}

pub struct LeadFormWidget {
    config: FormConfig,
    storage: Storage,
    captcha: Option<Captcha>,
    csrf_token: Option<String>,
    last_submit: Option<DateTime<Utc>>,
    attribution: Option<Attribution>,
    analytics: Option<Arc<dyn AnalyticsSink>>,
}

impl LeadFormWidget {
    pub fn new(storage: Storage, config: FormConfig) -> Self {
        let captcha = config.captcha.then(Captcha::generate);
        Self {
            config,
            storage,
            captcha,
            csrf_token: None,
            last_submit: None,
            attribution: None,
            analytics: None,
        }
    }

    pub fn with_analytics(mut self, analytics: Arc<dyn AnalyticsSink>) -> Self {
        self.analytics = Some(analytics);
        self
    }

    /// Attribute submitted leads to the visit's UTM parameters.
    pub fn with_attribution(mut self, attribution: Option<Attribution>) -> Self {
        self.attribution = attribution;
        self
    }

    pub fn set_attribution(&mut self, attribution: Option<Attribution>) {
        self.attribution = attribution;
    }

    /// Require submissions to echo `token`, which is embedded in the markup.
    pub fn with_form_token(mut self, token: String) -> Self {
        self.csrf_token = Some(token);
        self
    }

    /// Require submissions to echo the session's CSRF token, creating it if needed.
    pub fn with_csrf(mut self) -> Result<Self, StorageError> {
        self.csrf_token = Some(session_csrf_token(&self.storage)?);
        Ok(self)
    }

    pub fn config(&self) -> &FormConfig {
        &self.config
    }

    pub fn captcha(&self) -> Option<&Captcha> {
        self.captcha.as_ref()
    }

    pub fn set_captcha(&mut self, captcha: Captcha) {
        self.captcha = Some(captcha);
    }

    pub fn csrf_token(&self) -> Option<&str> {
        self.csrf_token.as_deref()
    }

    pub fn render(&self) -> String {
        let c = &self.config;
        let form_id = escape_html(&c.form_id);
        let mut html = String::new();
        let _ = writeln!(
            html,
            "<form id=\"{}\" class=\"lead-form lead-form--{}\" novalidate>",
            form_id,
            theme_class(c.theme)
        );
        html.push_str("  <div class=\"form-banner\" role=\"alert\" hidden></div>\n");

        for field in &c.fields {
            let required = if c.requires(*field) { " required" } else { "" };
            let star = if c.requires(*field) { " *" } else { "" };
            let key = field.key();
            let _ = writeln!(html, "  <div class=\"form-group\">");
            let _ = writeln!(html, "    <label for=\"{}-{}\">{}{}</label>", form_id, key, field.label(), star);
            match field {
                FormField::Service => {
                    let _ = writeln!(html, "    <select id=\"{}-{}\" name=\"{}\"{}>", form_id, key, key, required);
                    html.push_str("      <option value=\"\">Select a service</option>\n");
                    for service in &c.services {
                        let s = escape_html(service);
                        let _ = writeln!(html, "      <option value=\"{}\">{}</option>", s, s);
                    }
                    html.push_str("    </select>\n");
                }
                FormField::Message => {
                    let _ = writeln!(
                        html,
                        "    <textarea id=\"{}-{}\" name=\"{}\" rows=\"4\" maxlength=\"2000\"{}></textarea>",
                        form_id, key, key, required
                    );
                }
                _ => {
                    let input_type = match field {
                        FormField::Email => "email",
                        FormField::Phone => "tel",
                        _ => "text",
                    };
                    let _ = writeln!(
                        html,
                        "    <input type=\"{}\" id=\"{}-{}\" name=\"{}\"{}>",
                        input_type, form_id, key, key, required
                    );
                }
            }
            html.push_str("  </div>\n");
        }

        if let Some(captcha) = &self.captcha {
            let _ = writeln!(
                html,
                "  <div class=\"form-group captcha\">\n    <label for=\"{}-captcha\">{}</label>\n    <input type=\"number\" id=\"{}-captcha\" name=\"captchaAnswer\" required>\n  </div>",
                form_id,
                captcha.question(),
                form_id
            );
        }
        if let Some(token) = &self.csrf_token {
            let _ = writeln!(html, "  <input type=\"hidden\" name=\"csrfToken\" value=\"{}\">", escape_html(token));
        }
        let _ = writeln!(
            html,
            "  <button type=\"submit\" class=\"btn btn-primary\">{}</button>\n</form>",
            escape_html(&c.submit_label)
        );
        html
    }

    /// Validate, check the captcha, persist the lead and fire analytics.
    pub fn submit(&mut self, submission: LeadSubmission, now: DateTime<Utc>) -> Result<SubmitOutcome, FormError> {
        if let Some(last) = self.last_submit {
            let elapsed = now.timestamp_millis() - last.timestamp_millis();
            if elapsed < RESUBMIT_INTERVAL_MS {
                let wait_secs = ((RESUBMIT_INTERVAL_MS - elapsed) + 999) / 1000;
                return Err(FormError::RateLimited { wait_secs });
            }
        }

        if let Some(expected) = &self.csrf_token {
            if submission.csrf_token.as_deref() != Some(expected.as_str()) {
                warn!(form = %self.config.form_id, "csrf token mismatch");
                return Err(FormError::Csrf);
            }
        }

        if let Err(e) = self.validate(&submission) {
            self.track("form_validation_error", json!({ "form_id": self.config.form_id, "error": e.to_string() }));
            return Err(e.into());
        }

        if let Some(captcha) = &self.captcha {
            let answer = submission.captcha_answer.as_deref().unwrap_or("");
            if !captcha.check(answer) {
                warn!(form = %self.config.form_id, "captcha failed");
                return Err(FormError::Captcha);
            }
        }

        let source = self
            .attribution
            .as_ref()
            .map(|a| a.source.clone())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "website".to_string());
        let mut tags = vec![];
        if let Some(a) = &self.attribution {
            if !a.campaign.is_empty() {
                tags.push(format!("campaign:{}", a.campaign));
            }
            if !a.keyword.is_empty() {
                tags.push(format!("keyword:{}", a.keyword));
            }
        }

        let lead = Lead {
            name: sanitize(&submission.name),
            email: sanitize(&submission.email).to_lowercase(),
            phone: sanitize(&submission.phone),
            company: sanitize(&submission.company),
            service: sanitize(&submission.service),
            source: source.clone(),
            status: LeadStatus::New,
            budget: sanitize(&submission.budget),
            timeline: sanitize(&submission.timeline),
            message: submission.message.trim().to_string(),
            tags,
            campaign_id: self
                .attribution
                .as_ref()
                .map(|a| a.campaign.clone())
                .filter(|c| !c.is_empty()),
            ..Default::default()
        };

        let mut leads = RecordStore::<Lead>::open(self.storage.clone())?;
        let lead = leads.add_at(lead, now)?;
        self.last_submit = Some(now);
        info!(form = %self.config.form_id, lead_id = %lead.id, source = %source, "lead captured");

        self.track("form_submit", json!({ "form_id": self.config.form_id, "service": lead.service }));
        self.track("generate_lead", json!({ "lead_id": lead.id, "source": lead.source, "service": lead.service }));

        // Reset for the next visitor interaction
        if self.config.captcha {
            self.captcha = Some(Captcha::generate());
        }

        Ok(SubmitOutcome {
            lead,
            banner: Banner {
                kind: BannerKind::Success,
                message: "Thank you! We'll get back to you within 24 hours.".to_string(),
                dismiss_after_ms: BANNER_DISMISS_MS,
            },
            next_captcha: self.captcha.map(|c| c.question()),
        })
    }

    fn validate(&self, s: &LeadSubmission) -> Result<(), ValidationError> {
        self.check_field(FormField::Name, &s.name, validate_name)?;
        self.check_field(FormField::Email, &s.email, validate_email)?;
        self.check_field(FormField::Phone, &s.phone, validate_phone)?;
        self.check_field(FormField::Company, &s.company, accept_any)?;
        self.check_field(FormField::Service, &s.service, accept_any)?;
        self.check_field(FormField::Message, &s.message, validate_message)?;
        Ok(())
    }

    /// Hidden fields are ignored; optional fields are only checked when filled in.
    fn check_field(
        &self,
        field: FormField,
        value: &str,
        rule: fn(&str) -> Result<(), ValidationError>,
    ) -> Result<(), ValidationError> {
        if !self.config.shows(field) {
            return Ok(());
        }
        if value.trim().is_empty() {
            return if self.config.requires(field) {
                Err(ValidationError::Required(field.label()))
            } else {
                Ok(())
            };
        }
        rule(value)
    }

    fn track(&self, name: &str, params: serde_json::Value) {
        if let Some(analytics) = &self.analytics {
            analytics.track(AnalyticsEvent::new(name, params));
        }
    }
}

struct OpenForm {
    widget: LeadFormWidget,
    issued_at: DateTime<Utc>,
}

/// Widgets for rendered forms, keyed by the token embedded in each one.
/// Every page load gets its own captcha and resubmit throttle.
pub struct FormRegistry {
    storage: Storage,
    config: FormConfig,
    analytics: Option<Arc<dyn AnalyticsSink>>,
    open: Mutex<HashMap<String, OpenForm>>,
}

impl FormRegistry {
    pub fn new(storage: Storage, config: FormConfig) -> Self {
        Self {
            storage,
            config,
            analytics: None,
            open: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_analytics(mut self, analytics: Arc<dyn AnalyticsSink>) -> Self {
        self.analytics = Some(analytics);
        self
    }

    pub fn config(&self) -> &FormConfig {
        &self.config
    }

    /// Build a widget for one page load. Returns its token and markup.
    pub fn open(&self, now: DateTime<Utc>) -> (String, String) {
        let token = Uuid::new_v4().simple().to_string();
        let mut widget = LeadFormWidget::new(self.storage.clone(), self.config.clone())
            .with_form_token(token.clone());
        if let Some(analytics) = &self.analytics {
            widget = widget.with_analytics(analytics.clone());
        }
        let html = widget.render();

        let mut open = self.lock();
        prune_expired(&mut open, now);
        if open.len() >= MAX_OPEN_FORMS {
            let oldest = open
                .iter()
                .min_by_key(|(_, form)| form.issued_at)
                .map(|(token, _)| token.clone());
            if let Some(oldest) = oldest {
                open.remove(&oldest);
            }
        }
        open.insert(token.clone(), OpenForm { widget, issued_at: now });
        (token, html)
    }

    /// Hand the submission to the widget that rendered its token. Unknown or
    /// expired tokens fail the CSRF check.
    pub fn submit(
        &self,
        submission: LeadSubmission,
        attribution: Option<Attribution>,
        now: DateTime<Utc>,
    ) -> Result<SubmitOutcome, FormError> {
        let token = submission.csrf_token.clone().unwrap_or_default();
        let mut open = self.lock();
        prune_expired(&mut open, now);
        let Some(form) = open.get_mut(&token) else {
            warn!(form = %self.config.form_id, "submission for unknown or expired form");
            return Err(FormError::Csrf);
        };
        form.widget.set_attribution(attribution);
        form.widget.submit(submission, now)
    }

    pub fn captcha(&self, token: &str) -> Option<Captcha> {
        self.lock().get(token).and_then(|form| form.widget.captcha().copied())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, OpenForm>> {
        self.open.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn prune_expired(open: &mut HashMap<String, OpenForm>, now: DateTime<Utc>) {
    let cutoff = now - Duration::seconds(FORM_TTL_SECS);
    open.retain(|_, form| form.issued_at > cutoff);
}

/// The CSRF token for this session, created on first use.
pub fn session_csrf_token(storage: &Storage) -> Result<String, StorageError> {
    if let Some(token) = storage.get_session_json::<String>(CSRF_TOKEN_KEY).ok().flatten() {
        return Ok(token);
    }
    let token = Uuid::new_v4().simple().to_string();
    storage.set_session_json(CSRF_TOKEN_KEY, &token)?;
    Ok(token)
}

fn accept_any(_: &str) -> Result<(), ValidationError> {
    Ok(())
}

fn theme_class(theme: FormTheme) -> &'static str {
    match theme {
        FormTheme::Light => "light",
        FormTheme::Dark => "dark",
        FormTheme::Minimal => "minimal",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::MemoryAnalytics;

    fn submission(answer: &str) -> LeadSubmission {
        LeadSubmission {
            name: "Jo".to_string(),
            email: "jo@example.com".to_string(),
            message: "Need a quote for services".to_string(),
            captcha_answer: Some(answer.to_string()),
            ..Default::default()
        }
    }

    fn widget(storage: &Storage) -> LeadFormWidget {
        let mut widget = LeadFormWidget::new(storage.clone(), FormConfig::default());
        widget.set_captcha(Captcha::with_operands(3, 4));
        widget
    }

    #[test]
    fn test_captcha_only_accepts_sum() {
        let captcha = Captcha::with_operands(3, 4);
        assert!(captcha.check("7"));
        assert!(captcha.check(" 7 "));
        assert!(!captcha.check("8"));
        assert!(!captcha.check("seven"));
        assert_eq!(captcha.question(), "What is 3 + 4?");
    }

    #[test]
    fn test_generated_operands_in_range() {
        for _ in 0..100 {
            let captcha = Captcha::generate();
            assert!((2..=20).contains(&captcha.expected()));
        }
    }

    #[test]
    fn test_wrong_captcha_persists_nothing() {
        let storage = Storage::temporary().unwrap();
        let mut widget = widget(&storage);

        let err = widget.submit(submission("8"), Utc::now()).unwrap_err();
        assert!(matches!(err, FormError::Captcha));
        assert!(err.banner().message.contains("Security check"));
        assert!(RecordStore::<Lead>::open(storage).unwrap().is_empty());
    }

    #[test]
    fn test_successful_submission_creates_lead_and_events() {
        let storage = Storage::temporary().unwrap();
        let analytics = Arc::new(MemoryAnalytics::new());
        let mut widget = widget(&storage).with_analytics(analytics.clone());

        let outcome = widget.submit(submission("7"), Utc::now()).unwrap();
        assert_eq!(outcome.banner.kind, BannerKind::Success);
        assert!(outcome.lead.id.starts_with("lead_"));
        assert!(outcome.lead.created_at.is_some());
        assert_eq!(outcome.lead.source, "website");

        let leads = RecordStore::<Lead>::open(storage).unwrap();
        assert_eq!(leads.len(), 1);
        assert_eq!(leads.all()[0].name, "Jo");
        assert_eq!(leads.all()[0].email, "jo@example.com");
        assert_eq!(analytics.names(), vec!["form_submit", "generate_lead"]);
    }

    #[test]
    fn test_resubmission_throttled_for_five_seconds() {
        let storage = Storage::temporary().unwrap();
        let mut widget = widget(&storage);
        let now = Utc::now();
        widget.submit(submission("7"), now).unwrap();

        widget.set_captcha(Captcha::with_operands(3, 4));
        let err = widget.submit(submission("7"), now + Duration::seconds(2)).unwrap_err();
        assert!(matches!(err, FormError::RateLimited { wait_secs: 3 }));

        widget.set_captcha(Captcha::with_operands(3, 4));
        assert!(widget.submit(submission("7"), now + Duration::seconds(5)).is_ok());
    }

    #[test]
    fn test_validation_blocks_submission() {
        let storage = Storage::temporary().unwrap();
        let analytics = Arc::new(MemoryAnalytics::new());
        let mut widget = widget(&storage).with_analytics(analytics.clone());

        let mut bad = submission("7");
        bad.message = "<script>alert(1)</script> hello there".to_string();
        assert!(matches!(
            widget.submit(bad, Utc::now()),
            Err(FormError::Validation(ValidationError::UnsafeContent))
        ));

        let mut missing = submission("7");
        missing.email.clear();
        assert!(matches!(
            widget.submit(missing, Utc::now()),
            Err(FormError::Validation(ValidationError::Required("Email Address")))
        ));
        assert_eq!(analytics.names(), vec!["form_validation_error", "form_validation_error"]);
    }

    #[test]
    fn test_optional_phone_validated_only_when_present() {
        let storage = Storage::temporary().unwrap();
        let mut widget = widget(&storage);
        let mut s = submission("7");
        s.phone = "123".to_string();
        assert!(matches!(
            widget.submit(s, Utc::now()),
            Err(FormError::Validation(ValidationError::InvalidPhone))
        ));
    }

    #[test]
    fn test_csrf_required_when_enabled() {
        let storage = Storage::temporary().unwrap();
        let mut widget = widget(&storage).with_csrf().unwrap();
        let token = widget.csrf_token().unwrap().to_string();
        assert_eq!(session_csrf_token(&storage).unwrap(), token);

        assert!(matches!(widget.submit(submission("7"), Utc::now()), Err(FormError::Csrf)));

        let mut s = submission("7");
        s.csrf_token = Some(token);
        assert!(widget.submit(s, Utc::now()).is_ok());
    }

    #[test]
    fn test_attribution_sets_source_and_tags() {
        let storage = Storage::temporary().unwrap();
        let attribution = crate::signals::UrlParams::parse("utm_source=google&utm_campaign=diwali&kw=seo")
            .attribution();
        let mut widget = widget(&storage).with_attribution(attribution);

        let lead = widget.submit(submission("7"), Utc::now()).unwrap().lead;
        assert_eq!(lead.source, "google");
        assert_eq!(lead.campaign_id.as_deref(), Some("diwali"));
        assert_eq!(lead.tags, vec!["campaign:diwali", "keyword:seo"]);
    }

    #[test]
    fn test_render_includes_configured_fields() {
        let storage = Storage::temporary().unwrap();
        let config = FormConfig {
            fields: vec![FormField::Name, FormField::Email],
            required: vec![FormField::Email],
            theme: FormTheme::Dark,
            ..Default::default()
        };
        let mut widget = LeadFormWidget::new(storage, config);
        widget.set_captcha(Captcha::with_operands(2, 5));
        let html = widget.render();

        assert!(html.contains("lead-form--dark"));
        assert!(html.contains("name=\"name\">"));
        assert!(html.contains("name=\"email\" required>"));
        assert!(!html.contains("name=\"message\""));
        assert!(html.contains("What is 2 + 5?"));
    }

    #[test]
    fn test_form_id_escaped_in_every_attribute() {
        let storage = Storage::temporary().unwrap();
        let config = FormConfig {
            form_id: "x\"><script>".to_string(),
            ..Default::default()
        };
        let html = LeadFormWidget::new(storage, config).render();

        assert!(!html.contains("<script>"));
        assert!(html.contains("for=\"x&quot;&gt;&lt;script&gt;-name\""));
        assert!(html.contains("id=\"x&quot;&gt;&lt;script&gt;-captcha\""));
    }

    #[test]
    fn test_corrupt_lead_store_is_left_untouched() {
        let storage = Storage::temporary().unwrap();
        storage.set_item(crate::models::LEADS_KEY, "{oops").unwrap();
        let mut widget = widget(&storage);

        let err = widget.submit(submission("7"), Utc::now()).unwrap_err();
        assert!(matches!(err, FormError::Store(StoreError::Corrupt { .. })));
        assert!(err.banner().message.starts_with("Sorry"));
        assert_eq!(
            storage.get_item(crate::models::LEADS_KEY).unwrap().as_deref(),
            Some("{oops")
        );
    }

    fn from_form(token: &str, answer: u32) -> LeadSubmission {
        LeadSubmission {
            csrf_token: Some(token.to_string()),
            ..submission(&answer.to_string())
        }
    }

    #[test]
    fn test_registry_keeps_visitors_apart() {
        let storage = Storage::temporary().unwrap();
        let registry = FormRegistry::new(storage.clone(), FormConfig::default());
        let now = Utc::now();

        let (a, html_a) = registry.open(now);
        assert!(html_a.contains(&format!("value=\"{}\"", a)));
        let answer_a = registry.captcha(&a).unwrap().expected();
        let (b, _) = registry.open(now);
        let answer_b = registry.captcha(&b).unwrap().expected();
        let (c, _) = registry.open(now);
        let answer_c = registry.captcha(&c).unwrap().expected();
        assert_eq!(registry.len(), 3);

        // Later page loads leave A's question alone
        let outcome = registry.submit(from_form(&a, answer_a), None, now).unwrap();
        assert!(outcome.next_captcha.is_some());
        // A's throttle does not hold back anyone else
        assert!(registry.submit(from_form(&b, answer_b + 1), None, now).is_err());
        assert!(registry.submit(from_form(&b, answer_b), None, now).is_ok());
        assert!(registry
            .submit(from_form(&c, answer_c), None, now + Duration::seconds(1))
            .is_ok());

        let next_a = registry.captcha(&a).unwrap().expected();
        assert!(matches!(
            registry.submit(from_form(&a, next_a), None, now + Duration::seconds(2)),
            Err(FormError::RateLimited { .. })
        ));
        assert_eq!(RecordStore::<Lead>::open(storage).unwrap().len(), 3);
    }

    #[test]
    fn test_registry_rejects_unknown_and_expired_tokens() {
        let storage = Storage::temporary().unwrap();
        let registry = FormRegistry::new(storage, FormConfig::default());
        let now = Utc::now();
        let (token, _) = registry.open(now);
        let answer = registry.captcha(&token).unwrap().expected();

        assert!(matches!(
            registry.submit(from_form("forged", answer), None, now),
            Err(FormError::Csrf)
        ));
        assert!(matches!(
            registry.submit(from_form(&token, answer), None, now + Duration::seconds(FORM_TTL_SECS)),
            Err(FormError::Csrf)
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_registry_attributes_leads() {
        let storage = Storage::temporary().unwrap();
        let registry = FormRegistry::new(storage, FormConfig::default());
        let now = Utc::now();
        let (token, _) = registry.open(now);
        let answer = registry.captcha(&token).unwrap().expected();

        let attribution = crate::signals::UrlParams::parse("utm_source=facebook").attribution();
        let lead = registry.submit(from_form(&token, answer), attribution, now).unwrap().lead;
        assert_eq!(lead.source, "facebook");
    }
}
