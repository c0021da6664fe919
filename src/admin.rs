//! Admin screens: one `PageController` per record kind, plus the dashboard.
//!
//! A controller owns the in-memory list for its screen, renders it to an
//! HTML fragment and re-renders after every mutation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, info};

use crate::models::{Campaign, CampaignStatus, ImageRecord, Lead, LeadStatus};
use crate::storage::Storage;
use crate::store::{matches_query, RecordStore, StoreError};
use crate::transfer::{self, CsvRecord, ImportReport, TransferError};
use crate::validation::escape_html;

const SKELETON_CARDS: usize = 3;
const RECENT_LEADS: usize = 5;

#[derive(Debug, Error)]
pub enum AdminError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error("background load failed: {0}")]
    Load(#[from] tokio::task::JoinError),
}

pub trait RecordFilter<T>: Default + Clone + Send + Sync {
    fn matches(&self, record: &T) -> bool;
}

/// How a record kind appears on its admin screen.
pub trait CardView: CsvRecord {
    type Filter: RecordFilter<Self>;

    /// Plural screen name, also used in the empty state.
    const SCREEN: &'static str;
    const CONTAINER_ID: &'static str;
    const EMPTY_CTA: &'static str;

    fn card(&self) -> String;

    /// Values that pre-fill the shared edit modal, keyed by field name.
    fn form_values(&self) -> BTreeMap<&'static str, String>;

    fn wrap(cards: &str) -> String {
        format!(
            "<div id=\"{}\" class=\"record-grid\">{}</div>",
            Self::CONTAINER_ID,
            cards
        )
    }
}

pub struct PageController<T: CardView> {
    storage: Storage,
    store: Option<RecordStore<T>>,
    filter: T::Filter,
    html: String,
}

impl<T: CardView> PageController<T> {
    /// A controller showing the loading skeleton until `init` runs.
    pub fn new(storage: Storage) -> Self {
        Self {
            storage,
            store: None,
            filter: <T::Filter as Default>::default(),
            html: Self::skeleton(),
        }
    }

    pub fn skeleton() -> String {
        skeleton_html(T::SCREEN)
    }

    /// Load the records off the async runtime, then render.
    pub async fn init(&mut self) -> Result<&str, AdminError> {
        let storage = self.storage.clone();
        let store = tokio::task::spawn_blocking(move || RecordStore::<T>::open(storage)).await??;
        debug!(screen = T::SCREEN, records = store.len(), "admin screen loaded");
        self.store = Some(store);
        self.render();
        Ok(self.html.as_str())
    }

    pub fn html(&self) -> &str {
        &self.html
    }

    pub fn records(&self) -> &[T] {
        self.store.as_ref().map(|s| s.all()).unwrap_or(&[])
    }

    pub fn filter(&self) -> &T::Filter {
        &self.filter
    }

    pub fn set_filter(&mut self, filter: T::Filter) -> &str {
        self.filter = filter;
        self.render();
        &self.html
    }

    /// Records passing the current filter, in stored order.
    pub fn visible(&self) -> Vec<&T> {
        self.records()
            .iter()
            .filter(|r| self.filter.matches(r))
            .collect()
    }

    pub fn add(&mut self, record: T) -> Result<T, AdminError> {
        let added = self.store_mut()?.add(record)?;
        self.render();
        Ok(added)
    }

    pub fn edit_form(&self, id: &str) -> Option<BTreeMap<&'static str, String>> {
        let record = self.store.as_ref()?.get(id)?;
        let mut values = record.form_values();
        values.insert("id", record.id().to_string());
        Some(values)
    }

    pub fn save_edit(&mut self, id: &str, patch: &Value) -> Result<T, AdminError> {
        let updated = self.store_mut()?.update(id, patch)?;
        self.render();
        Ok(updated)
    }

    /// Remove `id` once `confirm` approves. Returns false when declined.
    pub fn delete<F>(&mut self, id: &str, confirm: F) -> Result<bool, AdminError>
    where
        F: FnOnce(&T) -> bool,
    {
        let store = self.store_mut()?;
        let record = store.get(id).cloned().ok_or_else(|| StoreError::NotFound {
            kind: T::KIND,
            id: id.to_string(),
        })?;
        if !confirm(&record) {
            debug!(kind = T::KIND, id, "delete cancelled");
            return Ok(false);
        }
        store.remove(id)?;
        info!(kind = T::KIND, id, "record deleted");
        self.render();
        Ok(true)
    }

    pub fn export_csv(&self) -> String {
        transfer::export_csv(self.records())
    }

    pub fn export_json(&self) -> Result<String, AdminError> {
        Ok(transfer::export_json(self.records())?)
    }

    pub fn import_csv(&mut self, text: &str) -> Result<ImportReport, AdminError> {
        let (records, rejected) = transfer::parse_csv::<T>(text)?;
        self.import(records, rejected)
    }

    pub fn import_json(&mut self, text: &str) -> Result<ImportReport, AdminError> {
        let (records, rejected) = transfer::parse_json::<T>(text)?;
        self.import(records, rejected)
    }

    fn import(
        &mut self,
        records: Vec<T>,
        rejected: Vec<transfer::ImportRejection>,
    ) -> Result<ImportReport, AdminError> {
        let report = transfer::import_into(self.store_mut()?, records, rejected)?;
        self.render();
        Ok(report)
    }

    /// The loaded store, opened on first use. Unreadable data is an error so
    /// a write never replaces it.
    fn store_mut(&mut self) -> Result<&mut RecordStore<T>, StoreError> {
        let store = match self.store.take() {
            Some(store) => store,
            None => RecordStore::open(self.storage.clone())?,
        };
        Ok(self.store.insert(store))
    }

    fn render(&mut self) {
        self.html = match &self.store {
            None => Self::skeleton(),
            Some(store) if store.is_empty() => empty_state::<T>(),
            Some(store) => {
                let cards: String = store
                    .all()
                    .iter()
                    .filter(|r| self.filter.matches(r))
                    .map(|r| r.card())
                    .collect();
                if cards.is_empty() {
                    format!(
                        "<div class=\"no-results\">No {} match the current filters.</div>",
                        T::SCREEN
                    )
                } else {
                    T::wrap(&cards)
                }
            }
        };
    }
}

fn skeleton_html(screen: &str) -> String {
    let card = "<div class=\"skeleton-card\"><div class=\"skeleton-line\"></div>\
                <div class=\"skeleton-line short\"></div></div>";
    format!(
        "<div class=\"loading-skeleton\" data-screen=\"{}\">{}</div>",
        screen,
        card.repeat(SKELETON_CARDS)
    )
}

fn empty_state<T: CardView>() -> String {
    format!(
        "<div class=\"empty-state\"><h4>No {screen} yet</h4>\
         <button class=\"btn btn-primary\" data-action=\"add\">{cta}</button></div>",
        screen = T::SCREEN,
        cta = T::EMPTY_CTA
    )
}

fn query_matches<T: crate::store::Record>(record: &T, query: &str) -> bool {
    let needle = query.trim().to_lowercase();
    needle.is_empty() || matches_query(record, &needle)
}

fn same(wanted: &Option<String>, actual: &str) -> bool {
    match wanted.as_deref().map(str::trim) {
        None | Some("") => true,
        Some(w) => w.eq_ignore_ascii_case(actual),
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct LeadFilter {
    pub status: Option<LeadStatus>,
    pub source: Option<String>,
    pub service: Option<String>,
    #[serde(alias = "q")]
    pub query: String,
}

impl RecordFilter<Lead> for LeadFilter {
    fn matches(&self, lead: &Lead) -> bool {
        self.status.map_or(true, |s| s == lead.status)
            && same(&self.source, &lead.source)
            && same(&self.service, &lead.service)
            && query_matches(lead, &self.query)
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct CampaignFilter {
    pub status: Option<CampaignStatus>,
    #[serde(alias = "q")]
    pub query: String,
}

impl RecordFilter<Campaign> for CampaignFilter {
    fn matches(&self, campaign: &Campaign) -> bool {
        self.status.map_or(true, |s| s == campaign.status) && query_matches(campaign, &self.query)
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct ImageFilter {
    pub category: Option<String>,
    #[serde(alias = "q")]
    pub query: String,
}

impl RecordFilter<ImageRecord> for ImageFilter {
    fn matches(&self, image: &ImageRecord) -> bool {
        same(&self.category, &image.category) && query_matches(image, &self.query)
    }
}

fn action_buttons(id: &str) -> String {
    format!(
        "<div class=\"card-actions\">\
         <button class=\"btn-edit\" data-action=\"edit\" data-id=\"{id}\">Edit</button>\
         <button class=\"btn-delete\" data-action=\"delete\" data-id=\"{id}\">Delete</button></div>",
        id = escape_html(id)
    )
}

impl CardView for Lead {
    type Filter = LeadFilter;

    const SCREEN: &'static str = "leads";
    const CONTAINER_ID: &'static str = "leadsGrid";
    const EMPTY_CTA: &'static str = "Add your first lead";

    fn card(&self) -> String {
        format!(
            "<div class=\"lead-card\" data-id=\"{id}\"><div class=\"lead-header\"><h5>{name}</h5>\
             <span class=\"status-badge status-{status}\">{label}</span></div>\
             <p class=\"lead-contact\">{email} {phone}</p>\
             <p class=\"lead-meta\">{company} | {service} | {source}</p>{actions}</div>",
            id = escape_html(&self.id),
            name = escape_html(&self.name),
            status = self.status.as_str(),
            label = self.status.label(),
            email = escape_html(&self.email),
            phone = escape_html(&self.phone),
            company = escape_html(&self.company),
            service = escape_html(&self.service),
            source = escape_html(&self.source),
            actions = action_buttons(&self.id),
        )
    }

    fn form_values(&self) -> BTreeMap<&'static str, String> {
        BTreeMap::from([
            ("name", self.name.clone()),
            ("email", self.email.clone()),
            ("phone", self.phone.clone()),
            ("company", self.company.clone()),
            ("service", self.service.clone()),
            ("source", self.source.clone()),
            ("status", self.status.as_str().to_string()),
            ("budget", self.budget.clone()),
            ("timeline", self.timeline.clone()),
            ("message", self.message.clone()),
        ])
    }
}

impl CardView for Campaign {
    type Filter = CampaignFilter;

    const SCREEN: &'static str = "campaigns";
    const CONTAINER_ID: &'static str = "campaignsGrid";
    const EMPTY_CTA: &'static str = "Create a campaign";

    fn card(&self) -> String {
        format!(
            "<div class=\"campaign-card\" data-id=\"{id}\"><h5>{name}</h5>\
             <span class=\"status-badge status-{status}\">{status}</span>\
             <p class=\"campaign-type\">{kind}</p><p class=\"campaign-budget\">{budget:.0}</p>\
             <p class=\"campaign-dates\">{start} - {end}</p>{actions}</div>",
            id = escape_html(&self.id),
            name = escape_html(&self.name),
            status = self.status.as_str(),
            kind = escape_html(&self.campaign_type),
            budget = self.budget,
            start = escape_html(&self.start_date),
            end = escape_html(&self.end_date),
            actions = action_buttons(&self.id),
        )
    }

    fn form_values(&self) -> BTreeMap<&'static str, String> {
        BTreeMap::from([
            ("name", self.name.clone()),
            ("type", self.campaign_type.clone()),
            ("status", self.status.as_str().to_string()),
            ("budget", self.budget.to_string()),
            ("startDate", self.start_date.clone()),
            ("endDate", self.end_date.clone()),
            ("description", self.description.clone()),
            ("targetAudience", self.target_audience.join(", ")),
        ])
    }
}

impl CardView for ImageRecord {
    type Filter = ImageFilter;

    const SCREEN: &'static str = "images";
    const CONTAINER_ID: &'static str = "imagesTableBody";
    const EMPTY_CTA: &'static str = "Upload an image";

    fn card(&self) -> String {
        format!(
            "<tr data-id=\"{id}\"><td>{filename}</td><td>{category}</td>\
             <td>{width}x{height}</td><td>{alt}</td><td>{actions}</td></tr>",
            id = escape_html(&self.id),
            filename = escape_html(&self.filename),
            category = escape_html(&self.category),
            width = self.width,
            height = self.height,
            alt = escape_html(&self.alt),
            actions = action_buttons(&self.id),
        )
    }

    fn form_values(&self) -> BTreeMap<&'static str, String> {
        BTreeMap::from([
            ("filename", self.filename.clone()),
            ("category", self.category.clone()),
            ("alt", self.alt.clone()),
            ("title", self.title.clone()),
            ("width", self.width.to_string()),
            ("height", self.height.to_string()),
            ("seoKeywords", self.seo_keywords.join(", ")),
        ])
    }

    fn wrap(rows: &str) -> String {
        format!(
            "<table class=\"table\"><thead><tr><th>File</th><th>Category</th><th>Size</th>\
             <th>Alt</th><th></th></tr></thead><tbody id=\"{}\">{}</tbody></table>",
            Self::CONTAINER_ID,
            rows
        )
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub total_leads: usize,
    pub leads_by_status: BTreeMap<String, usize>,
    /// Won leads as a percentage of all leads.
    pub conversion_rate: f64,
    pub total_campaigns: usize,
    pub active_campaigns: usize,
    pub total_images: usize,
    pub recent_leads: Vec<Lead>,
}

impl DashboardStats {
    pub fn compute(leads: &[Lead], campaigns: &[Campaign], images: &[ImageRecord]) -> Self {
        let mut leads_by_status: BTreeMap<String, usize> = LeadStatus::ALL
            .iter()
            .map(|s| (s.as_str().to_string(), 0))
            .collect();
        for lead in leads {
            *leads_by_status.entry(lead.status.as_str().to_string()).or_default() += 1;
        }

        let won = leads_by_status.get(LeadStatus::Won.as_str()).copied().unwrap_or(0);
        let conversion_rate = if leads.is_empty() {
            0.0
        } else {
            won as f64 / leads.len() as f64 * 100.0
        };

        let mut recent_leads = leads.to_vec();
        recent_leads.sort_by_key(|l| std::cmp::Reverse(l.created_at));
        recent_leads.truncate(RECENT_LEADS);

        Self {
            total_leads: leads.len(),
            leads_by_status,
            conversion_rate,
            total_campaigns: campaigns.len(),
            active_campaigns: campaigns
                .iter()
                .filter(|c| c.active || c.status == CampaignStatus::Active)
                .count(),
            total_images: images.len(),
            recent_leads,
        }
    }

    pub fn render(&self) -> String {
        let card = |label: &str, value: String| {
            format!(
                "<div class=\"stat-card\"><span class=\"stat-value\">{}</span>\
                 <span class=\"stat-label\">{}</span></div>",
                value, label
            )
        };
        let recent: String = self
            .recent_leads
            .iter()
            .map(|l| {
                format!(
                    "<li>{} <span class=\"status-badge status-{}\">{}</span> {}</li>",
                    escape_html(&l.name),
                    l.status.as_str(),
                    l.status.label(),
                    format_date(l.created_at)
                )
            })
            .collect();

        format!(
            "<div class=\"dashboard-stats\">{}{}{}{}{}</div><ul class=\"recent-leads\">{}</ul>",
            card("Total Leads", self.total_leads.to_string()),
            card("Conversion Rate", format!("{:.1}%", self.conversion_rate)),
            card("Campaigns", self.total_campaigns.to_string()),
            card("Active Campaigns", self.active_campaigns.to_string()),
            card("Images", self.total_images.to_string()),
            recent
        )
    }
}

fn format_date(at: Option<DateTime<Utc>>) -> String {
    at.map(|t| t.format("%Y-%m-%d").to_string()).unwrap_or_default()
}

pub struct Dashboard {
    storage: Storage,
    stats: Option<DashboardStats>,
}

impl Dashboard {
    pub fn new(storage: Storage) -> Self {
        Self { storage, stats: None }
    }

    pub async fn init(&mut self) -> Result<&DashboardStats, AdminError> {
        let storage = self.storage.clone();
        let stats = tokio::task::spawn_blocking(move || -> Result<DashboardStats, StoreError> {
            let leads = RecordStore::<Lead>::open(storage.clone())?;
            let campaigns = RecordStore::<Campaign>::open(storage.clone())?;
            let images = RecordStore::<ImageRecord>::open(storage)?;
            Ok(DashboardStats::compute(leads.all(), campaigns.all(), images.all()))
        })
        .await??;
        Ok(&*self.stats.insert(stats))
    }

    pub fn stats(&self) -> Option<&DashboardStats> {
        self.stats.as_ref()
    }

    pub fn html(&self) -> String {
        match &self.stats {
            Some(stats) => stats.render(),
            None => skeleton_html("dashboard"),
        }
    }
}
