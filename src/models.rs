use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::store::Record;

pub const LEADS_KEY: &str = "leadManagementData";
pub const CAMPAIGNS_KEY: &str = "campaignManagementData";
pub const IMAGES_KEY: &str = "imageManagementData";
pub const ADMIN_USERS_KEY: &str = "adminUsers";

/// Pipeline stage of a lead.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    #[default]
    New,
    Contacted,
    Qualified,
    ProposalSent,
    Won,
    Lost,
}

impl LeadStatus {
    pub const ALL: [LeadStatus; 6] = [
        LeadStatus::New,
        LeadStatus::Contacted,
        LeadStatus::Qualified,
        LeadStatus::ProposalSent,
        LeadStatus::Won,
        LeadStatus::Lost,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LeadStatus::New => "new",
            LeadStatus::Contacted => "contacted",
            LeadStatus::Qualified => "qualified",
            LeadStatus::ProposalSent => "proposal_sent",
            LeadStatus::Won => "won",
            LeadStatus::Lost => "lost",
        }
    }

    /// Label shown on badges and in exports.
    pub fn label(&self) -> &'static str {
        match self {
            LeadStatus::New => "New",
            LeadStatus::Contacted => "Contacted",
            LeadStatus::Qualified => "Qualified",
            LeadStatus::ProposalSent => "Proposal Sent",
            LeadStatus::Won => "Won",
            LeadStatus::Lost => "Lost",
        }
    }
}

impl fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LeadStatus {
    type Err = String;

    /// Accepts both the stored form (`proposal_sent`) and the label (`Proposal Sent`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace([' ', '-'], "_");
        LeadStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == normalized)
            .ok_or_else(|| format!("unknown lead status '{}'", s))
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Lead {
    pub id: String,
    pub created_at: Option<DateTime<Utc>>,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub company: String,
    pub service: String,
    pub source: String,
    pub status: LeadStatus,
    pub budget: String,
    pub timeline: String,
    pub message: String,
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub campaign_id: Option<String>,
}

impl Record for Lead {
    const STORAGE_KEY: &'static str = LEADS_KEY;
    const ID_PREFIX: &'static str = "lead";
    const KIND: &'static str = "lead";

    fn id(&self) -> &str {
        &self.id
    }
    fn set_id(&mut self, id: String) {
        self.id = id;
    }
    fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }
    fn set_created_at(&mut self, at: DateTime<Utc>) {
        self.created_at = Some(at);
    }
    fn search_fields(&self) -> Vec<&str> {
        vec![self.name.as_str(), self.email.as_str(), self.company.as_str(), self.message.as_str()]
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    #[default]
    Draft,
    Active,
    Paused,
    Completed,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Draft => "draft",
            CampaignStatus::Active => "active",
            CampaignStatus::Paused => "paused",
            CampaignStatus::Completed => "completed",
        }
    }
}

impl FromStr for CampaignStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "draft" => Ok(CampaignStatus::Draft),
            "active" => Ok(CampaignStatus::Active),
            "paused" => Ok(CampaignStatus::Paused),
            "completed" => Ok(CampaignStatus::Completed),
            other => Err(format!("unknown campaign status '{}'", other)),
        }
    }
}

/// UTM attribution attached to campaigns and images.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Tracking {
    pub campaign_id: String,
    pub utm_source: String,
    pub utm_medium: String,
    pub utm_campaign: String,
    pub utm_content: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Campaign {
    pub id: String,
    pub created_at: Option<DateTime<Utc>>,
    pub name: String,
    #[serde(rename = "type")]
    pub campaign_type: String,
    pub active: bool,
    pub status: CampaignStatus,
    pub budget: f64,
    pub start_date: String,
    pub end_date: String,
    pub description: String,
    pub target_audience: Vec<String>,
    pub tracking: Tracking,
    /// Image references by filename.
    pub images: Vec<String>,
}

impl Record for Campaign {
    const STORAGE_KEY: &'static str = CAMPAIGNS_KEY;
    const ID_PREFIX: &'static str = "campaign";
    const KIND: &'static str = "campaign";

    fn id(&self) -> &str {
        &self.id
    }
    fn set_id(&mut self, id: String) {
        self.id = id;
    }
    fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }
    fn set_created_at(&mut self, at: DateTime<Utc>) {
        self.created_at = Some(at);
    }
    fn search_fields(&self) -> Vec<&str> {
        vec![self.name.as_str(), self.description.as_str(), self.campaign_type.as_str()]
    }
}

impl Campaign {
    /// Landing URL carrying this campaign's UTM parameters.
    pub fn tracking_url(&self, base: &str) -> Result<String, url::ParseError> {
        let mut url = url::Url::parse(base)?;
        {
            let mut pairs = url.query_pairs_mut();
            let t = &self.tracking;
            let utm_campaign = if t.utm_campaign.is_empty() {
                slugify(&self.name)
            } else {
                t.utm_campaign.clone()
            };
            if !t.utm_source.is_empty() {
                pairs.append_pair("utm_source", &t.utm_source);
            }
            if !t.utm_medium.is_empty() {
                pairs.append_pair("utm_medium", &t.utm_medium);
            }
            pairs.append_pair("utm_campaign", &utm_campaign);
            if !t.utm_content.is_empty() {
                pairs.append_pair("utm_content", &t.utm_content);
            }
        }
        Ok(url.to_string())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ImageRecord {
    pub id: String,
    pub created_at: Option<DateTime<Utc>>,
    pub filename: String,
    pub category: String,
    pub width: u32,
    pub height: u32,
    pub alt: String,
    pub title: String,
    pub seo_keywords: Vec<String>,
    pub tracking: Tracking,
    pub size: u64,
    /// Base64 payload for images uploaded through the admin screen.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl Record for ImageRecord {
    const STORAGE_KEY: &'static str = IMAGES_KEY;
    const ID_PREFIX: &'static str = "img";
    const KIND: &'static str = "image";

    fn id(&self) -> &str {
        &self.id
    }
    fn set_id(&mut self, id: String) {
        self.id = id;
    }
    fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }
    fn set_created_at(&mut self, at: DateTime<Utc>) {
        self.created_at = Some(at);
    }
    fn search_fields(&self) -> Vec<&str> {
        vec![self.filename.as_str(), self.category.as_str(), self.alt.as_str(), self.title.as_str()]
    }
}

impl ImageRecord {
    /// Build a record from uploaded bytes; the payload is kept base64-encoded.
    pub fn from_upload(filename: &str, category: &str, bytes: &[u8]) -> Self {
        use base64::Engine;
        let stem = filename.rsplit_once('.').map(|(s, _)| s).unwrap_or(filename);
        let alt = stem.replace(['-', '_'], " ");
        Self {
            filename: filename.to_string(),
            category: category.to_string(),
            alt: alt.clone(),
            title: alt,
            size: bytes.len() as u64,
            data: Some(base64::engine::general_purpose::STANDARD.encode(bytes)),
            ..Default::default()
        }
    }

    pub fn extension(&self) -> Option<String> {
        self.filename
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_lowercase())
    }
}

/// Back-office account. Passwords are stored and compared in plaintext,
/// exactly as the site scripts did; this is not a security boundary.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct AdminUser {
    pub id: String,
    pub created_at: Option<DateTime<Utc>>,
    pub email: String,
    pub password: String,
    pub name: String,
    pub role: String,
    pub active: bool,
}

impl Record for AdminUser {
    const STORAGE_KEY: &'static str = ADMIN_USERS_KEY;
    const ID_PREFIX: &'static str = "admin";
    const KIND: &'static str = "admin user";

    fn id(&self) -> &str {
        &self.id
    }
    fn set_id(&mut self, id: String) {
        self.id = id;
    }
    fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }
    fn set_created_at(&mut self, at: DateTime<Utc>) {
        self.created_at = Some(at);
    }
    fn search_fields(&self) -> Vec<&str> {
        vec![self.email.as_str(), self.name.as_str()]
    }
}

/// Session-visible view of an admin user (no password).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CurrentUser {
    pub id: String,
    pub email: String,
    pub name: String,
    pub role: String,
}

impl From<&AdminUser> for CurrentUser {
    fn from(user: &AdminUser) -> Self {
        Self {
            id: user.id.clone(),
            email: user.email.clone(),
            name: user.name.clone(),
            role: user.role.clone(),
        }
    }
}

/// Claims carried by the admin bearer token.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AuthPayload {
    pub sub: String, // admin email
    pub exp: usize,
}

/// Lowercase, hyphen-separated form used for CSS classes and utm values.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut last_dash = true;
    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}
