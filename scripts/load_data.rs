//! Seed script for the site storage
//!
//! Populates the local tree with:
//! - the default admin user (from `SITE_ADMIN_EMAIL` / `SITE_ADMIN_PASSWORD`)
//! - demo leads across every pipeline stage
//! - demo campaigns with UTM tracking, and the images they reference
//! Run: cargo run --bin load_data

use chrono::{Duration, Utc};
use tracing::info;

use infetech_site::admin::DashboardStats;
use infetech_site::auth::AuthGate;
use infetech_site::config::{load_system_config, save_system_config, AppConfig};
use infetech_site::models::{Campaign, CampaignStatus, ImageRecord, Lead, LeadStatus, Tracking};
use infetech_site::storage::Storage;
use infetech_site::store::RecordStore;

const SERVICES: [&str; 4] = ["SEO", "PPC", "Social Media Marketing", "Web Design"];
const SOURCES: [&str; 3] = ["website", "google", "facebook"];
const NAMES: [&str; 12] = [
    "Asha Mehta", "Ravi Kumar", "Meera Shah", "Karan Patel", "Priya Nair", "Vikram Rao",
    "Neha Joshi", "Arjun Desai", "Sneha Iyer", "Rohan Gupta", "Kavya Reddy", "Aman Verma",
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().init();
    let config = AppConfig::from_env()?;

    // Open the same storage the server uses
    let storage = Storage::open(&config.data_path)?;

    let auth = AuthGate::new(storage.clone(), &config.jwt_secret);
    if auth.seed_default_admin(&config.admin_email, &config.admin_password)? {
        info!(email = %config.admin_email, "admin user created");
    }

    let mut images = RecordStore::<ImageRecord>::open(storage.clone())?;
    if images.is_empty() {
        for (filename, category, width, height) in [
            ("seo-hero.webp", "hero", 1600, 900),
            ("ppc-dashboard.png", "service", 1200, 800),
            ("mumbai-skyline.jpg", "location", 1920, 1080),
            ("team-photo.jpg", "about", 1200, 630),
        ] {
            let alt = filename
                .rsplit_once('.')
                .map(|(stem, _)| stem.replace('-', " "))
                .unwrap_or_default();
            images.add(ImageRecord {
                filename: filename.to_string(),
                category: category.to_string(),
                width,
                height,
                title: alt.clone(),
                alt,
                seo_keywords: vec![category.to_string(), "digital marketing".to_string()],
                ..Default::default()
            })?;
        }
    }

    let mut campaigns = RecordStore::<Campaign>::open(storage.clone())?;
    if campaigns.is_empty() {
        let today = Utc::now().date_naive();
        for (i, (name, kind, status)) in [
            ("Diwali SEO Push", "SEO", CampaignStatus::Active),
            ("Mumbai PPC Launch", "PPC", CampaignStatus::Active),
            ("Monsoon Social", "Social", CampaignStatus::Paused),
            ("Website Revamp Offer", "Web Design", CampaignStatus::Draft),
        ]
        .into_iter()
        .enumerate()
        {
            let campaign = campaigns.add(Campaign {
                name: name.to_string(),
                campaign_type: kind.to_string(),
                active: status == CampaignStatus::Active,
                status,
                budget: 25_000.0 * (i as f64 + 1.0),
                start_date: (today - Duration::days(30 - i as i64 * 7)).to_string(),
                end_date: (today + Duration::days(30 + i as i64 * 7)).to_string(),
                description: format!("{} campaign for Indian SMBs", kind),
                target_audience: vec!["SMBs".to_string(), "Startups".to_string()],
                tracking: Tracking {
                    utm_source: "google".to_string(),
                    utm_medium: if kind == "PPC" { "cpc" } else { "organic" }.to_string(),
                    ..Default::default()
                },
                images: images.all().get(i).map(|img| img.filename.clone()).into_iter().collect(),
                ..Default::default()
            })?;
            if let Ok(url) = campaign.tracking_url("https://infetech.example/landing") {
                info!(campaign = %campaign.name, %url, "campaign tracking url");
            }
        }
    }

    let mut leads = RecordStore::<Lead>::open(storage.clone())?;
    if leads.is_empty() {
        let now = Utc::now();
        for (i, name) in NAMES.iter().enumerate() {
            let status = LeadStatus::ALL[i % LeadStatus::ALL.len()];
            let email = format!("{}@example.com", name.to_lowercase().replace(' ', "."));
            let lead = Lead {
                name: name.to_string(),
                email,
                phone: format!("+91 98{:08}", 20_000_000 + i * 1_234_567),
                company: format!("{} Enterprises", name.split(' ').next().unwrap_or("Acme")),
                service: SERVICES[i % SERVICES.len()].to_string(),
                source: SOURCES[i % SOURCES.len()].to_string(),
                status,
                budget: "50000-100000".to_string(),
                timeline: "1-3 months".to_string(),
                message: "Looking to grow qualified leads from search this quarter.".to_string(),
                ..Default::default()
            };
            // Oldest first so the newest ends up on top
            leads.add_at(lead, now - Duration::days((NAMES.len() - i) as i64))?;
        }
    }

    let mut system = load_system_config(&storage);
    system.contact_email = "hello@infetech.com".to_string();
    save_system_config(&storage, &system)?;
    storage.flush()?;
    info!(keys = ?storage.keys()?, "local storage keys");

    let stats = DashboardStats::compute(leads.all(), campaigns.all(), images.all());
    info!(
        leads = stats.total_leads,
        campaigns = stats.total_campaigns,
        active = stats.active_campaigns,
        images = stats.total_images,
        conversion = %format!("{:.1}%", stats.conversion_rate),
        "storage seeded"
    );
    println!(
        "✅ Loaded {} leads, {} campaigns and {} images into {}",
        stats.total_leads, stats.total_campaigns, stats.total_images, config.data_path
    );

    Ok(())
}
