//! Content resolution for landing pages.
//!
//! Tiers are tried in order and the first one with a usable signal supplies
//! the base content wholesale:
//!
//! 1. explicit `headline` parameter
//! 2. `keyword` parameter
//! 3. `city` parameter
//! 4. `industry` parameter
//! 5. IP-derived location
//! 6. visit-history bucket
//! 7. static default
//!
//! An enhancement pass then overlays location/visit/campaign metadata and the
//! field-level URL overrides (`subheadline`, `cta`, `image`, `paragraph`).

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::signals::Signals;
use crate::visits::VisitBucket;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ContentSource {
    Url,
    Keyword,
    City,
    Industry,
    Location,
    Visit,
    Default,
}

impl ContentSource {
    /// Lower is stronger.
    pub fn priority(&self) -> u8 {
        match self {
            ContentSource::Url => 1,
            ContentSource::Keyword => 2,
            ContentSource::City => 3,
            ContentSource::Industry => 4,
            ContentSource::Location => 5,
            ContentSource::Visit => 6,
            ContentSource::Default => 7,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContentPayload {
    pub headline: String,
    pub description: String,
    pub cta: String,
    pub source: ContentSource,
    pub priority: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visit_bucket: Option<VisitBucket>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub campaign: Option<String>,
    pub urgency: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub greeting: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hero_image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paragraph: Option<String>,
}

struct Blurb {
    headline: &'static str,
    description: &'static str,
    cta: &'static str,
}

const fn blurb(headline: &'static str, description: &'static str, cta: &'static str) -> Blurb {
    Blurb {
        headline,
        description,
        cta,
    }
}

// Keys are lowercase; lookups are exact matches on the lowercased input.
static CITY_CONTENT: &[(&str, Blurb)] = &[
    ("mumbai", blurb("Mumbai's Trusted Digital Marketing Agency", "Helping Mumbai businesses rank higher and convert more visitors into customers.", "Get Your Free Mumbai SEO Audit")),
    ("delhi", blurb("Grow Your Delhi Business Online", "Local SEO and paid campaigns built for the Delhi NCR market.", "Book a Delhi Strategy Call")),
    ("new delhi", blurb("Grow Your Delhi Business Online", "Local SEO and paid campaigns built for the Delhi NCR market.", "Book a Delhi Strategy Call")),
    ("bangalore", blurb("Digital Growth for Bangalore Startups", "Performance marketing for the city's fastest-moving companies.", "Talk to Our Bangalore Team")),
    ("bengaluru", blurb("Digital Growth for Bangalore Startups", "Performance marketing for the city's fastest-moving companies.", "Talk to Our Bangalore Team")),
    ("pune", blurb("Pune's Results-Driven SEO Experts", "Search visibility and lead generation for Pune businesses.", "Get a Free Pune Consultation")),
    ("hyderabad", blurb("Hyderabad Digital Marketing That Delivers", "From local search to national campaigns, we grow Hyderabad brands.", "Start Growing in Hyderabad")),
    ("chennai", blurb("Chennai's Partner for Online Growth", "SEO, PPC and social media for Chennai companies.", "Request a Chennai Proposal")),
    ("kolkata", blurb("Reach More Customers Across Kolkata", "Data-driven marketing for Kolkata's businesses.", "Get Your Kolkata Growth Plan")),
    ("ahmedabad", blurb("Ahmedabad's Growth Marketing Agency", "Turn searches in Ahmedabad into enquiries and sales.", "Claim Your Free Audit")),
    ("gurugram", blurb("Performance Marketing for Gurugram Brands", "Campaigns that keep pace with Gurugram's corporate hub.", "Schedule a Gurugram Call")),
];

static KEYWORD_CONTENT: &[(&str, Blurb)] = &[
    ("seo", blurb("Rank Higher on Google with Expert SEO", "Technical audits, content and links that move you up the results page.", "Get a Free SEO Audit")),
    ("ppc", blurb("PPC Campaigns That Pay for Themselves", "Google and Meta ads managed for return on ad spend, not clicks.", "Get a PPC Proposal")),
    ("social media", blurb("Social Media Marketing That Builds Brands", "Content, community and paid social under one roof.", "Grow Your Audience")),
    ("web design", blurb("Websites Designed to Convert", "Fast, mobile-first sites built around your customers.", "Start Your Website Project")),
    ("digital marketing", blurb("Full-Service Digital Marketing", "SEO, PPC, social and content working together for growth.", "Get Your Growth Plan")),
    ("content marketing", blurb("Content That Ranks and Converts", "Articles, guides and landing pages written for search and sales.", "Plan Your Content")),
    ("local seo", blurb("Dominate Local Search Results", "Google Business Profile, citations and reviews handled end to end.", "Get Found Locally")),
];

static INDUSTRY_CONTENT: &[(&str, Blurb)] = &[
    ("healthcare", blurb("Digital Marketing for Healthcare Providers", "Compliant campaigns that bring patients to your clinic.", "Grow Your Practice")),
    ("real estate", blurb("Generate More Property Leads", "Targeted campaigns for builders, brokers and developers.", "Get More Buyer Leads")),
    ("ecommerce", blurb("Scale Your Online Store", "Shopping ads, SEO and retention marketing for e-commerce brands.", "Boost Your Sales")),
    ("education", blurb("Fill Every Seat with Digital Marketing", "Admissions campaigns for schools, colleges and ed-tech.", "Increase Enrollments")),
    ("restaurants", blurb("Bring More Diners Through Your Door", "Local search and social campaigns for restaurants and cafes.", "Get More Reservations")),
];

static VISIT_CONTENT: &[(VisitBucket, Blurb)] = &[
    (VisitBucket::FirstTime, blurb("Welcome to Infetech Digital Marketing", "Discover how we help businesses grow with SEO, PPC and social media.", "Explore Our Services")),
    (VisitBucket::Returning, blurb("Welcome Back! Ready to Grow?", "Pick up where you left off and see what we can do for your business.", "Get Your Free Consultation")),
    (VisitBucket::Regular, blurb("Let's Turn Your Interest into Results", "You've seen our work. Let's build a plan for your business.", "Talk to a Strategist")),
    (VisitBucket::Loyal, blurb("Thanks for Being Part of Our Community", "Exclusive insights and priority support for our most engaged visitors.", "Claim Your Priority Session")),
];

const DEFAULT_CONTENT: Blurb = blurb(
    "Grow Your Business with Expert Digital Marketing",
    "SEO, PPC, social media and web design that deliver measurable results.",
    "Get Your Free Consultation",
);

const URGENCY_WORDS: &[&str] = &["urgent", "limited", "offer", "sale", "today", "emergency"];

fn lookup<'a>(table: &'a [(&str, Blurb)], key: &str) -> Option<&'a Blurb> {
    let key = key.trim().to_lowercase();
    table.iter().find(|(k, _)| *k == key).map(|(_, c)| c)
}

/// Headline for a city: the city table entry, or `"<Service> Services in <City>"`.
pub fn location_headline(city: &str, service: &str) -> String {
    match lookup(CITY_CONTENT, city) {
        Some(content) => content.headline.to_string(),
        None => format!("{} Services in {}", service, city.trim()),
    }
}

/// Capitalize the first letter of each word.
pub fn title_case(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

pub struct RuleEngine {
    service: String,
}

impl RuleEngine {
    /// `service` names the default offering used in templated headlines.
    pub fn new(service: &str) -> Self {
        Self {
            service: service.to_string(),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn resolve(&self, signals: &Signals) -> ContentPayload {
        let mut payload = self.base_content(signals);
        self.enhance(&mut payload, signals);
        debug!(
            source = ?payload.source,
            headline = %payload.headline,
            urgency = payload.urgency,
            "content resolved"
        );
        payload
    }

    fn base_content(&self, signals: &Signals) -> ContentPayload {
        let params = &signals.params;

        if let Some(headline) = &params.headline {
            return payload(
                ContentSource::Url,
                headline.clone(),
                DEFAULT_CONTENT.description.to_string(),
                DEFAULT_CONTENT.cta.to_string(),
            );
        }

        if let Some(keyword) = &params.keyword {
            return match lookup(KEYWORD_CONTENT, keyword) {
                Some(c) => from_blurb(ContentSource::Keyword, c),
                None => {
                    let name = title_case(keyword);
                    payload(
                        ContentSource::Keyword,
                        format!("Professional {} Services", name),
                        format!("Looking for {}? Our specialists deliver measurable results.", keyword.to_lowercase()),
                        format!("Get a Free {} Quote", name),
                    )
                }
            };
        }

        if let Some(city) = &params.city {
            return self.city_content(ContentSource::City, city);
        }

        if let Some(industry) = &params.industry {
            return match lookup(INDUSTRY_CONTENT, industry) {
                Some(c) => from_blurb(ContentSource::Industry, c),
                None => payload(
                    ContentSource::Industry,
                    format!("Digital Marketing for {}", title_case(industry)),
                    DEFAULT_CONTENT.description.to_string(),
                    DEFAULT_CONTENT.cta.to_string(),
                ),
            };
        }

        if let Some(location) = signals.location.as_ref().filter(|l| !l.city.is_empty()) {
            return self.city_content(ContentSource::Location, &location.city);
        }

        if let Some(bucket) = signals.visit {
            if let Some((_, c)) = VISIT_CONTENT.iter().find(|(b, _)| *b == bucket) {
                return from_blurb(ContentSource::Visit, c);
            }
        }

        from_blurb(ContentSource::Default, &DEFAULT_CONTENT)
    }

    fn city_content(&self, source: ContentSource, city: &str) -> ContentPayload {
        match lookup(CITY_CONTENT, city) {
            Some(c) => from_blurb(source, c),
            None => {
                let city = title_case(city);
                payload(
                    source,
                    location_headline(&city, &self.service),
                    format!("Trusted {} experts helping businesses in {} grow online.", self.service, city),
                    format!("Get a Free {} Consultation", self.service),
                )
            }
        }
    }

    fn enhance(&self, payload: &mut ContentPayload, signals: &Signals) {
        let params = &signals.params;

        payload.city = params
            .city
            .clone()
            .map(|c| title_case(&c))
            .or_else(|| signals.location.as_ref().map(|l| l.city.clone()))
            .filter(|c| !c.is_empty());
        if let Some(location) = &signals.location {
            payload.region = Some(location.state.clone()).filter(|s| !s.is_empty());
            payload.country = Some(location.country.clone()).filter(|s| !s.is_empty());
        }

        payload.visit_bucket = signals.visit;
        payload.greeting = match signals.visit {
            Some(VisitBucket::Returning) | Some(VisitBucket::Regular) => {
                Some("Welcome back!".to_string())
            }
            Some(VisitBucket::Loyal) => Some("Great to see you again!".to_string()),
            _ => None,
        };

        payload.campaign = params.campaign.clone();
        payload.urgency = [params.campaign.as_deref(), params.keyword.as_deref()]
            .into_iter()
            .flatten()
            .any(|text| {
                let text = text.to_lowercase();
                URGENCY_WORDS.iter().any(|w| text.contains(w))
            });

        if let Some(sub) = &params.subheadline {
            payload.description = sub.clone();
        }
        if let Some(cta) = &params.cta {
            payload.cta = cta.clone();
        }
        payload.hero_image = params.image.clone();
        payload.paragraph = params.paragraph.clone();
    }
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::new("SEO")
    }
}

fn from_blurb(source: ContentSource, c: &Blurb) -> ContentPayload {
    payload(
        source,
        c.headline.to_string(),
        c.description.to_string(),
        c.cta.to_string(),
    )
}

fn payload(source: ContentSource, headline: String, description: String, cta: String) -> ContentPayload {
    ContentPayload {
        headline,
        description,
        cta,
        source,
        priority: source.priority(),
        city: None,
        region: None,
        country: None,
        visit_bucket: None,
        campaign: None,
        urgency: false,
        greeting: None,
        hero_image: None,
        paragraph: None,
    }
}
