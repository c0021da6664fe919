//! Personalization inputs computed per page load.

use serde::{Deserialize, Serialize};

use crate::geo::Location;
use crate::visits::VisitBucket;

/// Query parameters the landing pages understand. Empty values are dropped.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct UrlParams {
    pub keyword: Option<String>,
    pub city: Option<String>,
    pub campaign: Option<String>,
    pub source: Option<String>,
    pub medium: Option<String>,
    pub adgroup: Option<String>,
    pub headline: Option<String>,
    pub subheadline: Option<String>,
    pub cta: Option<String>,
    pub image: Option<String>,
    pub paragraph: Option<String>,
    pub industry: Option<String>,
}

impl UrlParams {
    /// Parse a raw query string (with or without the leading `?`).
    /// For aliased parameters the first name listed wins over its alias.
    pub fn parse(query: &str) -> Self {
        let pairs: Vec<(String, String)> =
            url::form_urlencoded::parse(query.trim_start_matches('?').as_bytes())
                .map(|(k, v)| (k.into_owned(), v.trim().to_string()))
                .filter(|(_, v)| !v.is_empty())
                .collect();

        let pick = |names: &[&str]| -> Option<String> {
            names.iter().find_map(|name| {
                pairs
                    .iter()
                    .find(|(k, _)| k == name)
                    .map(|(_, v)| v.clone())
            })
        };

        Self {
            keyword: pick(&["keyword", "kw"]),
            city: pick(&["city", "location"]),
            campaign: pick(&["campaign", "utm_campaign"]),
            source: pick(&["source", "utm_source"]),
            medium: pick(&["medium", "utm_medium"]),
            adgroup: pick(&["adgroup", "utm_content"]),
            headline: pick(&["headline"]),
            subheadline: pick(&["subheadline"]),
            cta: pick(&["cta"]),
            image: pick(&["image"]),
            paragraph: pick(&["paragraph"]),
            industry: pick(&["industry"]),
        }
    }

    /// UTM attribution carried by these parameters, if any.
    pub fn attribution(&self) -> Option<Attribution> {
        if self.source.is_none() && self.medium.is_none() && self.campaign.is_none() {
            return None;
        }
        Some(Attribution {
            source: self.source.clone().unwrap_or_default(),
            medium: self.medium.clone().unwrap_or_default(),
            campaign: self.campaign.clone().unwrap_or_default(),
            content: self.adgroup.clone().unwrap_or_default(),
            keyword: self.keyword.clone().unwrap_or_default(),
        })
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Attribution {
    pub source: String,
    pub medium: String,
    pub campaign: String,
    pub content: String,
    pub keyword: String,
}

/// Everything the rule engine looks at.
#[derive(Debug, Clone, Default)]
pub struct Signals {
    pub params: UrlParams,
    pub location: Option<Location>,
    pub visit: Option<VisitBucket>,
}

impl Signals {
    pub fn from_query(query: &str) -> Self {
        Self {
            params: UrlParams::parse(query),
            ..Default::default()
        }
    }

    pub fn with_location(mut self, location: Option<Location>) -> Self {
        self.location = location;
        self
    }

    pub fn with_visit(mut self, visit: Option<VisitBucket>) -> Self {
        self.visit = visit;
        self
    }
}
