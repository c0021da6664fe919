//! Applies a resolved `ContentPayload` to a page through a `RenderPort`.
//!
//! The selectors the landing templates expose live in `SelectorMap`; bump
//! `SELECTOR_MAP_VERSION` whenever a selector changes meaning.

use serde::{Deserialize, Serialize};

use crate::models::slugify;
use crate::rules::ContentPayload;

pub const SELECTOR_MAP_VERSION: u32 = 1;

pub const PULSE_STYLE_ID: &str = "dynamic-content-pulse";

const PULSE_CSS: &str = "@keyframes dc-pulse{0%{transform:scale(1)}50%{transform:scale(1.05)}100%{transform:scale(1)}}\
.urgent .cta-button,.urgent .btn-primary{animation:dc-pulse 1.5s ease-in-out infinite}";

/// Page operations the applier needs. Missing targets are the host's concern.
pub trait RenderPort {
    fn set_text(&mut self, selector: &str, text: &str);
    fn set_attribute(&mut self, selector: &str, attribute: &str, value: &str);
    fn set_title(&mut self, title: &str);
    fn add_body_class(&mut self, class: &str);
    fn inject_style(&mut self, id: &str, css: &str);
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SelectorMap {
    pub version: u32,
    pub headline: Vec<String>,
    pub subheadline: Vec<String>,
    pub cta: Vec<String>,
    pub meta_description: String,
    pub hero: String,
    pub paragraph: String,
    pub greeting: String,
    pub city: String,
}

impl Default for SelectorMap {
    fn default() -> Self {
        let owned = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        Self {
            version: SELECTOR_MAP_VERSION,
            headline: owned(&["h1.hero-title", ".dynamic-headline", "[data-dynamic=\"headline\"]"]),
            subheadline: owned(&[".hero-subtitle", ".dynamic-subheadline", "[data-dynamic=\"subheadline\"]"]),
            cta: owned(&[".cta-button", ".btn-primary.dynamic-cta", "[data-dynamic=\"cta\"]"]),
            meta_description: "meta[name=\"description\"]".to_string(),
            hero: ".hero-section".to_string(),
            paragraph: "[data-dynamic=\"paragraph\"]".to_string(),
            greeting: "[data-dynamic=\"greeting\"]".to_string(),
            city: "[data-dynamic=\"city\"]".to_string(),
        }
    }
}

/// One recorded page mutation.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum DomPatch {
    SetText { selector: String, text: String },
    SetAttribute { selector: String, attribute: String, value: String },
    SetTitle { title: String },
    AddBodyClass { class: String },
    InjectStyle { id: String, css: String },
}

/// A port that records patches instead of touching a live page. The REST
/// layer ships these to the browser as JSON.
#[derive(Debug, Default, Clone, Serialize)]
pub struct PatchSet {
    pub patches: Vec<DomPatch>,
}

impl PatchSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text_for(&self, selector: &str) -> Option<&str> {
        self.patches.iter().rev().find_map(|p| match p {
            DomPatch::SetText { selector: s, text } if s == selector => Some(text.as_str()),
            _ => None,
        })
    }

    pub fn body_classes(&self) -> Vec<&str> {
        self.patches
            .iter()
            .filter_map(|p| match p {
                DomPatch::AddBodyClass { class } => Some(class.as_str()),
                _ => None,
            })
            .collect()
    }
}

impl RenderPort for PatchSet {
    fn set_text(&mut self, selector: &str, text: &str) {
        self.patches.push(DomPatch::SetText {
            selector: selector.to_string(),
            text: text.to_string(),
        });
    }

    fn set_attribute(&mut self, selector: &str, attribute: &str, value: &str) {
        self.patches.push(DomPatch::SetAttribute {
            selector: selector.to_string(),
            attribute: attribute.to_string(),
            value: value.to_string(),
        });
    }

    fn set_title(&mut self, title: &str) {
        self.patches.push(DomPatch::SetTitle {
            title: title.to_string(),
        });
    }

    fn add_body_class(&mut self, class: &str) {
        self.patches.push(DomPatch::AddBodyClass {
            class: class.to_string(),
        });
    }

    fn inject_style(&mut self, id: &str, css: &str) {
        self.patches.push(DomPatch::InjectStyle {
            id: id.to_string(),
            css: css.to_string(),
        });
    }
}

pub struct ContentApplier {
    selectors: SelectorMap,
    site_name: String,
    style_injected: bool,
}

impl ContentApplier {
    pub fn new(site_name: &str) -> Self {
        Self::with_selectors(site_name, SelectorMap::default())
    }

    pub fn with_selectors(site_name: &str, selectors: SelectorMap) -> Self {
        Self {
            selectors,
            site_name: site_name.to_string(),
            style_injected: false,
        }
    }

    pub fn selectors(&self) -> &SelectorMap {
        &self.selectors
    }

    pub fn apply(&mut self, payload: &ContentPayload, port: &mut dyn RenderPort) {
        let s = &self.selectors;

        if !payload.headline.is_empty() {
            for selector in &s.headline {
                port.set_text(selector, &payload.headline);
            }
            port.set_title(&format!("{} | {}", payload.headline, self.site_name));
        }
        if !payload.description.is_empty() {
            for selector in &s.subheadline {
                port.set_text(selector, &payload.description);
            }
            port.set_attribute(&s.meta_description, "content", &payload.description);
        }
        if !payload.cta.is_empty() {
            for selector in &s.cta {
                port.set_text(selector, &payload.cta);
            }
        }
        if let Some(paragraph) = payload.paragraph.as_deref().filter(|p| !p.is_empty()) {
            port.set_text(&s.paragraph, paragraph);
        }
        if let Some(image) = payload.hero_image.as_deref().filter(|i| !i.is_empty()) {
            port.set_attribute(&s.hero, "style", &format!("background-image: url('{}')", css_url(image)));
        }
        if let Some(greeting) = &payload.greeting {
            port.set_text(&s.greeting, greeting);
        }
        if let Some(city) = &payload.city {
            port.set_text(&s.city, city);
            port.add_body_class(&format!("location-{}", slugify(city)));
        }
        if let Some(bucket) = payload.visit_bucket {
            port.add_body_class(&format!("visitor-{}", bucket.as_str().replace('_', "-")));
        }
        if payload.urgency {
            port.add_body_class("urgent");
            if !self.style_injected {
                port.inject_style(PULSE_STYLE_ID, PULSE_CSS);
                self.style_injected = true;
            }
        }
    }
}

/// Strip characters that would break out of a CSS `url('…')`.
fn css_url(value: &str) -> String {
    value
        .chars()
        .filter(|c| !matches!(c, '\'' | '"' | '(' | ')' | '\\' | '\n' | '\r'))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::RuleEngine;
    use crate::signals::Signals;
    use crate::visits::VisitBucket;

    fn resolve(query: &str) -> ContentPayload {
        RuleEngine::default().resolve(&Signals::from_query(query))
    }

    #[test]
    fn test_apply_sets_text_title_and_meta() {
        let payload = resolve("headline=Grow+Faster&subheadline=Now&cta=Go");
        let mut applier = ContentApplier::new("Infetech");
        let mut patches = PatchSet::new();
        applier.apply(&payload, &mut patches);

        assert_eq!(patches.text_for("h1.hero-title"), Some("Grow Faster"));
        assert_eq!(patches.text_for(".hero-subtitle"), Some("Now"));
        assert_eq!(patches.text_for(".cta-button"), Some("Go"));
        assert!(patches.patches.contains(&DomPatch::SetTitle {
            title: "Grow Faster | Infetech".to_string()
        }));
        assert!(patches.patches.contains(&DomPatch::SetAttribute {
            selector: "meta[name=\"description\"]".to_string(),
            attribute: "content".to_string(),
            value: "Now".to_string(),
        }));
    }

    #[test]
    fn test_empty_fields_are_skipped() {
        let mut payload = resolve("");
        payload.headline.clear();
        payload.cta.clear();
        let mut patches = PatchSet::new();
        ContentApplier::new("Infetech").apply(&payload, &mut patches);

        assert!(patches.text_for("h1.hero-title").is_none());
        assert!(patches.text_for(".cta-button").is_none());
        assert!(!patches.patches.iter().any(|p| matches!(p, DomPatch::SetTitle { .. })));
    }

    #[test]
    fn test_body_classes_and_single_style_injection() {
        let mut payload = resolve("city=New+Delhi&campaign=flash-sale");
        payload.visit_bucket = Some(VisitBucket::FirstTime);
        let mut applier = ContentApplier::new("Infetech");

        let mut first = PatchSet::new();
        applier.apply(&payload, &mut first);
        assert_eq!(first.body_classes(), vec!["location-new-delhi", "visitor-first-time", "urgent"]);

        let mut second = PatchSet::new();
        applier.apply(&payload, &mut second);
        let styles = |set: &PatchSet| {
            set.patches
                .iter()
                .filter(|p| matches!(p, DomPatch::InjectStyle { .. }))
                .count()
        };
        assert_eq!(styles(&first), 1);
        assert_eq!(styles(&second), 0);
    }

    #[test]
    fn test_hero_image_is_sanitized() {
        let payload = resolve("image=hero.jpg')%3Bcolor:red");
        let mut patches = PatchSet::new();
        ContentApplier::new("Infetech").apply(&payload, &mut patches);
        assert!(patches.patches.contains(&DomPatch::SetAttribute {
            selector: ".hero-section".to_string(),
            attribute: "style".to_string(),
            value: "background-image: url('hero.jpg;color:red')".to_string(),
        }));
    }

    #[test]
    fn test_patch_serialization_is_tagged() {
        let json = serde_json::to_value(DomPatch::AddBodyClass {
            class: "urgent".to_string(),
        })
        .unwrap();
        assert_eq!(json["op"], "addBodyClass");
        assert_eq!(json["class"], "urgent");
    }
}
