use serde_json::Value;

use crate::adapters::{PlatformAdapter, str_field, urlencoded};
use crate::fetch::PageRequest;
use crate::models::candidate::CandidateRow;
use crate::models::source::{Platform, ScrapingConfig};

const BASE_URL: &str = "https://www.linkedin.com/search/results/people/";

pub struct LinkedIn;

impl PlatformAdapter for LinkedIn {
    fn platform(&self) -> Platform {
        Platform::Linkedin
    }

    fn build_page_request(&self, config: &ScrapingConfig, page: u32) -> PageRequest {
        let keywords = config.keywords.join(" ");
        let mut url = format!("{BASE_URL}?keywords={}&page={page}", urlencoded(&keywords));
        if let Some(location) = config.locations.first() {
            url.push_str(&format!("&geoUrn={}", urlencoded(location)));
        }
        PageRequest::new(url)
            .header("Sec-Fetch-Dest", "document")
            .header("Sec-Fetch-Mode", "navigate")
    }

    fn extract_rows(&self, page: &Value) -> Vec<CandidateRow> {
        let elements = page
            .get("elements")
            .and_then(|v| v.as_array())
            .map(Vec::as_slice)
            .unwrap_or_default();

        elements.iter().filter_map(parse_profile).collect()
    }

    fn has_auth_challenge(&self, page: &Value) -> bool {
        page.get("authwall").is_some()
            || str_field(page, "status").is_some_and(|s| s == "challenge")
            || str_field(page, "challengeUrl").is_some()
    }
}

/// Map one people-search element onto the common row shape. The headline
/// ("Senior Engineer at Initech") carries both title and company.
fn parse_profile(element: &Value) -> Option<CandidateRow> {
    let name = str_field(element, "title")
        .or_else(|| str_field(element, "name"))
        .filter(|n| !n.is_empty())?;

    let headline = str_field(element, "primarySubtitle")
        .or_else(|| str_field(element, "headline"));
    let (title, company) = match headline.as_deref() {
        Some(h) => match h.split_once(" at ") {
            Some((t, c)) => (Some(t.trim().to_string()), Some(c.trim().to_string())),
            None => (Some(h.to_string()), None),
        },
        None => (None, None),
    };

    let profile_url = str_field(element, "navigationUrl")
        .map(|u| u.split('?').next().unwrap_or(&u).to_string());

    Some(CandidateRow {
        name,
        title,
        company,
        location: str_field(element, "secondarySubtitle"),
        profile_url,
        email: None,
        phone: None,
        experience_years: None,
        skills: Vec::new(),
        source_reference: str_field(element, "entityUrn"),
    })
}
