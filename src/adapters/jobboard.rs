use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Value, json};

use crate::adapters::{ENCODE_URI_COMPONENT_SET, PlatformAdapter, str_field, urlencoded};
use crate::fetch::PageRequest;
use crate::models::candidate::CandidateRow;
use crate::models::source::{Platform, ScrapingConfig};

const DEFAULT_BASE_URL: &str = "https://api.jobboard.example/v1/candidates/search";

pub struct JobBoard;

impl PlatformAdapter for JobBoard {
    fn platform(&self) -> Platform {
        Platform::Jobboard
    }

    fn build_page_request(&self, config: &ScrapingConfig, page: u32) -> PageRequest {
        let base_url = config
            .filters
            .get("base_url")
            .and_then(|v| v.as_str())
            .unwrap_or(DEFAULT_BASE_URL);

        let state = json!({
            "keywords": config.keywords,
            "locations": config.locations,
            "filters": config.filters.get("search").cloned().unwrap_or(Value::Null),
        });

        let url = format!(
            "{base_url}?s={}&page={page}&size={}",
            urlencoded(&encode_state(&state)),
            config.results_per_page
        );
        PageRequest::new(url).header("Accept", "application/json")
    }

    fn extract_rows(&self, page: &Value) -> Vec<CandidateRow> {
        let results = page
            .get("results")
            .and_then(|v| v.as_array())
            .map(Vec::as_slice)
            .unwrap_or_default();

        results.iter().filter_map(parse_applicant).collect()
    }

    fn has_auth_challenge(&self, page: &Value) -> bool {
        page.get("login_required")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
            || str_field(page, "error").is_some_and(|e| e == "unauthorized")
    }
}

/// Encode the search state the way the board's web client does:
/// JSON -> encodeURIComponent -> base64.
fn encode_state(state: &Value) -> String {
    let json_str = serde_json::to_string(state).unwrap_or_default();
    let uri_encoded =
        percent_encoding::utf8_percent_encode(&json_str, ENCODE_URI_COMPONENT_SET).to_string();
    BASE64.encode(uri_encoded.as_bytes())
}

fn parse_applicant(raw: &Value) -> Option<CandidateRow> {
    let name = str_field(raw, "full_name")
        .or_else(|| str_field(raw, "name"))
        .filter(|n| !n.is_empty())?;

    let skills = raw
        .get("skills")
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|s| s.as_str())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();

    Some(CandidateRow {
        name,
        title: str_field(raw, "current_title"),
        company: str_field(raw, "current_company"),
        location: str_field(raw, "location"),
        profile_url: str_field(raw, "profile_url"),
        email: str_field(raw, "email"),
        phone: str_field(raw, "phone"),
        experience_years: raw
            .get("experience_years")
            .and_then(|v| v.as_i64())
            .map(|v| v as i32),
        skills,
        source_reference: str_field(raw, "id"),
    })
}
