// Platform adapters isolate search-URL construction and results-page shape
// knowledge per external platform, so the orchestrator stays
// platform-agnostic: a new platform is one new adapter, not orchestrator
// edits.

pub mod jobboard;
pub mod linkedin;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC};
use serde_json::Value;

use crate::fetch::PageRequest;
use crate::models::candidate::CandidateRow;
use crate::models::source::{Platform, ScrapingConfig};

/// Characters that encodeURIComponent does NOT encode.
/// RFC 3986 unreserved: A-Z a-z 0-9 - _ . ! ~ * ' ( )
pub(crate) const ENCODE_URI_COMPONENT_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

pub trait PlatformAdapter: Send + Sync {
    fn platform(&self) -> Platform;

    /// Build the fetch request for one results page (1-based).
    fn build_page_request(&self, config: &ScrapingConfig, page: u32) -> PageRequest;

    /// Map one results page into candidate rows. Unmapped or malformed
    /// entries are dropped, never fatal.
    fn extract_rows(&self, page: &Value) -> Vec<CandidateRow>;

    /// True when the platform is demanding a login or verification the
    /// engine cannot satisfy. Terminates the run, unlike page errors.
    fn has_auth_challenge(&self, page: &Value) -> bool;
}

/// Adapter registry. Platforms without an adapter are configuration
/// errors, rejected before a run starts.
pub fn adapter_for(platform: Platform) -> Option<Box<dyn PlatformAdapter>> {
    match platform {
        Platform::Linkedin => Some(Box::new(linkedin::LinkedIn)),
        Platform::Jobboard => Some(Box::new(jobboard::JobBoard)),
        Platform::Facebook | Platform::Other => None,
    }
}

pub(crate) fn urlencoded(s: &str) -> String {
    percent_encoding::utf8_percent_encode(s, ENCODE_URI_COMPONENT_SET).to_string()
}

pub(crate) fn str_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(|v| v.as_str()).map(String::from)
}
