//! Recognising catalog links in their three spellings: web URLs, `spotify:`
//! URIs and host navigation paths.

use std::sync::OnceLock;

use regex::Regex;
use stash_proto::job::JobContext;
use stash_proto::protocol::CollectionType;

const WEB_BASE: &str = "https://open.spotify.com";

fn url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^https?://open\.spotify\.com/(?:intl-[a-z-]+/)?(track|album|playlist)/([A-Za-z0-9]+)")
            .expect("static regex")
    })
}

fn uri_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^spotify:(track|album|playlist):([A-Za-z0-9]+)$").expect("static regex")
    })
}

fn path_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^/(track|album|playlist)/([A-Za-z0-9]+)").expect("static regex")
    })
}

fn context_from(caps: regex::Captures<'_>) -> Option<JobContext> {
    let kind = CollectionType::parse(caps.get(1)?.as_str())?;
    Some(JobContext::new(kind, caps.get(2)?.as_str()))
}

/// `https://open.spotify.com/album/<id>?si=...` → album context.
pub fn parse_url(url: &str) -> Option<JobContext> {
    url_re().captures(url.trim()).and_then(context_from)
}

/// `spotify:playlist:<id>` → playlist context.
pub fn parse_uri(uri: &str) -> Option<JobContext> {
    uri_re().captures(uri.trim()).and_then(context_from)
}

/// Host location path such as `/album/<id>`.
pub fn parse_path(path: &str) -> Option<JobContext> {
    path_re().captures(path.trim()).and_then(context_from)
}

/// Any of the three spellings.
pub fn parse_any(value: &str) -> Option<JobContext> {
    parse_url(value)
        .or_else(|| parse_uri(value))
        .or_else(|| parse_path(value))
}

/// Canonical web URL the backend expects.
pub fn web_url(context: &JobContext) -> String {
    format!(
        "{}/{}/{}",
        WEB_BASE,
        context.collection_type.as_str(),
        context.collection_id
    )
}
