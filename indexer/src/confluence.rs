//! Confluence Cloud page source.
//!
//! Pages are pulled through the CQL content search so the cutoff can be
//! applied server side. Results are fetched one batch at a time as the
//! iterator is drained.

use std::borrow::Cow;
use std::collections::VecDeque;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use confluence_rag_types::Document;
use regex::{Captures, Regex};
use reqwest::Url;
use reqwest::blocking::Client;
use serde::Deserialize;
use tracing::{debug, info};

use crate::engine::PageSource;
use crate::http;

const PAGE_LIMIT: u32 = 50;
const EXPAND: &str = "body.storage,version,space";

pub struct ConfluenceClient {
    client: Client,
    base_url: String,
    email: String,
    api_key: String,
    cutoff: DateTime<Utc>,
}

impl ConfluenceClient {
    pub fn new(domain: &str, email: &str, api_key: &str, cutoff: DateTime<Utc>) -> Result<Self> {
        Ok(Self {
            client: http::build_client()?,
            base_url: api_base(domain),
            email: email.to_string(),
            api_key: api_key.to_string(),
            cutoff,
        })
    }

    fn search_url(&self, space: &str) -> Result<String> {
        let endpoint = format!("{}/rest/api/content/search", self.base_url);
        let limit = PAGE_LIMIT.to_string();
        let url = Url::parse_with_params(
            &endpoint,
            &[
                ("cql", space_query(space, self.cutoff).as_str()),
                ("limit", limit.as_str()),
                ("expand", EXPAND),
            ],
        )
        .with_context(|| format!("invalid Confluence search URL {endpoint}"))?;
        Ok(url.into())
    }

    fn fetch(&self, url: &str, space: &str) -> Result<SearchBatch> {
        debug!(%url, "fetching Confluence search results");
        let request = self
            .client
            .get(url)
            .basic_auth(&self.email, Some(&self.api_key));
        let response: SearchResponse = http::send_json(request, url)
            .with_context(|| format!("failed to list pages for space {space}"))?;
        Ok(SearchBatch::from_response(response, &self.base_url, space))
    }
}

impl PageSource for ConfluenceClient {
    fn get_pages<'a>(&'a self, space: &str) -> Box<dyn Iterator<Item = Result<Document>> + 'a> {
        info!(space, cutoff = %self.cutoff, "listing Confluence pages");
        let next = match self.search_url(space) {
            Ok(url) => Some(url),
            Err(err) => return Box::new(std::iter::once(Err(err))),
        };

        let space = space.to_string();
        Box::new(Pages::new(next, move |url: &str| self.fetch(url, &space)))
    }
}

/// Lazily paginated search results for one space. Exhausted after the first error.
struct Pages<F> {
    fetch: F,
    next: Option<String>,
    buffer: VecDeque<Document>,
}

impl<F> Pages<F>
where
    F: FnMut(&str) -> Result<SearchBatch>,
{
    fn new(first: Option<String>, fetch: F) -> Self {
        Self {
            fetch,
            next: first,
            buffer: VecDeque::new(),
        }
    }
}

impl<F> Iterator for Pages<F>
where
    F: FnMut(&str) -> Result<SearchBatch>,
{
    type Item = Result<Document>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(document) = self.buffer.pop_front() {
                return Some(Ok(document));
            }

            let url = self.next.take()?;
            match (self.fetch)(&url) {
                Ok(batch) => {
                    // An empty page ends the listing even if it carries a next link.
                    if !batch.documents.is_empty() {
                        self.next = batch.next;
                    }
                    self.buffer.extend(batch.documents);
                }
                Err(err) => return Some(Err(err)),
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<ContentResult>,
    #[serde(rename = "_links", default)]
    links: SearchLinks,
}

#[derive(Debug, Default, Deserialize)]
struct SearchLinks {
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContentResult {
    id: String,
    title: String,
    space: Option<SpaceRef>,
    body: Option<Body>,
    version: Option<Version>,
    #[serde(rename = "_links", default)]
    links: ContentLinks,
}

#[derive(Debug, Deserialize)]
struct SpaceRef {
    key: String,
}

#[derive(Debug, Deserialize)]
struct Body {
    storage: Option<Storage>,
}

#[derive(Debug, Deserialize)]
struct Storage {
    value: String,
}

#[derive(Debug, Deserialize)]
struct Version {
    number: i64,
    when: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
struct ContentLinks {
    webui: Option<String>,
}

struct SearchBatch {
    documents: Vec<Document>,
    next: Option<String>,
}

impl SearchBatch {
    fn from_response(response: SearchResponse, base_url: &str, space: &str) -> Self {
        let documents = response
            .results
            .into_iter()
            .map(|result| {
                let content = result
                    .body
                    .and_then(|body| body.storage)
                    .map(|storage| storage_to_text(&storage.value))
                    .unwrap_or_default();
                Document {
                    id: result.id,
                    space: result
                        .space
                        .map(|s| s.key)
                        .unwrap_or_else(|| space.to_string()),
                    title: result.title,
                    content,
                    url: result.links.webui.map(|path| resolve_link(base_url, &path)),
                    version: result.version.as_ref().map(|v| v.number),
                    last_modified: result.version.and_then(|v| v.when),
                }
            })
            .collect();

        Self {
            documents,
            next: response.links.next.map(|path| resolve_link(base_url, &path)),
        }
    }
}

/// `acme.atlassian.net` and `https://acme.atlassian.net/` both map to `https://acme.atlassian.net/wiki`.
pub fn api_base(domain: &str) -> String {
    let trimmed = domain.trim().trim_end_matches('/');
    let with_scheme = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };

    if with_scheme.ends_with("/wiki") {
        with_scheme
    } else {
        format!("{with_scheme}/wiki")
    }
}

/// CQL for the pages of `space` modified at or after `cutoff`.
///
/// The cutoff is written as UTC wall-clock time, but Confluence reads CQL
/// dates in the API user's profile timezone. The effective boundary can
/// therefore shift by that user's UTC offset (at most about a day).
pub fn space_query(space: &str, cutoff: DateTime<Utc>) -> String {
    let key = space.replace('\\', "\\\\").replace('"', "\\\"");
    format!(
        r#"space = "{key}" AND type = page AND lastmodified >= "{}" ORDER BY lastmodified DESC"#,
        cutoff.format("%Y-%m-%d %H:%M")
    )
}

fn resolve_link(base_url: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        path.to_string()
    } else {
        format!("{base_url}{path}")
    }
}

static LINE_BREAK_TAGS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)<br\s*/?>|</(p|div|h[1-6]|li|tr|pre|blockquote|table|ul|ol|ac:plain-text-body)>",
    )
    .expect("valid line break pattern")
});
static ANY_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]*>").expect("valid tag pattern"));
static BLANK_RUNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid blank line pattern"));
static CDATA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<!\[CDATA\[(.*?)\]\]>").expect("valid CDATA pattern"));
static ENTITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"&(#[0-9]+|#[xX][0-9a-fA-F]+|[a-zA-Z][a-zA-Z0-9]*);").expect("valid entity pattern")
});

/// Delimits a stashed CDATA section while tags and entities are processed.
const LITERAL_MARK: char = '\u{1}';

/// Flattens Confluence storage format (XHTML plus macros) into plain text.
///
/// CDATA sections (code and no-format macro bodies) are kept verbatim: they
/// are neither tag-stripped nor entity-decoded.
pub fn storage_to_text(storage: &str) -> String {
    let mut literals = Vec::new();
    let protected = CDATA.replace_all(storage, |caps: &Captures| {
        literals.push(caps[1].to_string());
        format!("{LITERAL_MARK}{}{LITERAL_MARK}", literals.len() - 1)
    });

    let with_breaks = LINE_BREAK_TAGS.replace_all(&protected, "\n");
    let stripped = ANY_TAG.replace_all(&with_breaks, "");
    let decoded = decode_entities(&stripped);

    let lines: Vec<&str> = decoded.lines().map(str::trim_end).collect();
    let mut text = BLANK_RUNS
        .replace_all(&lines.join("\n"), "\n\n")
        .trim()
        .to_string();

    for (index, literal) in literals.iter().enumerate() {
        text = text.replace(&format!("{LITERAL_MARK}{index}{LITERAL_MARK}"), literal);
    }
    text
}

/// Decodes entities in one pass, so `&amp;lt;` becomes `&lt;` and not `<`.
/// Unknown or invalid references are left as written.
fn decode_entities(text: &str) -> Cow<'_, str> {
    ENTITY.replace_all(text, |caps: &Captures| match decode_entity(&caps[1]) {
        Some(ch) => ch.to_string(),
        None => caps[0].to_string(),
    })
}

fn decode_entity(name: &str) -> Option<char> {
    if let Some(number) = name.strip_prefix('#') {
        let code = match number.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => number.parse().ok()?,
        };
        return char::from_u32(code);
    }

    Some(match name {
        "nbsp" => ' ',
        "lt" => '<',
        "gt" => '>',
        "amp" => '&',
        "quot" => '"',
        "apos" => '\'',
        "lsquo" => '\u{2018}',
        "rsquo" => '\u{2019}',
        "ldquo" => '\u{201C}',
        "rdquo" => '\u{201D}',
        "ndash" => '\u{2013}',
        "mdash" => '\u{2014}',
        "hellip" => '\u{2026}',
        "bull" => '\u{2022}',
        "middot" => '\u{00B7}',
        "copy" => '\u{00A9}',
        "reg" => '\u{00AE}',
        "trade" => '\u{2122}',
        "times" => '\u{00D7}',
        "rarr" => '\u{2192}',
        _ => return None,
    })
}
