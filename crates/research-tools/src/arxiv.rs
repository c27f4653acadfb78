//! arXiv Search Tool
//!
//! Queries the arXiv Atom API and summarizes the matching papers.

use async_trait::async_trait;
use serde::Serialize;

use agent_core::{tool::ParameterSchema, Result as CoreResult, Tool, ToolCall, ToolSchema};

use crate::config::ResearchConfig;
use crate::error::{Result, ToolError};

const DEFAULT_MAX_RESULTS: u64 = 5;
const MAX_RESULTS_CAP: u64 = 25;

/// One entry of an arXiv result feed
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Paper {
    pub title: String,
    pub authors: Vec<String>,
    pub published: String,
    pub link: String,
    pub pdf_url: Option<String>,
    pub summary: String,
}

/// Tool for searching arXiv
pub struct ArxivSearchTool {
    client: reqwest::Client,
    endpoint: String,
}

impl ArxivSearchTool {
    pub fn new(config: &ResearchConfig) -> Result<Self> {
        Ok(Self {
            client: config.http_client()?,
            endpoint: config.arxiv_url.clone(),
        })
    }

    /// Run a query and return the parsed entries
    pub async fn search(&self, query: &str, max_results: u64) -> Result<Vec<Paper>> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("search_query", format!("all:{}", query)),
                ("start", "0".to_string()),
                ("max_results", max_results.to_string()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ToolError::Arxiv(format!("HTTP {}", status)));
        }

        let feed = response.text().await?;
        Ok(parse_feed(&feed))
    }
}

#[async_trait]
impl Tool for ArxivSearchTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "arxiv_search".into(),
            description: "Search arXiv for recent research papers. Returns title, authors, \
                publication date, link and abstract for each match."
                .into(),
            parameters: vec![
                ParameterSchema::required("query", "string", "Search terms, e.g. 'diffusion models protein folding'"),
                ParameterSchema::optional(
                    "max_results",
                    "integer",
                    "Number of papers to return (1-25)",
                    serde_json::json!(DEFAULT_MAX_RESULTS),
                ),
            ],
            has_side_effects: false,
        }
    }

    async fn execute(&self, call: &ToolCall) -> CoreResult<String> {
        let query = call
            .arguments
            .get("query")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .ok_or_else(|| ToolError::InvalidArgument("'query' must be a non-empty string".into()))?;

        let max_results = call
            .arguments
            .get("max_results")
            .and_then(|v| v.as_u64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
            .unwrap_or(DEFAULT_MAX_RESULTS)
            .clamp(1, MAX_RESULTS_CAP);

        tracing::info!(query, max_results, "Searching arXiv");
        let papers = self.search(query, max_results).await?;

        Ok(format_papers(query, &papers))
    }
}

/// Render papers as the text handed back to the model
pub fn format_papers(query: &str, papers: &[Paper]) -> String {
    if papers.is_empty() {
        return format!("No arXiv papers found for '{}'.", query);
    }

    let mut output = format!("Found {} arXiv papers for '{}':\n", papers.len(), query);
    for (index, paper) in papers.iter().enumerate() {
        output.push_str(&format!(
            "\n{}. {}\n   Authors: {}\n   Published: {}\n   Link: {}\n",
            index + 1,
            paper.title,
            paper.authors.join(", "),
            paper.published,
            paper.link
        ));
        if let Some(pdf) = &paper.pdf_url {
            output.push_str(&format!("   PDF: {}\n", pdf));
        }
        output.push_str(&format!("   Summary: {}\n", paper.summary));
    }
    output.trim_end().to_string()
}

/// Extract entries from an Atom feed
///
/// The arXiv feed is flat and regular, so a tag scanner is enough here.
pub fn parse_feed(feed: &str) -> Vec<Paper> {
    sections(feed, "entry")
        .map(|entry| {
            let authors = sections(entry, "author")
                .filter_map(|author| first_text(author, "name"))
                .collect();

            Paper {
                title: first_text(entry, "title").unwrap_or_default(),
                authors,
                published: first_text(entry, "published")
                    .map(|p| p.chars().take(10).collect())
                    .unwrap_or_default(),
                link: first_text(entry, "id").unwrap_or_default(),
                pdf_url: pdf_link(entry),
                summary: first_text(entry, "summary").unwrap_or_default(),
            }
        })
        .collect()
}

/// Bodies of every `<tag ...>...</tag>` in `xml`
fn sections<'a>(xml: &'a str, tag: &'a str) -> impl Iterator<Item = &'a str> + 'a {
    let open = format!("<{}", tag);
    let close = format!("</{}>", tag);
    let mut rest = xml;

    std::iter::from_fn(move || {
        loop {
            let start = rest.find(&open)?;
            let after_name = &rest[start + open.len()..];
            // Skip longer tag names sharing the prefix (<entry> vs <entryX>)
            if !after_name.starts_with(['>', ' ', '\n', '\t', '\r']) {
                rest = after_name;
                continue;
            }
            let body_start = after_name.find('>')? + 1;
            let body = &after_name[body_start..];
            let end = body.find(&close)?;
            rest = &body[end + close.len()..];
            return Some(&body[..end]);
        }
    })
}

fn first_text(xml: &str, tag: &str) -> Option<String> {
    sections(xml, tag).next().map(clean_text)
}

fn pdf_link(entry: &str) -> Option<String> {
    entry
        .split("<link")
        .skip(1)
        .filter_map(|link| link.split('>').next())
        .find(|attrs| attrs.contains(r#"title="pdf""#))
        .and_then(|attrs| {
            let start = attrs.find(r#"href=""#)? + r#"href=""#.len();
            let len = attrs[start..].find('"')?;
            Some(attrs[start..start + len].to_string())
        })
}

/// Collapse whitespace and decode the XML entities arXiv emits
fn clean_text(raw: &str) -> String {
    decode_entities(&raw.split_whitespace().collect::<Vec<_>>().join(" "))
}

/// Decode named and numeric character references in one pass.
///
/// Unknown or malformed references are kept verbatim.
fn decode_entities(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let decoded = tail
            .find(';')
            .filter(|&semi| semi <= 10)
            .and_then(|semi| entity_char(&tail[1..semi]).map(|c| (c, semi)));

        match decoded {
            Some((c, semi)) => {
                out.push(c);
                rest = &tail[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn entity_char(name: &str) -> Option<char> {
    match name {
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "amp" => Some('&'),
        _ => {
            let code = match name.strip_prefix('#')? {
                hex if hex.starts_with(['x', 'X']) => u32::from_str_radix(&hex[1..], 16).ok()?,
                dec => dec.parse().ok()?,
            };
            char::from_u32(code)
        }
    }
}
