//! PDF Reading Tool
//!
//! Downloads a paper and extracts its text with `pdftotext` (poppler-utils).

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use agent_core::{tool::ParameterSchema, Result as CoreResult, Tool, ToolCall, ToolSchema};

use crate::config::ResearchConfig;
use crate::error::{Result, ToolError};

const PDFTOTEXT: &str = "pdftotext";

/// Tool for reading the text of a PDF
pub struct ReadPdfTool {
    client: reqwest::Client,
    max_chars: usize,
}

impl ReadPdfTool {
    pub fn new(config: &ResearchConfig) -> Result<Self> {
        Ok(Self {
            client: config.http_client()?,
            max_chars: config.pdf_max_chars,
        })
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ToolError::Download(format!("{} returned HTTP {}", url, status)));
        }

        let bytes = response.bytes().await?;
        if !bytes.starts_with(b"%PDF") {
            return Err(ToolError::Download(format!("{} did not return a PDF document", url)));
        }
        Ok(bytes.to_vec())
    }
}

/// Rewrite arXiv abstract links to their PDF counterpart
pub fn pdf_url(url: &str) -> String {
    match url.split_once("arxiv.org/abs/") {
        Some((prefix, id)) => format!("{}arxiv.org/pdf/{}", prefix, id),
        None => url.to_string(),
    }
}

/// Pipe PDF bytes through `pdftotext - -`
pub async fn extract_text(pdf: &[u8]) -> Result<String> {
    let mut child = Command::new(PDFTOTEXT)
        .args(["-layout", "-enc", "UTF-8", "-", "-"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ToolError::MissingProgram(PDFTOTEXT.into()),
            _ => ToolError::Io(e),
        })?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(pdf).await?;
        // Dropping stdin closes the pipe so pdftotext sees EOF
    }

    let output = child.wait_with_output().await?;
    if !output.status.success() {
        return Err(ToolError::Process {
            program: PDFTOTEXT.into(),
            message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Keep at most `max_chars` characters, noting how much was cut
pub fn truncate_text(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }

    let kept: String = text.chars().take(max_chars).collect();
    format!(
        "{}\n\n[... truncated, showing {} of {} characters]",
        kept.trim_end(),
        max_chars,
        total
    )
}

#[async_trait]
impl Tool for ReadPdfTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "read_pdf".into(),
            description: "Download a PDF (e.g. an arXiv paper) and return its text content.".into(),
            parameters: vec![ParameterSchema::required(
                "url",
                "string",
                "URL of the PDF; arXiv abstract links are accepted",
            )],
            has_side_effects: false,
        }
    }

    async fn execute(&self, call: &ToolCall) -> CoreResult<String> {
        let url = call
            .arguments
            .get("url")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|u| u.starts_with("http://") || u.starts_with("https://"))
            .ok_or_else(|| ToolError::InvalidArgument("'url' must be an http(s) URL".into()))?;

        let url = pdf_url(url);
        tracing::info!(%url, "Reading PDF");

        let bytes = self.download(&url).await?;
        let text = extract_text(&bytes).await?;
        if text.trim().is_empty() {
            return Ok(format!("No extractable text found in {}.", url));
        }

        tracing::debug!(chars = text.len(), "Extracted PDF text");
        Ok(truncate_text(&text, self.max_chars))
    }
}
