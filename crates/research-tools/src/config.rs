//! Research tool configuration

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Result, ToolError};

/// Settings shared by the research tools
#[derive(Clone, Debug)]
pub struct ResearchConfig {
    /// arXiv query endpoint
    pub arxiv_url: String,

    /// Where rendered papers are written
    pub output_dir: PathBuf,

    /// Maximum characters of extracted PDF text handed to the model
    pub pdf_max_chars: usize,

    /// HTTP timeout for arXiv and PDF downloads
    pub http_timeout: Duration,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            arxiv_url: "https://export.arxiv.org/api/query".into(),
            output_dir: PathBuf::from("output"),
            pdf_max_chars: 20_000,
            http_timeout: Duration::from_secs(30),
        }
    }
}

impl ResearchConfig {
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("RESEARCH_OUTPUT_DIR") {
            config.output_dir = PathBuf::from(dir);
        }
        if let Ok(url) = std::env::var("ARXIV_API_URL") {
            config.arxiv_url = url;
        }
        if let Ok(chars) = std::env::var("RESEARCH_PDF_MAX_CHARS") {
            config.pdf_max_chars = chars
                .parse()
                .map_err(|_| ToolError::Config(format!("RESEARCH_PDF_MAX_CHARS: invalid value '{}'", chars)))?;
        }

        Ok(config)
    }

    pub(crate) fn http_client(&self) -> Result<reqwest::Client> {
        Ok(reqwest::Client::builder()
            .timeout(self.http_timeout)
            .user_agent(concat!("research-tools/", env!("CARGO_PKG_VERSION")))
            .build()?)
    }
}
