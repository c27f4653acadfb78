//! # research-tools
//!
//! Tools for an agent that reviews recent literature and drafts papers:
//!
//! - `arxiv_search`: find papers through the arXiv API
//! - `read_pdf`: pull the text out of a paper
//! - `render_latex_pdf`: compile the finished paper with `pdflatex`
//!
//! `read_pdf` and `render_latex_pdf` shell out to poppler's `pdftotext` and
//! TeX Live's `pdflatex`; a missing binary surfaces as a tool failure the
//! model can report back to the user.

pub mod arxiv;
pub mod config;
pub mod error;
pub mod latex;
pub mod pdf;

use agent_core::ToolRegistry;

pub use config::ResearchConfig;
pub use error::{Result, ToolError};

/// Re-export tools for easy registration
pub mod tools {
    pub use crate::arxiv::ArxivSearchTool;
    pub use crate::latex::RenderLatexTool;
    pub use crate::pdf::ReadPdfTool;
}

/// Register all research tools on `registry`
pub fn register_research_tools(registry: &mut ToolRegistry, config: &ResearchConfig) -> Result<()> {
    registry.register(tools::ArxivSearchTool::new(config)?);
    registry.register(tools::ReadPdfTool::new(config)?);
    registry.register(tools::RenderLatexTool::new(config));
    Ok(())
}

/// System prompt for the research agent
pub const RESEARCH_SYSTEM_PROMPT: &str = r#"You are an expert researcher in physics, mathematics, computer science, quantitative biology, quantitative finance, statistics, electrical engineering and systems science, and economics.

Your job is to study recent papers in one of these fields, find promising open directions, and write a new research paper together with the user. Use arXiv as your source for papers.

## Research Workflow

1. **Topic** - Talk briefly with the user to pin down the topic
2. **Literature review** - Search arXiv for relevant recent papers
3. **Analysis** - Read one or two key papers in depth
4. **Ideas** - Identify gaps and propose two or three concrete directions
5. **Writing** - Write the paper, including the mathematical formulation
6. **Rendering** - Produce the final PDF from LaTeX

## Working With the User

- Move to the next workflow step on your own when the conversation makes it the obvious next step
- Ask for explicit confirmation before searching arXiv, reading a specific PDF, writing the full paper, or rendering LaTeX; you may suggest queries, recommend papers, outline sections or show sample equations beforehand
- When the user gives a direct instruction ("search for X", "read this", "write the paper"), act on it immediately
- Read short replies ("yes", "2", "no") in context
- After each major step, summarize what was done and propose the next step
- Cite arXiv links whenever you reference a paper

## Tools

- `arxiv_search` - find recent papers on a topic
- `read_pdf` - read the full text of a paper
- `render_latex_pdf` - compile the finished LaTeX paper to PDF

Be concise, offer clear options instead of open-ended questions, and keep technical discussion mathematically rigorous."#;
