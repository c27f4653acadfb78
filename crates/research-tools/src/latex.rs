//! LaTeX Rendering Tool
//!
//! Writes the paper source into the output directory and compiles it with
//! `pdflatex`. This is the only research tool with side effects.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use chrono::Utc;
use tokio::process::Command;

use agent_core::{tool::ParameterSchema, Result as CoreResult, Tool, ToolCall, ToolSchema};

use crate::config::ResearchConfig;
use crate::error::{Result, ToolError};

const PDFLATEX: &str = "pdflatex";

/// Tool for rendering a LaTeX document to PDF
pub struct RenderLatexTool {
    output_dir: PathBuf,
}

impl RenderLatexTool {
    pub fn new(config: &ResearchConfig) -> Self {
        Self {
            output_dir: config.output_dir.clone(),
        }
    }

    /// Write `latex` to a timestamped `.tex` file and return its path
    pub async fn write_source(&self, latex: &str) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.output_dir).await?;
        let stem = format!("paper_{}", Utc::now().format("%Y%m%d_%H%M%S_%3f"));
        let tex_path = self.output_dir.join(format!("{}.tex", stem));
        tokio::fs::write(&tex_path, latex).await?;
        Ok(tex_path)
    }

    /// Compile a `.tex` file in place, returning the PDF path
    pub async fn compile(&self, tex_path: &Path) -> Result<PathBuf> {
        let output = Command::new(PDFLATEX)
            .arg("-interaction=nonstopmode")
            .arg("-halt-on-error")
            .arg("-output-directory")
            .arg(&self.output_dir)
            .arg(tex_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => ToolError::MissingProgram(PDFLATEX.into()),
                _ => ToolError::Io(e),
            })?;

        let pdf_path = tex_path.with_extension("pdf");
        if !output.status.success() || !tokio::fs::try_exists(&pdf_path).await.unwrap_or(false) {
            return Err(ToolError::Process {
                program: PDFLATEX.into(),
                message: latex_errors(&String::from_utf8_lossy(&output.stdout)),
            });
        }

        Ok(pdf_path)
    }
}

/// The `!`-prefixed error lines of a pdflatex log, with a little context
pub fn latex_errors(log: &str) -> String {
    let lines: Vec<&str> = log.lines().collect();
    let errors: Vec<String> = lines
        .iter()
        .enumerate()
        .filter(|(_, line)| line.starts_with('!'))
        .take(5)
        .map(|(i, line)| match lines.get(i + 1) {
            Some(next) if next.starts_with("l.") => format!("{} ({})", line, next.trim()),
            _ => (*line).to_string(),
        })
        .collect();

    if errors.is_empty() {
        "compilation produced no PDF".into()
    } else {
        errors.join("\n")
    }
}

#[async_trait]
impl Tool for RenderLatexTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "render_latex_pdf".into(),
            description: "Render a complete LaTeX document to PDF. The document must include \
                \\documentclass and \\begin{document}. Returns the path of the generated PDF."
                .into(),
            parameters: vec![ParameterSchema::required(
                "latex_content",
                "string",
                "Full LaTeX source of the paper",
            )],
            has_side_effects: true,
        }
    }

    async fn execute(&self, call: &ToolCall) -> CoreResult<String> {
        let latex = call
            .arguments
            .get("latex_content")
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| ToolError::InvalidArgument("'latex_content' must be non-empty LaTeX source".into()))?;

        if !latex.contains("\\begin{document}") {
            return Err(ToolError::InvalidArgument(
                "'latex_content' is not a complete document (missing \\begin{document})".into(),
            )
            .into());
        }

        let tex_path = self.write_source(latex).await?;
        tracing::info!(path = %tex_path.display(), "Rendering LaTeX");

        let pdf_path = self.compile(&tex_path).await?;
        tracing::info!(path = %pdf_path.display(), "PDF rendered");

        Ok(format!("PDF rendered successfully: {}", pdf_path.display()))
    }
}
