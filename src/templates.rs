//! Template loading and rendering for the HTML listing page

use crate::error::AppError;
use crate::fs::DirEntryInfo;
use crate::utils::{percent_encode_segment, ARCHIVE_MARKER};
use chrono::{DateTime, Local};
use humansize::{format_size, BINARY};
use rust_embed::RustEmbed;
use std::collections::HashMap;

#[derive(RustEmbed)]
#[folder = "templates/"]
struct Embedded;

/// Renders the embedded HTML templates
pub struct TemplateEngine {
    templates: HashMap<String, String>,
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateEngine {
    /// Create a template engine holding every embedded template, keyed by
    /// file name without extension (`listing.html` -> `listing`).
    pub fn new() -> Self {
        let templates = Embedded::iter()
            .filter_map(|file| {
                let content = Embedded::get(&file)?;
                let name = file.strip_suffix(".html").unwrap_or(&*file).to_string();
                Some((name, String::from_utf8_lossy(&content.data).into_owned()))
            })
            .collect();
        Self { templates }
    }

    /// Render a template, replacing each `{{KEY}}` with its value.
    ///
    /// Substituted values are not scanned again, so a file named
    /// `{{ENTRIES}}` stays literal. Unknown keys are left untouched.
    pub fn render(
        &self,
        template_name: &str,
        variables: &HashMap<&str, String>,
    ) -> Result<String, AppError> {
        let template = self.templates.get(template_name).ok_or_else(|| {
            AppError::InternalServerError(format!("Template '{template_name}' not found"))
        })?;

        let mut rendered = String::with_capacity(template.len());
        let mut rest = template.as_str();
        while let Some(start) = rest.find("{{") {
            rendered.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            match after.find("}}") {
                Some(end) => {
                    let key = &after[..end];
                    match variables.get(key) {
                        Some(value) => rendered.push_str(value),
                        None => rendered.push_str(&rest[start..start + 2 + end + 2]),
                    }
                    rest = &after[end + 2..];
                }
                None => {
                    rendered.push_str(&rest[start..]);
                    rest = "";
                }
            }
        }
        rendered.push_str(rest);

        Ok(rendered)
    }

    /// Generate the listing page for one directory.
    pub fn render_directory_listing(
        &self,
        title: &str,
        entries: &[DirEntryInfo],
        is_root: bool,
    ) -> Result<String, AppError> {
        let mut rows = String::new();

        if !is_root {
            rows.push_str(
                r#"
            <div class="file-item">
                <div class="file-name">⬆️ <a href="../">..</a></div>
            </div>"#,
            );
        }

        for entry in entries {
            rows.push_str(&render_entry(entry));
        }

        let mut variables = HashMap::new();
        variables.insert("TITLE", html_escape(title));
        variables.insert("ENTRY_COUNT", entries.len().to_string());
        variables.insert("ENTRIES", rows);

        self.render("listing", &variables)
    }
}

fn render_entry(entry: &DirEntryInfo) -> String {
    let href = percent_encode_segment(&entry.name);
    let name = html_escape(&entry.name);
    let modified = entry
        .modified
        .map(|time| DateTime::<Local>::from(time).format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string());

    if entry.is_dir {
        format!(
            r#"
            <div class="file-item">
                <div class="file-name">📁 <a href="{href}/">{name}/</a></div>
                <div class="file-meta">-</div>
                <div class="file-meta">{modified}</div>
                <a href="{href}/?{ARCHIVE_MARKER}=1" class="download-btn">Download ZIP</a>
            </div>"#
        )
    } else {
        let size = format_size(entry.size, BINARY);
        format!(
            r#"
            <div class="file-item">
                <div class="file-name">📄 <a href="{href}">{name}</a></div>
                <div class="file-meta">{size}</div>
                <div class="file-meta">{modified}</div>
                <a href="{href}" class="download-btn" download>Download</a>
            </div>"#
        )
    }
}

/// Simple HTML entity escaping
fn html_escape(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}
