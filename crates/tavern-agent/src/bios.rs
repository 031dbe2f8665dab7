//! Character bio request and response parsing.
//!
//! The generator is asked for delimited markdown, but replies are free text,
//! so two response schemas are recognised and anything else is kept raw.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Marks the beginning of one character block.
pub const BIO_START: &str = "=====================";
/// Marks the end of one character block.
pub const BIO_END: &str = "---------------------";

/// Additional run instructions sent with a bio request.
pub const BIO_INSTRUCTIONS: &str = "Return the generated character bios in markdown format \
with ===================== to mark the beginning and --------------------- to mark the end \
of each character. Start each character with a heading of the form `# Name - Role`.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterBio {
    pub name: String,
    pub bio: String,
}

/// A parsed bio reply, tagged with the schema it matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BioResponse {
    /// Delimited markdown blocks headed `# Name - Role`.
    Markdown(Vec<CharacterBio>),
    /// A JSON object `name -> bio`, or an array of `{name, bio}`.
    Json(Vec<CharacterBio>),
    /// Text that matched neither schema.
    Raw(String),
}

impl BioResponse {
    pub fn parse(text: &str) -> Self {
        if let Some(bios) = parse_json(text) {
            if !bios.is_empty() {
                return Self::Json(bios);
            }
        }
        let bios = parse_markdown(text);
        if bios.is_empty() {
            Self::Raw(text.to_string())
        } else {
            Self::Markdown(bios)
        }
    }

    /// Per-name bios. Raw replies carry none.
    pub fn bios(&self) -> &[CharacterBio] {
        match self {
            Self::Markdown(bios) | Self::Json(bios) => bios,
            Self::Raw(_) => &[],
        }
    }

    pub fn to_map(&self) -> HashMap<String, String> {
        self.bios()
            .iter()
            .map(|b| (b.name.clone(), b.bio.clone()))
            .collect()
    }

    /// Text handed back to the caller.
    pub fn text(&self) -> String {
        match self {
            Self::Raw(raw) => raw.clone(),
            _ => self
                .bios()
                .iter()
                .map(|b| b.bio.as_str())
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

fn parse_markdown(text: &str) -> Vec<CharacterBio> {
    let mut bios = Vec::new();
    let mut name: Option<String> = None;
    let mut content: Vec<&str> = Vec::new();

    let mut flush = |name: &mut Option<String>, content: &mut Vec<&str>| {
        if let Some(n) = name.take() {
            if !content.is_empty() {
                bios.push(CharacterBio {
                    name: n,
                    bio: content.join("\n"),
                });
            }
        }
        content.clear();
    };

    for line in text.lines() {
        if line.starts_with(BIO_START) || line.starts_with(BIO_END) {
            flush(&mut name, &mut content);
        } else if let Some(heading) = line.strip_prefix("# ") {
            let parsed = heading.split(" - ").next().unwrap_or_default().trim();
            if !parsed.is_empty() {
                if name.is_some() {
                    flush(&mut name, &mut content);
                }
                name = Some(parsed.to_string());
                content.push(line);
            }
        } else if name.is_some() {
            content.push(line);
        }
    }
    flush(&mut name, &mut content);

    bios
}

fn parse_json(text: &str) -> Option<Vec<CharacterBio>> {
    let value: serde_json::Value = serde_json::from_str(strip_code_fence(text)).ok()?;
    let bios = match value {
        serde_json::Value::Object(map) => map
            .into_iter()
            .map(|(name, bio)| CharacterBio {
                name,
                bio: bio_text(&bio),
            })
            .collect(),
        serde_json::Value::Array(items) => items
            .iter()
            .filter_map(|item| {
                let name = item["name"].as_str()?.to_string();
                let bio = item
                    .get("bio")
                    .or_else(|| item.get("description"))
                    .map(bio_text)?;
                Some(CharacterBio { name, bio })
            })
            .collect(),
        _ => return None,
    };
    Some(bios)
}

fn bio_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => match other.get("bio").and_then(|b| b.as_str()) {
            Some(bio) => bio.to_string(),
            None => other.to_string(),
        },
    }
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    match trimmed.strip_prefix("```") {
        Some(rest) => {
            let body = rest.split_once('\n').map(|(_, body)| body).unwrap_or_default();
            body.trim_end().strip_suffix("```").unwrap_or(body).trim()
        }
        None => trimmed,
    }
}
