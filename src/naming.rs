//! Per-chunk destination naming.
//!
//! A [`NamingTemplate`] turns a chunk index into a relative file name. Templates
//! contain one or more `{index}` placeholders, optionally zero-padded with
//! `{index:0N}`:
//!
//! ```
//! use ironshard::NamingTemplate;
//!
//! let t = NamingTemplate::parse("part-{index:05}.parquet").unwrap();
//! assert_eq!(t.render(42), "part-00042.parquet");
//! assert_eq!(t.render(123_456), "part-123456.parquet");
//! ```
//!
//! Every valid template is injective in the index: the literal text around the
//! placeholders is fixed and the decimal rendering of `u64` is injective (padding
//! only adds leading zeros to numbers that would otherwise have fewer digits).
//! Templates without a placeholder, with unknown placeholders, or with stray
//! braces are rejected.

use crate::error::PipelineError;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{index(?::0(\d{1,2}))?\}").expect("placeholder regex"));

#[derive(Clone, Debug, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Index { width: usize },
}

/// An injective chunk-index → file-name template.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NamingTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl NamingTemplate {
    /// Parse and validate a template.
    ///
    /// # Errors
    /// [`PipelineError::ConfigInvalid`] when the template has no `{index}`
    /// placeholder, contains braces outside a placeholder, or is empty.
    pub fn parse(template: &str) -> Result<Self, PipelineError> {
        if template.is_empty() {
            return Err(PipelineError::config("naming template is empty"));
        }

        let mut segments = Vec::new();
        let mut last = 0usize;
        for caps in PLACEHOLDER.captures_iter(template) {
            let m = caps.get(0).expect("group 0 always matches");
            push_literal(&mut segments, &template[last..m.start()], template)?;
            let width = match caps.get(1) {
                Some(w) => w
                    .as_str()
                    .parse::<usize>()
                    .map_err(|e| PipelineError::config(format!("bad pad width in {template:?}: {e}")))?,
                None => 0,
            };
            segments.push(Segment::Index { width });
            last = m.end();
        }
        push_literal(&mut segments, &template[last..], template)?;

        if !segments.iter().any(|s| matches!(s, Segment::Index { .. })) {
            return Err(PipelineError::config(format!(
                "naming template {template:?} has no {{index}} placeholder, so chunks would collide"
            )));
        }

        Ok(Self {
            source: template.to_string(),
            segments,
        })
    }

    /// Render the file name for chunk `index`.
    #[must_use]
    pub fn render(&self, index: u64) -> String {
        let mut out = String::with_capacity(self.source.len() + 8);
        for seg in &self.segments {
            match seg {
                Segment::Literal(s) => out.push_str(s),
                Segment::Index { width } => out.push_str(&format!("{index:0width$}")),
            }
        }
        out
    }

    /// `root.join(self.render(index))`.
    #[must_use]
    pub fn path_for(&self, root: &Path, index: u64) -> PathBuf {
        root.join(self.render(index))
    }

    /// The template as written.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Extension of the rendered name, lowercased, including compression suffixes
    /// (e.g. `csv.gz`).
    #[must_use]
    pub fn extension(&self) -> Option<String> {
        let tail = match self.segments.last()? {
            Segment::Literal(s) => s.as_str(),
            Segment::Index { .. } => return None,
        };
        let name = tail.rsplit('/').next().unwrap_or(tail);
        let dot = name.find('.')?;
        Some(name[dot + 1..].to_ascii_lowercase())
    }
}

fn push_literal(segments: &mut Vec<Segment>, lit: &str, template: &str) -> Result<(), PipelineError> {
    if lit.contains(['{', '}']) {
        return Err(PipelineError::config(format!(
            "naming template {template:?} has an unrecognised placeholder near {lit:?}"
        )));
    }
    if !lit.is_empty() {
        segments.push(Segment::Literal(lit.to_string()));
    }
    Ok(())
}

impl Default for NamingTemplate {
    fn default() -> Self {
        Self::parse("part-{index:05}.parquet").expect("default template is valid")
    }
}

impl fmt::Display for NamingTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl Serialize for NamingTemplate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

impl<'de> Deserialize<'de> for NamingTemplate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn renders_padded_and_unpadded() {
        let t = NamingTemplate::parse("chunk_{index}.csv").unwrap();
        assert_eq!(t.render(0), "chunk_0.csv");
        assert_eq!(t.render(17), "chunk_17.csv");

        let t = NamingTemplate::parse("p{index:03}/data-{index}.jsonl").unwrap();
        assert_eq!(t.render(7), "p007/data-7.jsonl");
    }

    #[test]
    fn rejects_templates_without_index() {
        let err = NamingTemplate::parse("out.parquet").unwrap_err();
        assert!(err.is_config());
        assert!(NamingTemplate::parse("").is_err());
    }

    #[test]
    fn rejects_stray_braces() {
        assert!(NamingTemplate::parse("part-{idx}.csv").is_err());
        assert!(NamingTemplate::parse("part-{index}-{.csv").is_err());
        assert!(NamingTemplate::parse("part-{index:5}.csv").is_err());
    }

    #[test]
    fn rendering_is_injective_across_padding_boundary() {
        let t = NamingTemplate::parse("{index:02}1").unwrap();
        let names: HashSet<String> = (0..5_000).map(|i| t.render(i)).collect();
        assert_eq!(names.len(), 5_000);
    }

    #[test]
    fn extension_includes_compression_suffix() {
        let t = NamingTemplate::parse("part-{index:05}.CSV.gz").unwrap();
        assert_eq!(t.extension().as_deref(), Some("csv.gz"));
        let t = NamingTemplate::parse("dir.v2/part-{index}").unwrap();
        assert_eq!(t.extension(), None);
    }

    #[test]
    fn serde_roundtrip_validates() {
        let t: NamingTemplate = serde_json::from_str("\"x-{index:04}.csv\"").unwrap();
        assert_eq!(t.render(3), "x-0003.csv");
        assert!(serde_json::from_str::<NamingTemplate>("\"x.csv\"").is_err());
    }
}
