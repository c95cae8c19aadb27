//! Durable issue-link codec.
//!
//! Encodes an issue locator into a text fragment that can be written to
//! the source or target system (a marker comment, a link field, a custom
//! tag) and decoded back on a later stateless run. One codec serves both
//! directions and is compiled once from a template containing `${id}` and
//! `${deepLink}` placeholders.

use regex::Regex;

use crate::config::default_link_template;
use crate::errors::SyncError;
use crate::models::issue::IssueLocator;

pub const ID_PLACEHOLDER: &str = "${id}";
pub const DEEP_LINK_PLACEHOLDER: &str = "${deepLink}";

/// Compiled encode/decode pair for one link template.
#[derive(Debug, Clone)]
pub struct LinkCodec {
    template: String,
    segments: Vec<Segment>,
    match_pattern: Regex,
    parse_pattern: Regex,
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Id,
    DeepLink,
}

impl LinkCodec {
    /// Compile a template into a scan pattern and a parse pattern.
    ///
    /// The template must contain at least one placeholder; each may occur
    /// any number of times, in any order. Literal text is regex-escaped.
    /// A locator part that itself contains the template's literal
    /// separator text may mis-parse on decode; that limitation is
    /// deliberate and left visible to callers.
    pub fn compile(template: &str) -> Result<Self, SyncError> {
        let segments = split_segments(template);
        if !segments
            .iter()
            .any(|s| matches!(s, Segment::Id | Segment::DeepLink))
        {
            return Err(SyncError::Config(format!(
                "link template `{template}` contains neither ${{id}} nor ${{deepLink}}"
            )));
        }

        let mut match_src = String::new();
        let mut parse_src = String::from("^");
        let mut captured_id = false;
        let mut captured_link = false;

        for segment in &segments {
            match segment {
                Segment::Literal(text) => {
                    let escaped = regex::escape(text);
                    match_src.push_str(&escaped);
                    parse_src.push_str(&escaped);
                }
                Segment::Id => {
                    match_src.push_str(".*");
                    if captured_id {
                        parse_src.push_str(".*?");
                    } else {
                        parse_src.push_str("(?P<id>.*?)");
                        captured_id = true;
                    }
                }
                Segment::DeepLink => {
                    match_src.push_str(".*");
                    if captured_link {
                        parse_src.push_str(".*?");
                    } else {
                        parse_src.push_str("(?P<deepLink>.*?)");
                        captured_link = true;
                    }
                }
            }
        }
        parse_src.push('$');

        let match_pattern = compile_pattern(template, &match_src)?;
        let parse_pattern = compile_pattern(template, &parse_src)?;

        Ok(Self {
            template: template.to_string(),
            segments,
            match_pattern,
            parse_pattern,
        })
    }

    /// Codec for the default marker sentence of a named tracker.
    pub fn for_target(display_name: &str) -> Result<Self, SyncError> {
        Self::compile(&default_link_template(display_name))
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    /// Render a locator through the template. Absent parts render empty.
    pub fn encode(&self, locator: &IssueLocator) -> String {
        self.segments
            .iter()
            .map(|segment| match segment {
                Segment::Literal(text) => text.as_str(),
                Segment::Id => locator.id.as_deref().unwrap_or(""),
                Segment::DeepLink => locator.deep_link.as_deref().unwrap_or(""),
            })
            .collect()
    }

    /// Whether free text contains a fragment produced by this codec.
    pub fn matches(&self, text: &str) -> bool {
        self.match_pattern.is_match(text)
    }

    /// Locate the first codec-produced fragment within free text.
    pub fn find_fragment<'t>(&self, text: &'t str) -> Option<&'t str> {
        self.match_pattern.find(text).map(|m| m.as_str())
    }

    /// Parse a fragment back into a locator.
    ///
    /// The whole fragment must match; callers scanning larger text use
    /// [`Self::find_fragment`] first. Empty captured parts normalize to
    /// `None` so encode/decode round-trips locators with absent parts.
    pub fn decode(&self, text: &str) -> Result<IssueLocator, SyncError> {
        let captures = self.parse_pattern.captures(text).ok_or_else(|| {
            SyncError::LocatorParse(format!(
                "`{text}` does not match link template `{}`",
                self.template
            ))
        })?;
        let part = |name: &str| {
            captures
                .name(name)
                .map(|m| m.as_str())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        Ok(IssueLocator::new(part("id"), part("deepLink")))
    }
}

fn compile_pattern(template: &str, pattern: &str) -> Result<Regex, SyncError> {
    Regex::new(pattern).map_err(|e| {
        SyncError::Config(format!(
            "link template `{template}` compiled to an invalid pattern: {e}"
        ))
    })
}

/// Split a template into literal text and placeholder segments.
fn split_segments(template: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut rest = template;

    loop {
        let id_pos = rest.find(ID_PLACEHOLDER);
        let link_pos = rest.find(DEEP_LINK_PLACEHOLDER);
        let (pos, segment, len) = match (id_pos, link_pos) {
            (Some(i), Some(l)) if i <= l => (i, Segment::Id, ID_PLACEHOLDER.len()),
            (Some(i), None) => (i, Segment::Id, ID_PLACEHOLDER.len()),
            (_, Some(l)) => (l, Segment::DeepLink, DEEP_LINK_PLACEHOLDER.len()),
            (None, None) => break,
        };
        if pos > 0 {
            segments.push(Segment::Literal(rest[..pos].to_string()));
        }
        segments.push(segment);
        rest = &rest[pos + len..];
    }

    if !rest.is_empty() {
        segments.push(Segment::Literal(rest.to_string()));
    }
    segments
}
