//! Minimal `{{ .Field }}` text templates.
//!
//! Templates mix literal text with field references. Field names follow
//! identifier rules; anything else inside `{{ }}` is a syntax error. Stray
//! `}}` outside an action is literal text.

use crate::error::TemplateError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(String),
    Field(String),
}

/// A parsed template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
}

impl Template {
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut rest = source;
        let mut offset = 0;

        while let Some(open) = rest.find("{{") {
            if open > 0 {
                segments.push(Segment::Text(rest[..open].to_string()));
            }
            let after_open = &rest[open + 2..];
            let close = after_open
                .find("}}")
                .ok_or(TemplateError::Unclosed(offset + open))?;

            let action = after_open[..close].trim();
            if action.is_empty() {
                return Err(TemplateError::EmptyAction(offset + open));
            }
            segments.push(Segment::Field(parse_field(action)?));

            let consumed = open + 2 + close + 2;
            offset += consumed;
            rest = &rest[consumed..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Text(rest.to_string()));
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Field names referenced by the template, in order of appearance.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Field(name) => Some(name.as_str()),
            Segment::Text(_) => None,
        })
    }

    /// Reject templates that reference a field outside `known`.
    pub fn ensure_fields(&self, known: &[&str]) -> Result<(), TemplateError> {
        match self.fields().find(|f| !known.contains(f)) {
            Some(unknown) => Err(TemplateError::UnknownField(unknown.to_string())),
            None => Ok(()),
        }
    }

    /// Render with `lookup` supplying each field's value.
    pub fn render<F>(&self, lookup: F) -> Result<String, TemplateError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut out = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Field(name) => {
                    let value =
                        lookup(name).ok_or_else(|| TemplateError::UnknownField(name.clone()))?;
                    out.push_str(&value);
                }
            }
        }
        Ok(out)
    }
}

fn parse_field(action: &str) -> Result<String, TemplateError> {
    let bad = || TemplateError::BadAction(action.to_string());
    let name = action.strip_prefix('.').ok_or_else(bad)?;

    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if !valid_start || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(bad());
    }
    Ok(name.to_string())
}
