//! `{{field}}` placeholders in template text and their substitution.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use zoo_report_model::{CellValue, Literal};

use crate::cell::CellContent;
use crate::render::{MissingFieldPolicy, RenderError};

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_.]*)\s*\}\}").expect("valid regex")
    })
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TextSegment {
    Literal(String),
    Field(String),
}

/// Template text classified by how it uses placeholders.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TextTemplate {
    /// No placeholders; copied as-is.
    Plain(String),
    /// The whole cell is one placeholder; the bound value decides the cell type.
    Whole(String),
    /// Text mixed with placeholders; always renders as text.
    Interpolated(Vec<TextSegment>),
}

impl TextTemplate {
    pub fn parse(text: &str) -> Self {
        let re = placeholder_regex();
        let mut segments = Vec::new();
        let mut last = 0usize;

        for caps in re.captures_iter(text) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            if whole.start() == 0 && whole.end() == text.len() {
                return TextTemplate::Whole(name.as_str().to_string());
            }
            if whole.start() > last {
                segments.push(TextSegment::Literal(text[last..whole.start()].to_string()));
            }
            segments.push(TextSegment::Field(name.as_str().to_string()));
            last = whole.end();
        }

        if segments.is_empty() {
            return TextTemplate::Plain(text.to_string());
        }
        if last < text.len() {
            segments.push(TextSegment::Literal(text[last..].to_string()));
        }
        TextTemplate::Interpolated(segments)
    }

    /// Field names referenced by this text, in order of appearance.
    pub fn fields(&self) -> Vec<&str> {
        match self {
            TextTemplate::Plain(_) => Vec::new(),
            TextTemplate::Whole(name) => vec![name.as_str()],
            TextTemplate::Interpolated(segments) => segments
                .iter()
                .filter_map(|segment| match segment {
                    TextSegment::Field(name) => Some(name.as_str()),
                    TextSegment::Literal(_) => None,
                })
                .collect(),
        }
    }
}

/// Convert a bound value into cell content.
///
/// Formula references are installed verbatim; they are never relocated.
pub fn coerce_value(value: &CellValue) -> Result<CellContent, RenderError> {
    Ok(match value {
        CellValue::Literal(Literal::Text(s)) => CellContent::Text(s.clone()),
        CellValue::Literal(Literal::Number(n)) => CellContent::Number(finite(*n)?),
        CellValue::FormulaRef(formula) => CellContent::formula(formula.as_str()),
    })
}

fn finite(n: f64) -> Result<f64, RenderError> {
    if n.is_finite() {
        Ok(n)
    } else {
        Err(RenderError::NonFiniteNumber(n))
    }
}

/// Binds one instruction's data to a block's placeholders.
pub struct TokenSubstitution<'a> {
    block: &'a str,
    data: &'a BTreeMap<String, CellValue>,
    policy: MissingFieldPolicy,
}

impl<'a> TokenSubstitution<'a> {
    pub fn new(
        block: &'a str,
        data: &'a BTreeMap<String, CellValue>,
        policy: MissingFieldPolicy,
    ) -> Self {
        Self {
            block,
            data,
            policy,
        }
    }

    fn lookup(&self, field: &str) -> Result<Option<&'a CellValue>, RenderError> {
        match (self.data.get(field), self.policy) {
            (Some(value), _) => Ok(Some(value)),
            (None, MissingFieldPolicy::Blank) => Ok(None),
            (None, MissingFieldPolicy::Error) => Err(RenderError::MissingField {
                block: self.block.to_string(),
                field: field.to_string(),
            }),
        }
    }

    /// Content for a whole-cell placeholder.
    pub fn whole(&self, field: &str) -> Result<CellContent, RenderError> {
        match self.lookup(field)? {
            Some(value) => coerce_value(value),
            None => Ok(CellContent::Empty),
        }
    }

    /// Text for an interpolated cell; every value renders as its display text.
    pub fn interpolate(&self, segments: &[TextSegment]) -> Result<String, RenderError> {
        let mut out = String::new();
        for segment in segments {
            match segment {
                TextSegment::Literal(text) => out.push_str(text),
                TextSegment::Field(field) => {
                    if let Some(value) = self.lookup(field)? {
                        if let CellValue::Literal(Literal::Number(n)) = value {
                            finite(*n)?;
                        }
                        out.push_str(&value.to_string());
                    }
                }
            }
        }
        Ok(out)
    }

    pub fn apply(&self, template: &TextTemplate) -> Result<CellContent, RenderError> {
        match template {
            TextTemplate::Plain(text) => Ok(CellContent::Text(text.clone())),
            TextTemplate::Whole(field) => self.whole(field),
            TextTemplate::Interpolated(segments) => {
                Ok(CellContent::Text(self.interpolate(segments)?))
            }
        }
    }
}
