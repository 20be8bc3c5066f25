use zoo_report_model::Range;

/// Content of one worksheet cell as read from a template or written to a report.
#[derive(Clone, Debug, PartialEq)]
pub enum CellContent {
    /// No value; the cell may still carry a style.
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
    /// Error literal such as `#N/A`.
    Error(String),
    /// ISO 8601 date cell (`t="d"`), kept as text.
    Date(String),
    /// Formula without its leading `=`. No cached value is kept.
    Formula {
        text: String,
        /// Spill range for legacy array formulas (`t="array"`).
        array_ref: Option<Range>,
    },
}

impl CellContent {
    pub fn formula(text: impl Into<String>) -> Self {
        CellContent::Formula {
            text: text.into(),
            array_ref: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, CellContent::Empty)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            CellContent::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellContent::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_formula(&self) -> Option<&str> {
        match self {
            CellContent::Formula { text, .. } => Some(text),
            _ => None,
        }
    }
}

/// A cell in an output sheet: template style index plus content.
#[derive(Clone, Debug, PartialEq)]
pub struct OutputCell {
    pub style: Option<u32>,
    pub content: CellContent,
}

impl OutputCell {
    pub fn new(style: Option<u32>, content: CellContent) -> Self {
        Self { style, content }
    }
}
