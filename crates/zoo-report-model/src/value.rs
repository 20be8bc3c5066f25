use std::fmt;

use serde::{Deserialize, Serialize};

/// A literal field value supplied by a report mapping.
///
/// Booleans and dates are expected to arrive already formatted as display text.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Literal {
    Number(f64),
    Text(String),
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Number(n) => write!(f, "{n}"),
            Literal::Text(s) => f.write_str(s),
        }
    }
}

/// Formula text to install into a cell verbatim.
///
/// A leading `=` is accepted and dropped; OOXML stores formulas without it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "FormulaRefRepr")]
pub struct FormulaRef {
    formula: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct FormulaRefRepr {
    formula: String,
}

impl From<FormulaRefRepr> for FormulaRef {
    fn from(repr: FormulaRefRepr) -> Self {
        FormulaRef::new(repr.formula)
    }
}

impl FormulaRef {
    pub fn new(formula: impl Into<String>) -> Self {
        let formula = formula.into();
        let trimmed = formula.trim();
        let trimmed = trimmed
            .strip_prefix('=')
            .map(str::trim_start)
            .unwrap_or(trimmed);
        Self {
            formula: trimmed.to_string(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.formula
    }
}

impl fmt::Display for FormulaRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.formula)
    }
}

/// Value bound to a placeholder or written by a block update.
///
/// JSON form: a string or number is a [`Literal`], `{"formula": "..."}` is a [`FormulaRef`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    FormulaRef(FormulaRef),
    Literal(Literal),
}

impl CellValue {
    pub fn text(value: impl Into<String>) -> Self {
        CellValue::Literal(Literal::Text(value.into()))
    }

    pub fn number(value: f64) -> Self {
        CellValue::Literal(Literal::Number(value))
    }

    pub fn formula(formula: impl Into<String>) -> Self {
        CellValue::FormulaRef(FormulaRef::new(formula))
    }

    pub fn as_formula(&self) -> Option<&str> {
        match self {
            CellValue::FormulaRef(f) => Some(f.as_str()),
            CellValue::Literal(_) => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Literal(Literal::Number(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            CellValue::Literal(Literal::Text(s)) => Some(s),
            _ => None,
        }
    }
}

/// Display text used when a value is interpolated into surrounding template text.
impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::FormulaRef(formula) => formula.fmt(f),
            CellValue::Literal(literal) => literal.fmt(f),
        }
    }
}

impl From<Literal> for CellValue {
    fn from(value: Literal) -> Self {
        CellValue::Literal(value)
    }
}

impl From<FormulaRef> for CellValue {
    fn from(value: FormulaRef) -> Self {
        CellValue::FormulaRef(value)
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::text(value)
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        CellValue::text(value)
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        CellValue::number(value)
    }
}

macro_rules! impl_from_integer {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for CellValue {
                fn from(value: $ty) -> Self {
                    CellValue::number(value as f64)
                }
            }
        )*
    };
}

impl_from_integer!(i32, i64, u32, u64, usize);
