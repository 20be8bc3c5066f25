use std::collections::HashMap;
use std::fmt::Write as _;

use quick_xml::escape::escape;
use quick_xml::events::Event;
use quick_xml::Reader;

use crate::openxml::NS_SPREADSHEETML;
use crate::package::XlsxError;

/// Parse `xl/sharedStrings.xml` into plain text, one entry per `<si>`.
///
/// Rich-text runs are flattened; phonetic (`rPh`) hints are skipped.
pub fn parse_shared_strings(xml: &[u8]) -> Result<Vec<String>, XlsxError> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(false);

    let mut buf = Vec::new();
    let mut strings = Vec::new();
    let mut current: Option<String> = None;
    let mut in_text = false;
    let mut phonetic_depth = 0usize;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Eof => break,
            Event::Start(e) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"rPh" => phonetic_depth += 1,
                b"t" if phonetic_depth == 0 => in_text = true,
                _ => {}
            },
            Event::Empty(e) if e.local_name().as_ref() == b"si" => strings.push(String::new()),
            Event::End(e) => match e.local_name().as_ref() {
                b"si" => {
                    if let Some(s) = current.take() {
                        strings.push(s);
                    }
                }
                b"rPh" => phonetic_depth = phonetic_depth.saturating_sub(1),
                b"t" => in_text = false,
                _ => {}
            },
            Event::Text(e) if in_text => {
                if let Some(s) = current.as_mut() {
                    s.push_str(&e.unescape()?);
                }
            }
            Event::CData(e) if in_text => {
                if let Some(s) = current.as_mut() {
                    s.push_str(std::str::from_utf8(e.as_ref())?);
                }
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(strings)
}

/// Deduplicating shared-string table for output workbooks.
#[derive(Debug, Default)]
pub struct SharedStringsBuilder {
    strings: Vec<String>,
    index: HashMap<String, u32>,
    references: usize,
}

impl SharedStringsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of `text` in the table, adding it on first use.
    pub fn intern(&mut self, text: &str) -> u32 {
        self.references += 1;
        if let Some(idx) = self.index.get(text) {
            return *idx;
        }
        let idx = self.strings.len() as u32;
        self.strings.push(text.to_string());
        self.index.insert(text.to_string(), idx);
        idx
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    pub fn to_xml(&self) -> String {
        let mut out = String::with_capacity(128 + self.strings.len() * 32);
        out.push_str(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#);
        out.push('\n');
        let _ = write!(
            out,
            r#"<sst xmlns="{NS_SPREADSHEETML}" count="{}" uniqueCount="{}">"#,
            self.references,
            self.strings.len()
        );
        for s in &self.strings {
            if needs_space_preserve(s) {
                let _ = write!(out, r#"<si><t xml:space="preserve">{}</t></si>"#, escape(s.as_str()));
            } else {
                let _ = write!(out, "<si><t>{}</t></si>", escape(s.as_str()));
            }
        }
        out.push_str("</sst>");
        out
    }
}

fn needs_space_preserve(s: &str) -> bool {
    s.starts_with(char::is_whitespace) || s.ends_with(char::is_whitespace) || s.contains('\n')
}
