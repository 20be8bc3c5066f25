use std::collections::BTreeMap;
use std::io::{Cursor, Write};

use serde::Deserialize;
use thiserror::Error;

use crate::zip_util::{
    read_zip_file_bytes_with_budget, zip_part_names_equivalent, ZipInflateBudget,
    DEFAULT_MAX_ZIP_PART_BYTES, DEFAULT_MAX_ZIP_TOTAL_BYTES,
};

/// Size limits enforced while inflating a template package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PackageLimits {
    /// Maximum allowed uncompressed bytes for any single part.
    pub max_part_bytes: u64,
    /// Maximum allowed uncompressed bytes across the whole package.
    pub max_total_bytes: u64,
}

impl Default for PackageLimits {
    fn default() -> Self {
        Self {
            max_part_bytes: DEFAULT_MAX_ZIP_PART_BYTES,
            max_total_bytes: DEFAULT_MAX_ZIP_TOTAL_BYTES,
        }
    }
}

#[derive(Debug, Error)]
pub enum XlsxError {
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("xml error: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("utf-8 error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("utf-8 error: {0}")]
    Utf8Str(#[from] std::str::Utf8Error),
    #[error("xml attribute error: {0}")]
    Attr(#[from] quick_xml::events::attributes::AttrError),
    #[error("missing required attribute: {0}")]
    MissingAttr(&'static str),
    #[error("missing xlsx part: {0}")]
    MissingPart(String),
    #[error("invalid xlsx: {0}")]
    Invalid(String),
    #[error(
        "xlsx package part is too large to load safely: {part} is {size} bytes (max {max} bytes)"
    )]
    PartTooLarge { part: String, size: u64, max: u64 },
    #[error("xlsx package is too large to load safely: {total} bytes uncompressed (max {max})")]
    PackageTooLarge { total: u64, max: u64 },
    #[error("invalid sheetId value")]
    InvalidSheetId,
}

/// An OPC package held fully in memory, keyed by part name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XlsxPackage {
    parts: BTreeMap<String, Vec<u8>>,
}

impl XlsxPackage {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, XlsxError> {
        Self::from_bytes_limited(bytes, PackageLimits::default())
    }

    pub fn from_bytes_limited(bytes: &[u8], limits: PackageLimits) -> Result<Self, XlsxError> {
        let mut zip = zip::ZipArchive::new(Cursor::new(bytes))?;

        let mut parts = BTreeMap::new();
        let mut budget = ZipInflateBudget::new(limits.max_total_bytes);
        for i in 0..zip.len() {
            let file = zip.by_index(i)?;
            if !file.is_file() {
                continue;
            }

            let name = file.name().to_string();
            let size = file.size();
            let buf = read_zip_file_bytes_with_budget(
                file,
                size,
                &name,
                limits.max_part_bytes,
                &mut budget,
            )?;
            parts.insert(name, buf);
        }

        log::debug!("loaded xlsx package with {} parts", parts.len());
        Ok(Self { parts })
    }

    pub fn from_parts(parts: BTreeMap<String, Vec<u8>>) -> Self {
        Self { parts }
    }

    /// Look up a part, tolerating a leading `/` and non-canonical producer spellings.
    pub fn part(&self, name: &str) -> Option<&[u8]> {
        if let Some(bytes) = self.parts.get(name) {
            return Some(bytes.as_slice());
        }

        if let Some(stripped) = name.strip_prefix('/') {
            if let Some(bytes) = self.parts.get(stripped) {
                return Some(bytes.as_slice());
            }
        }

        self.parts
            .iter()
            .find(|(key, _)| zip_part_names_equivalent(key.as_str(), name))
            .map(|(_, bytes)| bytes.as_slice())
    }

    pub fn part_names(&self) -> impl Iterator<Item = &str> {
        self.parts.keys().map(String::as_str)
    }

    pub fn set_part(&mut self, name: impl Into<String>, bytes: Vec<u8>) {
        self.parts.insert(name.into(), bytes);
    }

    pub fn write_to_bytes(&self) -> Result<Vec<u8>, XlsxError> {
        let mut buf = Vec::new();
        self.write_to(&mut buf)?;
        Ok(buf)
    }

    pub fn write_to<W: Write>(&self, mut w: W) -> Result<(), XlsxError> {
        let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
        // Entry timestamps are pinned so identical parts give identical bytes.
        let options = zip::write::FileOptions::<()>::default()
            .compression_method(zip::CompressionMethod::Deflated)
            .last_modified_time(zip::DateTime::default());

        // `[Content_Types].xml` first; some consumers sniff the first entry.
        let ordered = self
            .parts
            .iter()
            .filter(|(name, _)| name.as_str() == "[Content_Types].xml")
            .chain(
                self.parts
                    .iter()
                    .filter(|(name, _)| name.as_str() != "[Content_Types].xml"),
            );
        for (name, bytes) in ordered {
            zip.start_file(name.as_str(), options)?;
            zip.write_all(bytes)?;
        }

        let cursor = zip.finish()?;
        w.write_all(&cursor.into_inner())?;
        Ok(())
    }
}
