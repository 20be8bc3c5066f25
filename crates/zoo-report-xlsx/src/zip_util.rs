use std::io::Read;

use crate::XlsxError;

/// Default maximum uncompressed size permitted for any single ZIP part inflated into memory.
///
/// Guards against ZIP bombs (tiny compressed size, huge uncompressed size) and forged ZIP
/// metadata (an incorrect `uncompressed_size` field).
pub(crate) const DEFAULT_MAX_ZIP_PART_BYTES: u64 = 64 * 1024 * 1024; // 64MiB

/// Default maximum total uncompressed bytes inflated while loading one template package.
pub(crate) const DEFAULT_MAX_ZIP_TOTAL_BYTES: u64 = 256 * 1024 * 1024; // 256MiB

/// Compare two part names the way OPC consumers do: ASCII case-insensitive, `\` treated as `/`,
/// leading separators ignored and `%XX` escapes decoded.
pub(crate) fn zip_part_names_equivalent(a: &str, b: &str) -> bool {
    fn hex_val(b: u8) -> Option<u8> {
        match b {
            b'0'..=b'9' => Some(b - b'0'),
            b'a'..=b'f' => Some(b - b'a' + 10),
            b'A'..=b'F' => Some(b - b'A' + 10),
            _ => None,
        }
    }

    struct Normalized<'a> {
        bytes: &'a [u8],
        in_leading_separators: bool,
    }

    impl<'a> Normalized<'a> {
        fn new(s: &'a str) -> Self {
            Self {
                bytes: s.as_bytes(),
                in_leading_separators: true,
            }
        }

        fn next_byte(&mut self) -> Option<u8> {
            loop {
                let b = *self.bytes.first()?;
                let decoded = if b == b'%' && self.bytes.len() >= 3 {
                    match (hex_val(self.bytes[1]), hex_val(self.bytes[2])) {
                        (Some(hi), Some(lo)) => {
                            self.bytes = &self.bytes[3..];
                            (hi << 4) | lo
                        }
                        _ => {
                            self.bytes = &self.bytes[1..];
                            b
                        }
                    }
                } else {
                    self.bytes = &self.bytes[1..];
                    b
                };

                if self.in_leading_separators && matches!(decoded, b'/' | b'\\') {
                    continue;
                }
                self.in_leading_separators = false;

                return Some(if decoded == b'\\' {
                    b'/'
                } else {
                    decoded.to_ascii_lowercase()
                });
            }
        }
    }

    let mut a = Normalized::new(a);
    let mut b = Normalized::new(b);
    loop {
        match (a.next_byte(), b.next_byte()) {
            (Some(a), Some(b)) if a == b => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Running total of inflated bytes across one package load.
#[derive(Debug, Clone)]
pub(crate) struct ZipInflateBudget {
    max_total_bytes: u64,
    used_bytes: u64,
}

impl ZipInflateBudget {
    pub(crate) fn new(max_total_bytes: u64) -> Self {
        Self {
            max_total_bytes,
            used_bytes: 0,
        }
    }

    fn remaining_bytes(&self) -> u64 {
        self.max_total_bytes.saturating_sub(self.used_bytes)
    }

    fn consume(&mut self, bytes: u64) -> Result<(), XlsxError> {
        self.used_bytes = self.used_bytes.saturating_add(bytes);
        if self.used_bytes > self.max_total_bytes {
            return Err(XlsxError::PackageTooLarge {
                total: self.used_bytes,
                max: self.max_total_bytes,
            });
        }
        Ok(())
    }
}

/// Inflate one ZIP entry, enforcing both the per-part limit and the shared budget.
///
/// The declared size is checked up front, but the actual inflated length is what counts: reads
/// stop one byte past the limit so forged headers cannot smuggle in more data.
pub(crate) fn read_zip_file_bytes_with_budget<R: Read>(
    file: R,
    declared_size: u64,
    part: &str,
    max_part_bytes: u64,
    budget: &mut ZipInflateBudget,
) -> Result<Vec<u8>, XlsxError> {
    let remaining_total = budget.remaining_bytes();
    let effective_max = max_part_bytes.min(remaining_total);
    let limit_is_total = effective_max < max_part_bytes;

    if declared_size > max_part_bytes {
        return Err(XlsxError::PartTooLarge {
            part: part.to_string(),
            size: declared_size,
            max: max_part_bytes,
        });
    }
    if limit_is_total && declared_size > effective_max {
        return Err(XlsxError::PackageTooLarge {
            total: budget.used_bytes.saturating_add(declared_size),
            max: budget.max_total_bytes,
        });
    }

    let mut buf = Vec::new();
    let mut reader = file.take(effective_max.saturating_add(1));
    reader.read_to_end(&mut buf)?;

    let observed = buf.len() as u64;
    if observed > effective_max {
        if limit_is_total {
            return Err(XlsxError::PackageTooLarge {
                total: budget.used_bytes.saturating_add(observed),
                max: budget.max_total_bytes,
            });
        }
        return Err(XlsxError::PartTooLarge {
            part: part.to_string(),
            size: observed,
            max: max_part_bytes,
        });
    }

    budget.consume(observed)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::{Cursor, Write};

    use zip::write::FileOptions;
    use zip::{ZipArchive, ZipWriter};

    fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let options =
            FileOptions::<()>::default().compression_method(zip::CompressionMethod::Deflated);
        for (name, bytes) in entries {
            zip.start_file(*name, options).unwrap();
            zip.write_all(bytes).unwrap();
        }
        zip.finish().unwrap().into_inner()
    }

    #[test]
    fn equivalent_handles_case_separators_and_escapes() {
        assert!(zip_part_names_equivalent("XL\\Workbook.xml", "xl/workbook.xml"));
        assert!(zip_part_names_equivalent("/xl/workbook.xml", "xl/workbook.xml"));
        assert!(zip_part_names_equivalent(
            "xl/worksheets/sheet 1.xml",
            "xl/worksheets/sheet%201.xml"
        ));
        assert!(!zip_part_names_equivalent("xl/workbook.xml", "xl/workbook.xm"));
    }

    #[test]
    fn part_limit_is_enforced() {
        let bytes = build_zip(&[("a.txt", b"hello world")]);
        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        let file = archive.by_index(0).unwrap();
        let size = file.size();
        let mut budget = ZipInflateBudget::new(1024);

        let err =
            read_zip_file_bytes_with_budget(file, size, "a.txt", 10, &mut budget).unwrap_err();
        assert!(
            matches!(err, XlsxError::PartTooLarge { ref part, max: 10, .. } if part == "a.txt"),
            "{err:?}"
        );
    }

    #[test]
    fn budget_spans_parts() {
        let bytes = build_zip(&[("a.txt", b"hello"), ("b.txt", b"world")]);
        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut budget = ZipInflateBudget::new(8);

        {
            let file = archive.by_index(0).unwrap();
            let size = file.size();
            let a = read_zip_file_bytes_with_budget(file, size, "a.txt", 100, &mut budget).unwrap();
            assert_eq!(a, b"hello");
        }
        let file = archive.by_index(1).unwrap();
        let size = file.size();
        let err =
            read_zip_file_bytes_with_budget(file, size, "b.txt", 100, &mut budget).unwrap_err();
        assert!(matches!(err, XlsxError::PackageTooLarge { max: 8, .. }), "{err:?}");
    }
}
