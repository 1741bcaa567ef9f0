use std::io;

use crate::error::Result;
use crate::fixed::{Alignment, FieldSpec};
use crate::record::Record;
use crate::settings::{CsvParserSettings, Format, FixedWidthParserSettings};

/// The quoting strategy used when writing delimited records.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum QuoteStyle {
    /// Quote every field.
    Always,
    /// Quote only fields that require it: those containing the delimiter,
    /// the quote character or a line break. This is the default.
    Necessary,
    /// Never quote. Fields are written verbatim, so output containing the
    /// delimiter will not round-trip.
    Never,
}

impl Default for QuoteStyle {
    fn default() -> QuoteStyle {
        QuoteStyle::Necessary
    }
}

/// Writes delimited records, quoting and escaping per the configured
/// [`Format`].
///
/// ```
/// use flatfile::{CsvParserSettings, CsvWriter};
///
/// let settings = CsvParserSettings::new();
/// let mut wtr = CsvWriter::new(Vec::new(), &settings).unwrap();
/// wtr.write_record(&["a", "b,c"]).unwrap();
/// assert_eq!(wtr.into_inner(), b"a,\"b,c\"\n");
/// ```
pub struct CsvWriter<W: io::Write> {
    wtr: W,
    format: Format,
    style: QuoteStyle,
    null_value: String,
}

impl<W: io::Write> CsvWriter<W> {
    /// Create a writer over `wtr` using the format carried by `settings`.
    pub fn new(wtr: W, settings: &CsvParserSettings) -> Result<CsvWriter<W>> {
        settings.format.validate()?;
        Ok(CsvWriter {
            wtr,
            format: settings.format.clone(),
            style: QuoteStyle::default(),
            null_value: settings
                .common
                .null_value
                .clone()
                .unwrap_or_default(),
        })
    }

    /// Set the quoting strategy. The default is [`QuoteStyle::Necessary`].
    pub fn quote_style(&mut self, style: QuoteStyle) -> &mut Self {
        self.style = style;
        self
    }

    /// Write one record from plain string fields.
    pub fn write_record<I, T>(&mut self, fields: I) -> Result<()>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let mut first = true;
        for field in fields {
            if !first {
                self.wtr.write_all(&self.format.delimiter)?;
            }
            first = false;
            self.write_field(field.as_ref())?;
        }
        self.wtr.write_all(&self.format.line_separator)?;
        Ok(())
    }

    /// Write a parsed [`Record`], rendering null fields as the configured
    /// null value (an empty field by default).
    pub fn write_row(&mut self, record: &Record) -> Result<()> {
        let null_value = self.null_value.clone();
        self.write_record(
            record.iter().map(|f| f.unwrap_or(null_value.as_str())),
        )
    }

    fn write_field(&mut self, field: &str) -> Result<()> {
        let raw = field.as_bytes();
        let quote = match self.style {
            QuoteStyle::Always => true,
            QuoteStyle::Necessary => self.needs_quotes(raw),
            QuoteStyle::Never => false,
        };
        if !quote {
            self.wtr.write_all(raw)?;
            return Ok(());
        }
        self.wtr.write_all(&[self.format.quote])?;
        let mut start = 0;
        for (i, &b) in raw.iter().enumerate() {
            if b == self.format.quote {
                self.wtr.write_all(&raw[start..i])?;
                self.wtr
                    .write_all(&[self.format.quote_escape, self.format.quote])?;
                start = i + 1;
            } else if b == self.format.quote_escape {
                // A literal escape character needs its own escape when one
                // is configured.
                if let Some(ee) = self.format.escape_escape {
                    self.wtr.write_all(&raw[start..i])?;
                    self.wtr.write_all(&[ee, b])?;
                    start = i + 1;
                }
            }
        }
        self.wtr.write_all(&raw[start..])?;
        self.wtr.write_all(&[self.format.quote])?;
        Ok(())
    }

    fn needs_quotes(&self, raw: &[u8]) -> bool {
        raw.contains(&self.format.quote)
            || raw.contains(&b'\r')
            || raw.contains(&b'\n')
            || windows_contain(raw, &self.format.delimiter)
    }

    /// Flush the underlying writer.
    pub fn flush(&mut self) -> Result<()> {
        self.wtr.flush()?;
        Ok(())
    }

    /// Return the underlying writer.
    pub fn into_inner(self) -> W {
        self.wtr
    }
}

/// Writes fixed-width records, padding or truncating each value to its
/// field's width according to its alignment and padding character.
pub struct FixedWidthWriter<W: io::Write> {
    wtr: W,
    layout: Vec<FieldSpec>,
    line_separator: Vec<u8>,
    null_value: String,
}

impl<W: io::Write> FixedWidthWriter<W> {
    /// Create a writer over `wtr` using the default field layout carried by
    /// `settings`.
    pub fn new(
        wtr: W,
        settings: &FixedWidthParserSettings,
    ) -> Result<FixedWidthWriter<W>> {
        settings.validate()?;
        Ok(FixedWidthWriter {
            wtr,
            layout: settings.fields().specs().to_vec(),
            line_separator: settings.line_separator.clone(),
            null_value: settings
                .common
                .null_value
                .clone()
                .unwrap_or_default(),
        })
    }

    /// Write one record. Missing trailing fields are written as padding.
    pub fn write_record<I, T>(&mut self, fields: I) -> Result<()>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let mut fields = fields.into_iter();
        for spec in &self.layout {
            match fields.next() {
                Some(field) => {
                    write_fixed_field(&mut self.wtr, field.as_ref(), spec)?
                }
                None => write_fixed_field(&mut self.wtr, "", spec)?,
            }
        }
        self.wtr.write_all(&self.line_separator)?;
        Ok(())
    }

    /// Write a parsed [`Record`], rendering null fields as the configured
    /// null value (padding only by default).
    pub fn write_row(&mut self, record: &Record) -> Result<()> {
        let null_value = self.null_value.clone();
        self.write_record(
            record.iter().map(|f| f.unwrap_or(null_value.as_str())),
        )
    }

    /// Flush the underlying writer.
    pub fn flush(&mut self) -> Result<()> {
        self.wtr.flush()?;
        Ok(())
    }

    /// Return the underlying writer.
    pub fn into_inner(self) -> W {
        self.wtr
    }
}

fn write_fixed_field<W: io::Write>(
    wtr: &mut W,
    field: &str,
    spec: &FieldSpec,
) -> Result<()> {
    let raw = field.as_bytes();
    if raw.len() >= spec.width {
        wtr.write_all(&raw[..spec.width])?;
        return Ok(());
    }
    let pad = spec.width - raw.len();
    let (before, after) = match spec.alignment {
        Alignment::Left => (0, pad),
        Alignment::Right => (pad, 0),
        Alignment::Center => (pad / 2, pad - pad / 2),
    };
    for _ in 0..before {
        wtr.write_all(&[spec.padding])?;
    }
    wtr.write_all(raw)?;
    for _ in 0..after {
        wtr.write_all(&[spec.padding])?;
    }
    Ok(())
}

fn windows_contain(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty()
        && haystack.windows(needle.len()).any(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed::FixedWidthFields;

    fn write_csv(
        rows: &[&[&str]],
        configure: impl FnOnce(&mut CsvParserSettings),
        style: QuoteStyle,
    ) -> String {
        let mut settings = CsvParserSettings::new();
        configure(&mut settings);
        let mut wtr = CsvWriter::new(Vec::new(), &settings).unwrap();
        wtr.quote_style(style);
        for row in rows {
            wtr.write_record(row.iter()).unwrap();
        }
        String::from_utf8(wtr.into_inner()).unwrap()
    }

    #[test]
    fn quotes_only_when_necessary() {
        let out = write_csv(
            &[&["a", "b,c", "d\"e", "f\ng"]],
            |_| {},
            QuoteStyle::Necessary,
        );
        assert_eq!(out, "a,\"b,c\",\"d\"\"e\",\"f\ng\"\n");
    }

    #[test]
    fn always_and_never_styles() {
        let out = write_csv(&[&["a", "b"]], |_| {}, QuoteStyle::Always);
        assert_eq!(out, "\"a\",\"b\"\n");
        let out = write_csv(&[&["a", "b,c"]], |_| {}, QuoteStyle::Never);
        assert_eq!(out, "a,b,c\n");
    }

    #[test]
    fn distinct_escape_character() {
        let out = write_csv(
            &[&["a\"b"]],
            |s| {
                s.format_mut().quote_escape(b'\\');
            },
            QuoteStyle::Necessary,
        );
        assert_eq!(out, "\"a\\\"b\"\n");
    }

    #[test]
    fn multi_byte_delimiter_triggers_quoting() {
        let out = write_csv(
            &[&["a||b", "c|d"]],
            |s| {
                s.format_mut().delimiter("||");
            },
            QuoteStyle::Necessary,
        );
        assert_eq!(out, "\"a||b\"||c|d\n");
    }

    #[test]
    fn crlf_line_separator() {
        let out = write_csv(
            &[&["a", "b"]],
            |s| {
                s.format_mut().line_separator("\r\n");
            },
            QuoteStyle::Necessary,
        );
        assert_eq!(out, "a,b\r\n");
    }

    #[test]
    fn fixed_width_pads_by_alignment() {
        let mut fields = FixedWidthFields::new();
        fields.add_field("l", 4);
        fields.add_field("r", 4).alignment(Alignment::Right).padding(b'0');
        fields.add_field("c", 4).alignment(Alignment::Center).padding(b'*');
        let settings = FixedWidthParserSettings::new(fields);
        let mut wtr = FixedWidthWriter::new(Vec::new(), &settings).unwrap();
        wtr.write_record(&["ab", "42", "xy"]).unwrap();
        assert_eq!(
            String::from_utf8(wtr.into_inner()).unwrap(),
            "ab  0042*xy*\n"
        );
    }

    #[test]
    fn fixed_width_truncates_overflowing_values() {
        let settings =
            FixedWidthParserSettings::new(FixedWidthFields::from_widths([3]));
        let mut wtr = FixedWidthWriter::new(Vec::new(), &settings).unwrap();
        wtr.write_record(&["abcdef"]).unwrap();
        assert_eq!(wtr.into_inner(), b"abc\n");
    }

    #[test]
    fn fixed_width_missing_fields_become_padding() {
        let settings = FixedWidthParserSettings::new(
            FixedWidthFields::from_widths([2, 2]),
        );
        let mut wtr = FixedWidthWriter::new(Vec::new(), &settings).unwrap();
        wtr.write_record(&["a"]).unwrap();
        assert_eq!(wtr.into_inner(), b"a   \n");
    }
}
