use crate::error::{Error, Result};
use crate::fixed::FixedWidthFields;

/// The character-level description of a delimited format.
///
/// A format is immutable once a parse run starts; it may be replaced between
/// runs or through `CsvParser::update_format`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Format {
    pub(crate) delimiter: Vec<u8>,
    pub(crate) quote: u8,
    pub(crate) quote_escape: u8,
    pub(crate) escape_escape: Option<u8>,
    pub(crate) comment: Option<u8>,
    pub(crate) normalized_newline: u8,
    pub(crate) line_separator: Vec<u8>,
}

impl Default for Format {
    fn default() -> Format {
        Format {
            delimiter: vec![b','],
            quote: b'"',
            quote_escape: b'"',
            escape_escape: None,
            comment: Some(b'#'),
            normalized_newline: b'\n',
            line_separator: vec![b'\n'],
        }
    }
}

impl Format {
    /// Create a format with the default CSV conventions: comma delimiter,
    /// double quote, quote escaping by doubling, `#` comments.
    pub fn new() -> Format {
        Format::default()
    }

    /// The field delimiter. Multi-byte delimiters are allowed and are
    /// matched greedily, longest candidate first.
    pub fn delimiter<D: AsRef<[u8]>>(&mut self, delimiter: D) -> &mut Format {
        self.delimiter = delimiter.as_ref().to_vec();
        self
    }

    /// The quote character. The default is `b'"'`.
    pub fn quote(&mut self, quote: u8) -> &mut Format {
        self.quote = quote;
        self
    }

    /// The character used before a quote character to represent a literal
    /// quote inside a quoted value. When equal to the quote character
    /// (the default), quotes escape by doubling.
    pub fn quote_escape(&mut self, escape: u8) -> &mut Format {
        self.quote_escape = escape;
        self
    }

    /// The character used to escape the quote-escape character itself, for
    /// formats where the escape is distinct from the quote.
    pub fn escape_escape(&mut self, escape: Option<u8>) -> &mut Format {
        self.escape_escape = escape;
        self
    }

    /// The comment-line marker. Lines whose first non-whitespace character
    /// equals this byte are collected as comments instead of being parsed.
    /// Set to `None` to disable comment handling. The default is `b'#'`.
    pub fn comment(&mut self, comment: Option<u8>) -> &mut Format {
        self.comment = comment;
        self
    }

    /// The single character all line endings (`\r`, `\n`, `\r\n`) are
    /// collapsed into before tokenization. The default is `b'\n'`.
    pub fn normalized_newline(&mut self, newline: u8) -> &mut Format {
        self.normalized_newline = newline;
        self
    }

    /// The literal line separator sequence (1 or 2 bytes) used when writing
    /// and reported by format detection. The default is `"\n"`.
    pub fn line_separator<S: AsRef<[u8]>>(&mut self, sep: S) -> &mut Format {
        self.line_separator = sep.as_ref().to_vec();
        self
    }

    /// Read access to the configured delimiter.
    pub fn get_delimiter(&self) -> &[u8] {
        &self.delimiter
    }

    /// Read access to the configured quote character.
    pub fn get_quote(&self) -> u8 {
        self.quote
    }

    /// Read access to the configured quote-escape character.
    pub fn get_quote_escape(&self) -> u8 {
        self.quote_escape
    }

    /// Read access to the configured line separator.
    pub fn get_line_separator(&self) -> &[u8] {
        &self.line_separator
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.delimiter.is_empty() {
            return Err(Error::Config("delimiter must not be empty".to_string()));
        }
        if self.delimiter.iter().any(|&b| b == b'\r' || b == b'\n') {
            return Err(Error::Config(
                "delimiter must not contain line-ending characters".to_string(),
            ));
        }
        if self.delimiter == [self.quote] {
            return Err(Error::Config(
                "delimiter and quote must differ".to_string(),
            ));
        }
        match self.line_separator.as_slice() {
            [b'\n'] | [b'\r'] | [b'\r', b'\n'] => Ok(()),
            _ => Err(Error::Config(
                "line separator must be one of \\n, \\r or \\r\\n".to_string(),
            )),
        }
    }
}

/// The strategy applied when a quote character appears where the grammar
/// does not expect one: inside an unquoted value that already has content,
/// or after a quoted value apparently closed but non-delimiter characters
/// follow.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UnescapedQuoteHandling {
    /// Abort the record with a diagnostic parse error.
    RaiseError,
    /// Treat the quote as closing the value immediately and discard any
    /// trailing characters up to the delimiter.
    StopAtClosingQuote,
    /// Keep accumulating characters literally until the next delimiter.
    /// This is the default.
    StopAtDelimiter,
    /// Discard the entire field value (the field becomes null) and continue
    /// at the next delimiter.
    SkipValue,
    /// Rewind to the last unambiguous delimiter or record boundary and
    /// re-parse the value as unquoted text.
    BackToDelimiter,
}

impl Default for UnescapedQuoteHandling {
    fn default() -> UnescapedQuoteHandling {
        UnescapedQuoteHandling::StopAtDelimiter
    }
}

/// Column selection or exclusion, resolved against headers or indices once
/// per run. Selection and exclusion are mutually exclusive.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Selection {
    /// Emit every parsed column.
    All,
    /// Emit only the named columns.
    Fields(Vec<String>),
    /// Emit only the columns at the given indices.
    Indexes(Vec<usize>),
    /// Emit every column except the named ones.
    ExcludeFields(Vec<String>),
    /// Emit every column except the ones at the given indices.
    ExcludeIndexes(Vec<usize>),
}

impl Default for Selection {
    fn default() -> Selection {
        Selection::All
    }
}

/// Settings shared by the delimited and fixed-width parsers.
#[derive(Clone, Debug)]
pub struct CommonSettings {
    pub(crate) header_extraction: bool,
    pub(crate) skip_empty_lines: bool,
    pub(crate) ignore_leading_whitespace: bool,
    pub(crate) ignore_trailing_whitespace: bool,
    pub(crate) max_columns: usize,
    pub(crate) max_chars_per_column: usize,
    pub(crate) input_buffer_size: usize,
    pub(crate) read_input_on_separate_thread: bool,
    pub(crate) null_value: Option<String>,
    pub(crate) empty_value: Option<String>,
    pub(crate) selection: Selection,
    pub(crate) column_reordering: bool,
    pub(crate) trim_header_names: bool,
}

impl Default for CommonSettings {
    fn default() -> CommonSettings {
        CommonSettings {
            header_extraction: false,
            skip_empty_lines: true,
            ignore_leading_whitespace: true,
            ignore_trailing_whitespace: true,
            max_columns: 512,
            max_chars_per_column: 4096,
            input_buffer_size: 128 * 1024,
            read_input_on_separate_thread: false,
            null_value: None,
            empty_value: None,
            selection: Selection::All,
            column_reordering: true,
            trim_header_names: false,
        }
    }
}

impl CommonSettings {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.max_columns == 0 {
            return Err(Error::Config("max_columns must be at least 1".to_string()));
        }
        if self.max_chars_per_column == 0 {
            return Err(Error::Config(
                "max_chars_per_column must be at least 1".to_string(),
            ));
        }
        if self.input_buffer_size == 0 {
            return Err(Error::Config(
                "input_buffer_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

macro_rules! common_setters {
    () => {
        /// Whether the first parsed record is extracted as the header row
        /// instead of being emitted. Disabled by default.
        pub fn header_extraction(&mut self, yes: bool) -> &mut Self {
            self.common.header_extraction = yes;
            self
        }

        /// Whether entirely empty lines are skipped rather than emitted as
        /// records. Enabled by default.
        pub fn skip_empty_lines(&mut self, yes: bool) -> &mut Self {
            self.common.skip_empty_lines = yes;
            self
        }

        /// Whether whitespace before an unquoted value is dropped.
        /// Enabled by default.
        pub fn ignore_leading_whitespace(&mut self, yes: bool) -> &mut Self {
            self.common.ignore_leading_whitespace = yes;
            self
        }

        /// Whether whitespace after an unquoted value is dropped.
        /// Enabled by default.
        pub fn ignore_trailing_whitespace(&mut self, yes: bool) -> &mut Self {
            self.common.ignore_trailing_whitespace = yes;
            self
        }

        /// The maximum number of columns a record may have before the run
        /// aborts with a fatal error. The default is 512.
        pub fn max_columns(&mut self, max: usize) -> &mut Self {
            self.common.max_columns = max;
            self
        }

        /// The maximum number of characters a single field may accumulate
        /// before the run aborts with a fatal error. The default is 4096.
        pub fn max_chars_per_column(&mut self, max: usize) -> &mut Self {
            self.common.max_chars_per_column = max;
            self
        }

        /// The size of each input buffer chunk in bytes.
        /// The default is 128 KiB.
        pub fn input_buffer_size(&mut self, size: usize) -> &mut Self {
            self.common.input_buffer_size = size;
            self
        }

        /// Whether input is prefetched on a background thread while the
        /// parsing thread drains previously filled buffers.
        /// Disabled by default.
        pub fn read_input_on_separate_thread(&mut self, yes: bool) -> &mut Self {
            self.common.read_input_on_separate_thread = yes;
            self
        }

        /// The string emitted in place of a null (absent) field value.
        pub fn null_value<S: Into<String>>(&mut self, value: Option<S>) -> &mut Self {
            self.common.null_value = value.map(Into::into);
            self
        }

        /// The string emitted in place of an empty field value.
        pub fn empty_value<S: Into<String>>(&mut self, value: Option<S>) -> &mut Self {
            self.common.empty_value = value.map(Into::into);
            self
        }

        /// Select the columns to emit, by header name.
        pub fn select_fields<S: Into<String>, I: IntoIterator<Item = S>>(
            &mut self,
            names: I,
        ) -> &mut Self {
            self.common.selection =
                Selection::Fields(names.into_iter().map(Into::into).collect());
            self
        }

        /// Select the columns to emit, by position.
        pub fn select_indexes<I: IntoIterator<Item = usize>>(
            &mut self,
            indexes: I,
        ) -> &mut Self {
            self.common.selection =
                Selection::Indexes(indexes.into_iter().collect());
            self
        }

        /// Exclude the named columns from emitted rows.
        pub fn exclude_fields<S: Into<String>, I: IntoIterator<Item = S>>(
            &mut self,
            names: I,
        ) -> &mut Self {
            self.common.selection =
                Selection::ExcludeFields(names.into_iter().map(Into::into).collect());
            self
        }

        /// Exclude the columns at the given positions from emitted rows.
        pub fn exclude_indexes<I: IntoIterator<Item = usize>>(
            &mut self,
            indexes: I,
        ) -> &mut Self {
            self.common.selection =
                Selection::ExcludeIndexes(indexes.into_iter().collect());
            self
        }

        /// When enabled (the default), emitted rows contain only the
        /// selected columns, in selection order. When disabled, rows keep
        /// the full parsed width and original order, with unselected slots
        /// left null.
        pub fn column_reordering(&mut self, yes: bool) -> &mut Self {
            self.common.column_reordering = yes;
            self
        }

        /// Whether header names are matched ignoring surrounding
        /// whitespace. Disabled by default.
        pub fn trim_header_names(&mut self, yes: bool) -> &mut Self {
            self.common.trim_header_names = yes;
            self
        }

        /// Read access to the shared settings.
        pub fn common(&self) -> &CommonSettings {
            &self.common
        }
    };
}

/// Configuration for the delimited (CSV/TSV-style) parser.
#[derive(Clone, Debug, Default)]
pub struct CsvParserSettings {
    pub(crate) common: CommonSettings,
    pub(crate) format: Format,
    pub(crate) detect_format: bool,
    pub(crate) detection_candidates: Vec<Vec<u8>>,
    pub(crate) quote_handling: UnescapedQuoteHandling,
    pub(crate) keep_quotes: bool,
    pub(crate) keep_escape_sequences: bool,
    pub(crate) trim_quoted_values: bool,
}

impl CsvParserSettings {
    /// Create settings with the default CSV format.
    pub fn new() -> CsvParserSettings {
        CsvParserSettings::default()
    }

    common_setters!();

    /// The delimited format to parse. See [`Format`].
    pub fn format(&mut self, format: Format) -> &mut Self {
        self.format = format;
        self
    }

    /// Mutable access to the format, for in-place adjustment.
    pub fn format_mut(&mut self) -> &mut Format {
        &mut self.format
    }

    /// Enable heuristic detection of delimiter, quote, quote-escape and
    /// line separator from a bounded sample of the input. Disabled by
    /// default.
    pub fn detect_format(&mut self, yes: bool) -> &mut Self {
        self.detect_format = yes;
        self
    }

    /// Override the delimiter candidates considered by format detection.
    /// The default is `,`, tab, `;`, `|`, `:`; earlier candidates win ties.
    pub fn detection_candidates<D: AsRef<[u8]>, I: IntoIterator<Item = D>>(
        &mut self,
        candidates: I,
    ) -> &mut Self {
        self.detection_candidates = candidates
            .into_iter()
            .map(|c| c.as_ref().to_vec())
            .collect();
        self
    }

    /// The policy applied to unescaped quotes.
    /// The default is [`UnescapedQuoteHandling::StopAtDelimiter`].
    pub fn unescaped_quote_handling(
        &mut self,
        policy: UnescapedQuoteHandling,
    ) -> &mut Self {
        self.quote_handling = policy;
        self
    }

    /// Whether the enclosing quotes of a quoted value are kept in the
    /// emitted field. Disabled by default.
    pub fn keep_quotes(&mut self, yes: bool) -> &mut Self {
        self.keep_quotes = yes;
        self
    }

    /// Whether escape sequences are surfaced verbatim instead of being
    /// resolved to the characters they represent. Disabled by default.
    pub fn keep_escape_sequences(&mut self, yes: bool) -> &mut Self {
        self.keep_escape_sequences = yes;
        self
    }

    /// Whether whitespace around the content of quoted values is trimmed.
    /// Disabled by default.
    pub fn trim_quoted_values(&mut self, yes: bool) -> &mut Self {
        self.trim_quoted_values = yes;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        self.common.validate()?;
        self.format.validate()?;
        for candidate in &self.detection_candidates {
            if candidate.is_empty() {
                return Err(Error::Config(
                    "detection candidates must not be empty".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Configuration for the fixed-width parser.
#[derive(Clone, Debug)]
pub struct FixedWidthParserSettings {
    pub(crate) common: CommonSettings,
    pub(crate) fields: FixedWidthFields,
    pub(crate) comment: Option<u8>,
    pub(crate) normalized_newline: u8,
    pub(crate) line_separator: Vec<u8>,
    pub(crate) skip_trailing_chars_until_newline: bool,
    pub(crate) record_ends_on_newline: bool,
    pub(crate) keep_padding: bool,
    pub(crate) lookahead_formats: Vec<(Vec<u8>, FixedWidthFields)>,
    pub(crate) lookbehind_formats: Vec<(Vec<u8>, FixedWidthFields)>,
}

impl FixedWidthParserSettings {
    /// Create settings for the given default field layout.
    pub fn new(fields: FixedWidthFields) -> FixedWidthParserSettings {
        FixedWidthParserSettings {
            common: CommonSettings::default(),
            fields,
            comment: Some(b'#'),
            normalized_newline: b'\n',
            line_separator: vec![b'\n'],
            skip_trailing_chars_until_newline: false,
            record_ends_on_newline: true,
            keep_padding: false,
            lookahead_formats: Vec::new(),
            lookbehind_formats: Vec::new(),
        }
    }

    common_setters!();

    /// The comment-line marker, or `None` to disable comment handling.
    pub fn comment(&mut self, comment: Option<u8>) -> &mut Self {
        self.comment = comment;
        self
    }

    /// The line separator used when writing. The default is `"\n"`.
    pub fn line_separator<S: AsRef<[u8]>>(&mut self, sep: S) -> &mut Self {
        self.line_separator = sep.as_ref().to_vec();
        self
    }

    /// When a physical line is longer than the active layout, discard the
    /// remainder up to the newline instead of raising an error.
    /// Disabled by default.
    pub fn skip_trailing_chars_until_newline(&mut self, yes: bool) -> &mut Self {
        self.skip_trailing_chars_until_newline = yes;
        self
    }

    /// When enabled (the default), a newline ends the record early and any
    /// unfilled fields are null. When disabled, the newline is counted as
    /// ordinary content and the record continues into the next physical
    /// line.
    pub fn record_ends_on_newline(&mut self, yes: bool) -> &mut Self {
        self.record_ends_on_newline = yes;
        self
    }

    /// Preserve padding characters verbatim in every field. Individual
    /// fields may also opt in via [`FixedWidthFields`]. Disabled by default.
    pub fn keep_padding(&mut self, yes: bool) -> &mut Self {
        self.keep_padding = yes;
        self
    }

    /// Use an alternate field layout for any physical line that starts
    /// with the given literal prefix.
    pub fn add_format_for_lookahead<P: AsRef<[u8]>>(
        &mut self,
        prefix: P,
        fields: FixedWidthFields,
    ) -> &mut Self {
        self.lookahead_formats.push((prefix.as_ref().to_vec(), fields));
        self
    }

    /// Use an alternate field layout for any physical line whose
    /// *preceding* line started with the given literal prefix.
    pub fn add_format_for_lookbehind<P: AsRef<[u8]>>(
        &mut self,
        prefix: P,
        fields: FixedWidthFields,
    ) -> &mut Self {
        self.lookbehind_formats.push((prefix.as_ref().to_vec(), fields));
        self
    }

    /// Read access to the default field layout.
    pub fn fields(&self) -> &FixedWidthFields {
        &self.fields
    }

    pub(crate) fn validate(&self) -> Result<()> {
        self.common.validate()?;
        self.fields.validate()?;
        for (prefix, fields) in
            self.lookahead_formats.iter().chain(&self.lookbehind_formats)
        {
            if prefix.is_empty() {
                return Err(Error::Config(
                    "lookahead/lookbehind prefixes must not be empty".to_string(),
                ));
            }
            fields.validate()?;
        }
        match self.line_separator.as_slice() {
            [b'\n'] | [b'\r'] | [b'\r', b'\n'] => Ok(()),
            _ => Err(Error::Config(
                "line separator must be one of \\n, \\r or \\r\\n".to_string(),
            )),
        }
    }
}
