use std::io;

use crate::buffer::InputBuffer;
use crate::detect::{detect_format, SAMPLE_SIZE};
use crate::error::{
    Error, ErrorHandler, LimitError, LimitKind, ParseError, ParseErrorKind,
    Position, Recovery, Result,
};
use crate::fixed::FixedTokenizer;
use crate::record::Record;
use crate::select::SelectionPlan;
use crate::settings::{
    CommonSettings, CsvParserSettings, FixedWidthParserSettings, Format,
    Selection,
};
use crate::tokenizer::{FieldToken, StartOfRecord, Tokenizer};

/// The field-level interface both state machines expose to the record
/// assembly loop.
pub(crate) trait Tokenize {
    fn start_record(&mut self, input: &mut InputBuffer)
        -> Result<StartOfRecord>;
    fn next_field(
        &mut self,
        input: &mut InputBuffer,
        out: &mut Vec<u8>,
        copy: bool,
    ) -> Result<FieldToken>;
    fn set_record_index(&mut self, record: u64);
}

impl Tokenize for Tokenizer {
    fn start_record(
        &mut self,
        input: &mut InputBuffer,
    ) -> Result<StartOfRecord> {
        Tokenizer::start_record(self, input)
    }

    fn next_field(
        &mut self,
        input: &mut InputBuffer,
        out: &mut Vec<u8>,
        copy: bool,
    ) -> Result<FieldToken> {
        Tokenizer::next_field(self, input, out, copy)
    }

    fn set_record_index(&mut self, record: u64) {
        Tokenizer::set_record_index(self, record)
    }
}

impl Tokenize for FixedTokenizer {
    fn start_record(
        &mut self,
        input: &mut InputBuffer,
    ) -> Result<StartOfRecord> {
        FixedTokenizer::start_record(self, input)
    }

    fn next_field(
        &mut self,
        input: &mut InputBuffer,
        out: &mut Vec<u8>,
        copy: bool,
    ) -> Result<FieldToken> {
        FixedTokenizer::next_field(self, input, out, copy)
    }

    fn set_record_index(&mut self, record: u64) {
        FixedTokenizer::set_record_index(self, record)
    }
}

/// Record assembly shared by both parsers: header extraction, column
/// selection, null and empty substitution, limit enforcement and error
/// recovery, over whichever tokenizer drives the run.
struct Run<T: Tokenize> {
    input: InputBuffer,
    tok: T,
    common: CommonSettings,
    plan: Option<SelectionPlan>,
    headers: Option<Vec<Option<String>>>,
    comments: Vec<String>,
    records: u64,
    done: bool,
}

impl<T: Tokenize> Run<T> {
    fn new(
        input: InputBuffer,
        tok: T,
        common: CommonSettings,
        headers: Option<Vec<Option<String>>>,
    ) -> Run<T> {
        Run {
            input,
            tok,
            common,
            plan: None,
            headers,
            comments: Vec::new(),
            records: 0,
            done: false,
        }
    }

    fn begin(&mut self) -> Result<()> {
        if self.common.header_extraction {
            self.extract_headers()?;
        }
        self.resolve_plan_if_ready()
    }

    /// Resolve the selection as soon as enough is known. Name-based
    /// selections resolve against headers at startup (and fail fast without
    /// them); index-based selections without headers wait for the first
    /// record to establish the width.
    fn resolve_plan_if_ready(&mut self) -> Result<()> {
        if self.plan.is_some() {
            return Ok(());
        }
        let needs_width = matches!(
            self.common.selection,
            Selection::Indexes(_) | Selection::ExcludeIndexes(_)
        );
        match self.headers {
            Some(ref headers) => {
                self.plan = Some(SelectionPlan::resolve(
                    &self.common.selection,
                    Some(headers),
                    headers.len(),
                    self.common.column_reordering,
                    self.common.trim_header_names,
                )?);
            }
            None if !needs_width => {
                self.plan = Some(SelectionPlan::resolve(
                    &self.common.selection,
                    None,
                    0,
                    self.common.column_reordering,
                    self.common.trim_header_names,
                )?);
            }
            None => {}
        }
        Ok(())
    }

    fn extract_headers(&mut self) -> Result<()> {
        loop {
            match self.tok.start_record(&mut self.input)? {
                StartOfRecord::End => return Ok(()),
                StartOfRecord::Comment(text) => {
                    self.push_comment(text);
                    continue;
                }
                StartOfRecord::Record => break,
            }
        }
        self.input.mark_record_start();
        self.tok.set_record_index(0);
        let mut headers = Vec::new();
        let mut buf = Vec::new();
        loop {
            self.check_columns(headers.len())?;
            let token = self.tok.next_field(&mut self.input, &mut buf, true)?;
            headers.push(if token.null {
                None
            } else {
                Some(self.utf8(&buf)?)
            });
            if token.record_end {
                break;
            }
        }
        self.input.discard_record();
        self.headers = Some(headers);
        Ok(())
    }

    fn next(
        &mut self,
        handler: &mut Option<Box<dyn ErrorHandler>>,
    ) -> Result<Option<Record>> {
        'record: loop {
            if self.done {
                return Ok(None);
            }
            match self.tok.start_record(&mut self.input)? {
                StartOfRecord::End => {
                    self.done = true;
                    return Ok(None);
                }
                StartOfRecord::Comment(text) => {
                    self.push_comment(text);
                    continue;
                }
                StartOfRecord::Record => {}
            }
            let position = Position::new(
                self.input.current_line() + 1,
                self.input.current_column(),
                self.records,
            );
            self.input.mark_record_start();
            self.tok.set_record_index(self.records);

            let mut fields: Vec<Option<String>> = Vec::new();
            let mut buf = Vec::new();
            loop {
                self.check_columns(fields.len()).map_err(|err| {
                    self.done = true;
                    err
                })?;
                let copy = match self.plan {
                    Some(ref plan) => plan.is_selected(fields.len()),
                    None => true,
                };
                let parsed = self
                    .tok
                    .next_field(&mut self.input, &mut buf, copy)
                    .and_then(|token| {
                        let value = self.field_value(&buf, &token, copy)?;
                        Ok((value, token.record_end))
                    });
                match parsed {
                    Ok((value, record_end)) => {
                        fields.push(value);
                        if record_end {
                            break;
                        }
                    }
                    Err(Error::Parse(err)) => {
                        let recovery = match handler {
                            Some(ref mut h) => h.handle(&err),
                            None => Recovery::Abort,
                        };
                        // Recovery resumes at the next physical line. An
                        // error surfacing after the terminator was already
                        // consumed (e.g. UTF-8 validation of a final field)
                        // must not eat the following line.
                        if !self.input.at_line_start() {
                            self.input.skip_to_newline()?;
                        }
                        self.input.discard_record();
                        match recovery {
                            Recovery::Abort => return Err(err.into()),
                            Recovery::SkipRecord => continue 'record,
                            Recovery::UseValue(value) => {
                                fields.push(value);
                                if let Some(ref headers) = self.headers {
                                    while fields.len() < headers.len() {
                                        fields.push(None);
                                    }
                                }
                                break;
                            }
                        }
                    }
                    Err(fatal) => {
                        self.done = true;
                        return Err(fatal);
                    }
                }
            }
            self.input.discard_record();
            self.records += 1;

            if self.plan.is_none() {
                self.plan = Some(SelectionPlan::resolve(
                    &self.common.selection,
                    None,
                    fields.len(),
                    self.common.column_reordering,
                    self.common.trim_header_names,
                )?);
            }
            let fields = match self.plan {
                Some(ref plan) => plan.arrange(fields),
                None => fields,
            };
            return Ok(Some(Record::new(fields, position)));
        }
    }

    /// Convert one tokenized field into its emitted value, applying UTF-8
    /// validation and the null/empty substitutions. Unselected columns stay
    /// null without substitution.
    fn field_value(
        &self,
        buf: &[u8],
        token: &FieldToken,
        copy: bool,
    ) -> Result<Option<String>> {
        if !copy {
            return Ok(None);
        }
        if token.null {
            return Ok(self.common.null_value.clone());
        }
        let value = self.utf8(buf)?;
        // The empty-value substitution targets explicitly quoted empties
        // (`""`); a zero-length unquoted field stays an empty string.
        if value.is_empty() && token.quoted {
            if let Some(ref empty) = self.common.empty_value {
                return Ok(Some(empty.clone()));
            }
        }
        Ok(Some(value))
    }

    fn utf8(&self, buf: &[u8]) -> Result<String> {
        String::from_utf8(buf.to_vec()).map_err(|_| {
            ParseError::new(
                ParseErrorKind::InvalidUtf8,
                self.position(),
                self.input
                    .current_parsed_content()
                    .map(|raw| String::from_utf8_lossy(raw).into_owned()),
            )
            .into()
        })
    }

    fn check_columns(&self, parsed: usize) -> Result<()> {
        if parsed >= self.common.max_columns {
            return Err(LimitError::new(
                LimitKind::MaxColumns(self.common.max_columns),
                self.position(),
                self.input
                    .current_parsed_content()
                    .map(|raw| String::from_utf8_lossy(raw).into_owned())
                    .unwrap_or_default(),
            )
            .into());
        }
        Ok(())
    }

    fn position(&self) -> Position {
        Position::new(
            self.input.error_line(),
            self.input.current_column(),
            self.records,
        )
    }

    fn push_comment(&mut self, text: Vec<u8>) {
        self.comments
            .push(String::from_utf8_lossy(&text).into_owned());
    }

    fn stop(&mut self) {
        self.input.stop();
        self.done = true;
    }
}

macro_rules! parser_context {
    () => {
        /// The number of physical lines consumed so far.
        pub fn current_line(&self) -> u64 {
            self.run.as_ref().map_or(0, |run| run.input.current_line())
        }

        /// The character offset into the current line.
        pub fn current_column(&self) -> u64 {
            self.run.as_ref().map_or(0, |run| run.input.current_column())
        }

        /// The raw text consumed for the record being parsed, if any.
        pub fn current_parsed_content(&self) -> Option<String> {
            self.run.as_ref().and_then(|run| {
                run.input
                    .current_parsed_content()
                    .map(|raw| String::from_utf8_lossy(raw).into_owned())
            })
        }

        /// The number of records emitted so far in this run.
        pub fn records_parsed(&self) -> u64 {
            self.run.as_ref().map_or(0, |run| run.records)
        }

        /// The header row exactly as parsed, when one is known.
        pub fn parsed_headers(&self) -> Option<&[Option<String>]> {
            self.run
                .as_ref()
                .and_then(|run| run.headers.as_deref())
        }

        /// The header names, trimmed when `trim_header_names` is enabled.
        /// Null headers surface as empty strings.
        pub fn headers(&self) -> Option<Vec<String>> {
            let run = self.run.as_ref()?;
            let headers = run.headers.as_ref()?;
            let trim = run.common.trim_header_names;
            Some(
                headers
                    .iter()
                    .map(|h| {
                        let name = h.as_deref().unwrap_or("");
                        if trim { name.trim().to_string() } else { name.to_string() }
                    })
                    .collect(),
            )
        }

        /// The headers the run emits, projected through the column
        /// selection the same way data rows are.
        pub fn selected_headers(&self) -> Option<Vec<Option<String>>> {
            let run = self.run.as_ref()?;
            let headers = run.headers.as_ref()?;
            Some(match run.plan {
                Some(ref plan) => plan.selected_headers(headers),
                None => headers.clone(),
            })
        }

        /// Every comment line collected so far, in input order.
        pub fn comments(&self) -> &[String] {
            self.run.as_ref().map_or(&[], |run| run.comments.as_slice())
        }

        /// The most recently collected comment line.
        pub fn last_comment(&self) -> Option<&str> {
            self.comments().last().map(String::as_str)
        }

        /// Install a hook consulted on recoverable parse errors. Replaces
        /// any previously installed handler.
        pub fn set_error_handler<H: ErrorHandler + 'static>(&mut self, handler: H) {
            self.handler = Some(Box::new(handler));
        }

        /// Remove the installed error handler; parse errors abort again.
        pub fn clear_error_handler(&mut self) {
            self.handler = None;
        }
    };
}

/// A parser for delimited (CSV/TSV-style) text.
///
/// A parser is configured once and may run many times: each
/// [`begin_parsing`](CsvParser::begin_parsing) starts a fresh run over a new
/// input, [`parse_next`](CsvParser::parse_next) pulls one record at a time,
/// and [`stop_parsing`](CsvParser::stop_parsing) releases the input early.
///
/// ```
/// use flatfile::CsvParser;
///
/// let mut parser = CsvParser::new(Default::default());
/// let records = parser.parse_all("a,b\n1,2\n".as_bytes()).unwrap();
/// assert_eq!(records[0], vec!["a", "b"]);
/// assert_eq!(records[1], vec!["1", "2"]);
/// ```
pub struct CsvParser {
    settings: CsvParserSettings,
    handler: Option<Box<dyn ErrorHandler>>,
    run: Option<Run<Tokenizer>>,
    detected: Option<Format>,
}

impl CsvParser {
    /// Create a parser with the given configuration.
    pub fn new(settings: CsvParserSettings) -> CsvParser {
        CsvParser { settings, handler: None, run: None, detected: None }
    }

    /// The parser's configuration.
    pub fn settings(&self) -> &CsvParserSettings {
        &self.settings
    }

    /// Replace the format between runs. Fails while a run is active.
    pub fn update_format(&mut self, format: Format) -> Result<()> {
        if self.run.is_some() {
            return Err(Error::Config(
                "cannot change the format while a parse run is active"
                    .to_string(),
            ));
        }
        format.validate()?;
        self.settings.format = format;
        Ok(())
    }

    /// Start a run over the given input. Validates the configuration,
    /// performs format detection when enabled, and extracts headers when
    /// configured to.
    pub fn begin_parsing<R>(&mut self, rdr: R) -> Result<()>
    where
        R: io::Read + Send + 'static,
    {
        self.settings.validate()?;
        self.stop_parsing()?;
        let mut input = InputBuffer::new(
            rdr,
            self.settings.common.input_buffer_size,
            self.settings.format.normalized_newline,
            self.settings.common.read_input_on_separate_thread,
        );

        let mut run_settings = self.settings.clone();
        if self.settings.detect_format {
            let sample = input.lookahead(SAMPLE_SIZE)?.to_vec();
            let format = detect_format(
                &sample,
                &self.settings.format,
                &self.settings.detection_candidates,
            );
            format.validate()?;
            self.detected = Some(format.clone());
            run_settings.format = format;
        } else {
            self.detected = None;
        }

        let tok = Tokenizer::new(&run_settings);
        let mut run =
            Run::new(input, tok, run_settings.common.clone(), None);
        run.begin()?;
        self.run = Some(run);
        Ok(())
    }

    /// Pull the next record, or `None` once the input is exhausted.
    pub fn parse_next(&mut self) -> Result<Option<Record>> {
        match self.run {
            Some(ref mut run) => run.next(&mut self.handler),
            None => Err(Error::Config(
                "begin_parsing must be called before parse_next".to_string(),
            )),
        }
    }

    /// End the current run, releasing the input source and stopping the
    /// background prefetch thread if one is active. Idempotent.
    pub fn stop_parsing(&mut self) -> Result<()> {
        if let Some(mut run) = self.run.take() {
            run.stop();
        }
        Ok(())
    }

    /// Parse an entire input in one call.
    pub fn parse_all<R>(&mut self, rdr: R) -> Result<Vec<Record>>
    where
        R: io::Read + Send + 'static,
    {
        self.begin_parsing(rdr)?;
        let mut records = Vec::new();
        let result = loop {
            match self.parse_next() {
                Ok(Some(record)) => records.push(record),
                Ok(None) => break Ok(records),
                Err(err) => break Err(err),
            }
        };
        self.stop_parsing()?;
        result
    }

    /// An iterator over the remaining records of the active run.
    pub fn records(&mut self) -> CsvRecords<'_> {
        CsvRecords { parser: self }
    }

    /// The format chosen by detection for the current run, when detection
    /// is enabled.
    pub fn detected_format(&self) -> Option<&Format> {
        self.detected.as_ref()
    }

    parser_context!();
}

/// Iterator over the records of an active [`CsvParser`] run.
pub struct CsvRecords<'a> {
    parser: &'a mut CsvParser,
}

impl<'a> Iterator for CsvRecords<'a> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Result<Record>> {
        self.parser.parse_next().transpose()
    }
}

/// A parser for fixed-width text.
///
/// Works like [`CsvParser`], but slices records out of the input by
/// character count according to the configured field layout (or the
/// lookahead/lookbehind alternates).
pub struct FixedWidthParser {
    settings: FixedWidthParserSettings,
    handler: Option<Box<dyn ErrorHandler>>,
    run: Option<Run<FixedTokenizer>>,
}

impl FixedWidthParser {
    /// Create a parser with the given configuration.
    pub fn new(settings: FixedWidthParserSettings) -> FixedWidthParser {
        FixedWidthParser { settings, handler: None, run: None }
    }

    /// The parser's configuration.
    pub fn settings(&self) -> &FixedWidthParserSettings {
        &self.settings
    }

    /// Start a run over the given input.
    pub fn begin_parsing<R>(&mut self, rdr: R) -> Result<()>
    where
        R: io::Read + Send + 'static,
    {
        self.settings.validate()?;
        self.stop_parsing()?;
        let input = InputBuffer::new(
            rdr,
            self.settings.common.input_buffer_size,
            self.settings.normalized_newline,
            self.settings.common.read_input_on_separate_thread,
        );
        let tok = FixedTokenizer::new(&self.settings);
        // Without header extraction, named layouts provide the headers.
        let headers = if self.settings.common.header_extraction {
            None
        } else {
            self.settings.fields().names().map(|names| {
                names.into_iter().map(|n| Some(n.to_string())).collect()
            })
        };
        let mut run =
            Run::new(input, tok, self.settings.common.clone(), headers);
        run.begin()?;
        self.run = Some(run);
        Ok(())
    }

    /// Pull the next record, or `None` once the input is exhausted.
    pub fn parse_next(&mut self) -> Result<Option<Record>> {
        match self.run {
            Some(ref mut run) => run.next(&mut self.handler),
            None => Err(Error::Config(
                "begin_parsing must be called before parse_next".to_string(),
            )),
        }
    }

    /// End the current run. Idempotent.
    pub fn stop_parsing(&mut self) -> Result<()> {
        if let Some(mut run) = self.run.take() {
            run.stop();
        }
        Ok(())
    }

    /// Parse an entire input in one call.
    pub fn parse_all<R>(&mut self, rdr: R) -> Result<Vec<Record>>
    where
        R: io::Read + Send + 'static,
    {
        self.begin_parsing(rdr)?;
        let mut records = Vec::new();
        let result = loop {
            match self.parse_next() {
                Ok(Some(record)) => records.push(record),
                Ok(None) => break Ok(records),
                Err(err) => break Err(err),
            }
        };
        self.stop_parsing()?;
        result
    }

    /// An iterator over the remaining records of the active run.
    pub fn records(&mut self) -> FixedWidthRecords<'_> {
        FixedWidthRecords { parser: self }
    }

    parser_context!();
}

/// Iterator over the records of an active [`FixedWidthParser`] run.
pub struct FixedWidthRecords<'a> {
    parser: &'a mut FixedWidthParser,
}

impl<'a> Iterator for FixedWidthRecords<'a> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Result<Record>> {
        self.parser.parse_next().transpose()
    }
}
