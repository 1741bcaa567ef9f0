use crate::buffer::InputBuffer;
use crate::error::{
    LimitError, LimitKind, ParseError, ParseErrorKind, Position, Result,
};
use crate::settings::{CsvParserSettings, UnescapedQuoteHandling};

/// What the tokenizer found at the start of a record.
pub(crate) enum StartOfRecord {
    /// A record begins at the current position.
    Record,
    /// A whole comment line was consumed; its text (after the marker) is
    /// returned.
    Comment(Vec<u8>),
    /// The input is exhausted.
    End,
}

/// The outcome of tokenizing one field.
#[derive(Debug, Eq, PartialEq)]
pub(crate) struct FieldToken {
    /// The field carries no value at all (e.g. the `SkipValue` policy).
    pub(crate) null: bool,
    /// The value was enclosed in quotes.
    pub(crate) quoted: bool,
    /// This field also ends the record.
    pub(crate) record_end: bool,
}

/// The delimited-format field state machine.
///
/// Consumes normalized characters from an [`InputBuffer`] and emits one
/// field at a time into a caller-provided buffer, applying the configured
/// quoting, escaping, whitespace and unescaped-quote rules. Per-field
/// outcomes are values, never control-flow exceptions: a recoverable
/// problem surfaces as `Error::Parse`, a limit violation as `Error::Limit`.
pub(crate) struct Tokenizer {
    delimiter: Vec<u8>,
    quote: u8,
    quote_escape: u8,
    escape_escape: Option<u8>,
    comment: Option<u8>,
    newline: u8,
    policy: UnescapedQuoteHandling,
    ignore_leading: bool,
    ignore_trailing: bool,
    trim_quoted: bool,
    keep_quotes: bool,
    keep_escapes: bool,
    skip_empty_lines: bool,
    max_chars: usize,
    record_index: u64,
    /// Raw text of the quoted value being parsed, captured only under the
    /// `BackToDelimiter` policy so the value can be re-read as unquoted.
    raw_field: Vec<u8>,
}

impl Tokenizer {
    pub(crate) fn new(settings: &CsvParserSettings) -> Tokenizer {
        Tokenizer {
            delimiter: settings.format.delimiter.clone(),
            quote: settings.format.quote,
            quote_escape: settings.format.quote_escape,
            escape_escape: settings.format.escape_escape,
            comment: settings.format.comment,
            newline: settings.format.normalized_newline,
            policy: settings.quote_handling,
            ignore_leading: settings.common.ignore_leading_whitespace,
            ignore_trailing: settings.common.ignore_trailing_whitespace,
            trim_quoted: settings.trim_quoted_values,
            keep_quotes: settings.keep_quotes,
            keep_escapes: settings.keep_escape_sequences,
            skip_empty_lines: settings.common.skip_empty_lines,
            max_chars: settings.common.max_chars_per_column,
            record_index: 0,
            raw_field: Vec::new(),
        }
    }

    pub(crate) fn set_record_index(&mut self, record: u64) {
        self.record_index = record;
    }

    /// Position the input at the start of the next record, consuming
    /// skipped empty lines. Comment lines are consumed whole and returned
    /// one at a time.
    pub(crate) fn start_record(
        &mut self,
        input: &mut InputBuffer,
    ) -> Result<StartOfRecord> {
        loop {
            match input.peek_char()? {
                None => {
                    // Lets the buffer settle its final line accounting.
                    input.next_char()?;
                    return Ok(StartOfRecord::End);
                }
                Some(c) if c == self.newline => {
                    if self.skip_empty_lines {
                        input.next_char()?;
                        continue;
                    }
                    return Ok(StartOfRecord::Record);
                }
                Some(_) => {}
            }
            if let Some(marker) = self.comment {
                let (ws, first) = peek_after_whitespace(input, None)?;
                if first == Some(marker) {
                    input.consume_known(ws);
                    input.next_char()?;
                    return Ok(StartOfRecord::Comment(self.read_comment(input)?));
                }
            }
            return Ok(StartOfRecord::Record);
        }
    }

    fn read_comment(&mut self, input: &mut InputBuffer) -> Result<Vec<u8>> {
        let mut text = Vec::new();
        loop {
            match input.next_char()? {
                None => break,
                Some(c) if c == self.newline => break,
                Some(c) => text.push(c),
            }
        }
        while text.first() == Some(&b' ') {
            text.remove(0);
        }
        while matches!(text.last(), Some(&b' ') | Some(&b'\t')) {
            text.pop();
        }
        Ok(text)
    }

    /// Tokenize one field into `out`. When `copy` is false the value is
    /// consumed and validated but not stored, which lets selected-out
    /// columns skip the append entirely.
    pub(crate) fn next_field(
        &mut self,
        input: &mut InputBuffer,
        out: &mut Vec<u8>,
        copy: bool,
    ) -> Result<FieldToken> {
        out.clear();

        if self.eat_delimiter(input)? {
            return Ok(self.token(false, false, false));
        }
        match input.peek_char()? {
            None => {
                input.next_char()?;
                return Ok(self.token(false, false, true));
            }
            Some(c) if c == self.newline => {
                input.next_char()?;
                return Ok(self.token(false, false, true));
            }
            Some(_) => {}
        }

        let (ws, first) = peek_after_whitespace(input, Some(&self.delimiter))?;
        if first == Some(self.quote) {
            // Quoting engages on the first non-whitespace character of the
            // field; whatever whitespace precedes the quote is dropped.
            input.consume_known(ws);
            input.next_char()?;
            return self.quoted_field(input, out, copy);
        }
        if ws > 0 && self.ignore_leading {
            input.consume_known(ws);
        }
        self.unquoted_field(input, out, copy)
    }

    fn unquoted_field(
        &mut self,
        input: &mut InputBuffer,
        out: &mut Vec<u8>,
        copy: bool,
    ) -> Result<FieldToken> {
        let mut len = 0usize;
        let mut kept = 0usize;
        loop {
            if self.eat_delimiter(input)? {
                return Ok(self.finish_unquoted(out, kept, false));
            }
            let c = match input.peek_char()? {
                None => {
                    input.next_char()?;
                    return Ok(self.finish_unquoted(out, kept, true));
                }
                Some(c) if c == self.newline => {
                    input.next_char()?;
                    return Ok(self.finish_unquoted(out, kept, true));
                }
                Some(c) => c,
            };
            if c == self.quote && len > 0 {
                // An unescaped quote after unquoted content started.
                match self.policy {
                    UnescapedQuoteHandling::RaiseError => {
                        return Err(self.unescaped_quote_error(input).into());
                    }
                    UnescapedQuoteHandling::SkipValue => {
                        out.clear();
                        let record_end = self.skip_value(input, len)?;
                        return Ok(self.token(true, false, record_end));
                    }
                    // The remaining policies read the quote literally.
                    _ => {}
                }
            }
            self.check_limit(input, out, len)?;
            input.next_char()?;
            len += 1;
            if copy {
                out.push(c);
                if !self.ignore_trailing || !is_space(c) {
                    kept = out.len();
                }
            }
        }
    }

    fn finish_unquoted(
        &self,
        out: &mut Vec<u8>,
        kept: usize,
        record_end: bool,
    ) -> FieldToken {
        if self.ignore_trailing {
            out.truncate(kept);
        }
        self.token(false, false, record_end)
    }

    fn quoted_field(
        &mut self,
        input: &mut InputBuffer,
        out: &mut Vec<u8>,
        copy: bool,
    ) -> Result<FieldToken> {
        let capture = self.policy == UnescapedQuoteHandling::BackToDelimiter;
        if capture {
            self.raw_field.clear();
            self.raw_field.push(self.quote);
        }
        let mut len = 0usize;
        if self.keep_quotes {
            self.push(input, out, &mut len, self.quote, copy)?;
        }
        loop {
            let c = match input.peek_char()? {
                // EOF inside quotes: surface the value read so far rather
                // than losing the record.
                None => {
                    input.next_char()?;
                    return Ok(self.finish_quoted(out, false, true));
                }
                Some(c) => c,
            };
            if let Some(ee) = self.escape_escape {
                if c == ee && self.quote_escape != self.quote {
                    input.next_char()?;
                    if capture {
                        self.raw_field.push(c);
                    }
                    if input.peek_char()? == Some(self.quote_escape) {
                        input.next_char()?;
                        if capture {
                            self.raw_field.push(self.quote_escape);
                        }
                        if self.keep_escapes {
                            self.push(input, out, &mut len, ee, copy)?;
                        }
                        self.push(input, out, &mut len, self.quote_escape, copy)?;
                    } else {
                        self.push(input, out, &mut len, c, copy)?;
                    }
                    continue;
                }
            }
            if c == self.quote_escape && self.quote_escape == self.quote {
                // Either a doubled-quote escape or the closing quote.
                input.next_char()?;
                if capture {
                    self.raw_field.push(c);
                }
                if input.peek_char()? == Some(self.quote) {
                    input.next_char()?;
                    if capture {
                        self.raw_field.push(self.quote);
                    }
                    if self.keep_escapes {
                        self.push(input, out, &mut len, self.quote, copy)?;
                    }
                    self.push(input, out, &mut len, self.quote, copy)?;
                } else {
                    if self.keep_quotes {
                        self.push(input, out, &mut len, self.quote, copy)?;
                    }
                    return self.after_quoted_value(input, out, copy, len);
                }
                continue;
            }
            if c == self.quote_escape {
                // Distinct escape character.
                input.next_char()?;
                if capture {
                    self.raw_field.push(c);
                }
                if input.peek_char()? == Some(self.quote) {
                    input.next_char()?;
                    if capture {
                        self.raw_field.push(self.quote);
                    }
                    if self.keep_escapes {
                        self.push(input, out, &mut len, c, copy)?;
                    }
                    self.push(input, out, &mut len, self.quote, copy)?;
                } else {
                    // A lone escape character is literal content.
                    self.push(input, out, &mut len, c, copy)?;
                }
                continue;
            }
            if c == self.quote {
                input.next_char()?;
                if capture {
                    self.raw_field.push(c);
                }
                if self.keep_quotes {
                    self.push(input, out, &mut len, c, copy)?;
                }
                return self.after_quoted_value(input, out, copy, len);
            }
            // Delimiters and newlines lose their meaning inside quotes.
            self.check_limit(input, out, len)?;
            input.next_char()?;
            if capture {
                self.raw_field.push(c);
            }
            len += 1;
            if copy {
                out.push(c);
            }
        }
    }

    /// A quoted value apparently closed; whitespace may separate it from
    /// the delimiter. Anything else triggers the unescaped-quote policy.
    fn after_quoted_value(
        &mut self,
        input: &mut InputBuffer,
        out: &mut Vec<u8>,
        copy: bool,
        mut len: usize,
    ) -> Result<FieldToken> {
        loop {
            if self.eat_delimiter(input)? {
                return Ok(self.finish_quoted(out, false, false));
            }
            match input.peek_char()? {
                None => {
                    input.next_char()?;
                    return Ok(self.finish_quoted(out, false, true));
                }
                Some(c) if c == self.newline => {
                    input.next_char()?;
                    return Ok(self.finish_quoted(out, false, true));
                }
                Some(c) if is_space(c) => {
                    input.next_char()?;
                }
                Some(_) => break,
            }
        }
        match self.policy {
            UnescapedQuoteHandling::RaiseError => {
                Err(self.unescaped_quote_error(input).into())
            }
            UnescapedQuoteHandling::StopAtClosingQuote => {
                let record_end = self.skip_value(input, len)?;
                Ok(self.finish_quoted(out, false, record_end))
            }
            UnescapedQuoteHandling::StopAtDelimiter => {
                let record_end =
                    self.read_literal_tail(input, out, copy, &mut len)?;
                Ok(self.finish_quoted(out, false, record_end))
            }
            UnescapedQuoteHandling::SkipValue => {
                out.clear();
                let record_end = self.skip_value(input, len)?;
                Ok(self.token(true, true, record_end))
            }
            UnescapedQuoteHandling::BackToDelimiter => {
                // Rewind to the delimiter and re-read the raw text as an
                // unquoted value, quotes and escapes included literally.
                out.clear();
                if self.raw_field.len() > self.max_chars {
                    return Err(self.limit_error(input, out).into());
                }
                if copy {
                    out.extend_from_slice(&self.raw_field);
                }
                let mut len = self.raw_field.len();
                let record_end =
                    self.read_literal_tail(input, out, copy, &mut len)?;
                Ok(self.finish_quoted(out, false, record_end))
            }
        }
    }

    /// Append everything up to the next delimiter or record boundary.
    fn read_literal_tail(
        &mut self,
        input: &mut InputBuffer,
        out: &mut Vec<u8>,
        copy: bool,
        len: &mut usize,
    ) -> Result<bool> {
        loop {
            if self.eat_delimiter(input)? {
                return Ok(false);
            }
            match input.peek_char()? {
                None => {
                    input.next_char()?;
                    return Ok(true);
                }
                Some(c) if c == self.newline => {
                    input.next_char()?;
                    return Ok(true);
                }
                Some(c) => {
                    self.check_limit(input, out, *len)?;
                    input.next_char()?;
                    *len += 1;
                    if copy {
                        out.push(c);
                    }
                }
            }
        }
    }

    /// Consume and discard everything up to the next delimiter or record
    /// boundary, still enforcing the per-column character limit.
    fn skip_value(
        &mut self,
        input: &mut InputBuffer,
        mut len: usize,
    ) -> Result<bool> {
        loop {
            if self.eat_delimiter(input)? {
                return Ok(false);
            }
            match input.peek_char()? {
                None => {
                    input.next_char()?;
                    return Ok(true);
                }
                Some(c) if c == self.newline => {
                    input.next_char()?;
                    return Ok(true);
                }
                Some(_) => {
                    if len >= self.max_chars {
                        return Err(self
                            .limit_error(input, &Vec::new())
                            .into());
                    }
                    input.next_char()?;
                    len += 1;
                }
            }
        }
    }

    fn finish_quoted(
        &self,
        out: &mut Vec<u8>,
        null: bool,
        record_end: bool,
    ) -> FieldToken {
        if self.trim_quoted {
            while matches!(out.last(), Some(&c) if is_space(c)) {
                out.pop();
            }
            let lead = out.iter().take_while(|&&c| is_space(c)).count();
            if lead > 0 {
                out.drain(..lead);
            }
        }
        self.token(null, true, record_end)
    }

    fn eat_delimiter(&self, input: &mut InputBuffer) -> Result<bool> {
        if input.starts_with(&self.delimiter)? {
            input.consume_known(self.delimiter.len());
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn push(
        &self,
        input: &mut InputBuffer,
        out: &mut Vec<u8>,
        len: &mut usize,
        c: u8,
        copy: bool,
    ) -> Result<()> {
        self.check_limit(input, out, *len)?;
        *len += 1;
        if copy {
            out.push(c);
        }
        Ok(())
    }

    /// Enforced before the character that would exceed the limit is
    /// consumed, so the captured content never grows past the maximum.
    fn check_limit(
        &self,
        input: &InputBuffer,
        out: &[u8],
        len: usize,
    ) -> Result<()> {
        if len >= self.max_chars {
            Err(self.limit_error(input, out).into())
        } else {
            Ok(())
        }
    }

    fn limit_error(&self, input: &InputBuffer, out: &[u8]) -> LimitError {
        LimitError::new(
            LimitKind::MaxCharsPerColumn(self.max_chars),
            self.position(input),
            String::from_utf8_lossy(out).into_owned(),
        )
    }

    fn unescaped_quote_error(&self, input: &InputBuffer) -> ParseError {
        ParseError::new(
            ParseErrorKind::UnescapedQuote,
            self.position(input),
            input
                .current_parsed_content()
                .map(|raw| String::from_utf8_lossy(raw).into_owned()),
        )
    }

    fn position(&self, input: &InputBuffer) -> Position {
        Position::new(
            input.error_line(),
            input.current_column(),
            self.record_index,
        )
    }

    fn token(&self, null: bool, quoted: bool, record_end: bool) -> FieldToken {
        FieldToken { null, quoted, record_end }
    }
}

fn is_space(c: u8) -> bool {
    c == b' ' || c == b'\t'
}

/// Measure the run of whitespace ahead of the cursor and peek at the first
/// byte after it, without consuming anything. Bytes that could begin the
/// delimiter are not treated as whitespace so a tab delimiter is never
/// swallowed by whitespace skipping.
fn peek_after_whitespace(
    input: &mut InputBuffer,
    delimiter: Option<&[u8]>,
) -> Result<(usize, Option<u8>)> {
    let excluded = delimiter.and_then(|d| d.first().copied());
    let mut n = 16;
    loop {
        let la = input.lookahead(n)?;
        let run = la
            .iter()
            .position(|&b| !is_space(b) || Some(b) == excluded);
        match run {
            Some(i) => return Ok((i, Some(la[i]))),
            None if la.len() < n => return Ok((la.len(), None)),
            None => n *= 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::CsvParserSettings;
    use std::io::Cursor;

    fn tokenize(
        data: &str,
        settings: &CsvParserSettings,
    ) -> Result<Vec<Vec<Option<String>>>> {
        let mut input = InputBuffer::new(
            Cursor::new(data.as_bytes().to_vec()),
            16,
            settings.format.normalized_newline,
            false,
        );
        let mut tok = Tokenizer::new(settings);
        let mut rows = Vec::new();
        let mut field = Vec::new();
        loop {
            match tok.start_record(&mut input)? {
                StartOfRecord::End => return Ok(rows),
                StartOfRecord::Comment(_) => continue,
                StartOfRecord::Record => {}
            }
            input.mark_record_start();
            let mut row = Vec::new();
            loop {
                let token = tok.next_field(&mut input, &mut field, true)?;
                if token.null {
                    row.push(None);
                } else {
                    row.push(Some(
                        String::from_utf8(field.clone()).unwrap(),
                    ));
                }
                if token.record_end {
                    break;
                }
            }
            input.discard_record();
            rows.push(row);
        }
    }

    fn rows(data: &str, settings: &CsvParserSettings) -> Vec<Vec<Option<String>>> {
        tokenize(data, settings).unwrap()
    }

    fn row(fields: &[&str]) -> Vec<Option<String>> {
        fields.iter().map(|f| Some(f.to_string())).collect()
    }

    #[test]
    fn plain_fields_and_records() {
        let s = CsvParserSettings::new();
        assert_eq!(rows("a,b,c\n1,2,3", &s), vec![row(&["a", "b", "c"]), row(&["1", "2", "3"])]);
        assert_eq!(rows("a,b,", &s), vec![row(&["a", "b", ""])]);
        assert_eq!(rows("a,,c", &s), vec![row(&["a", "", "c"])]);
    }

    #[test]
    fn multi_byte_delimiter_matches_greedily() {
        let mut s = CsvParserSettings::new();
        s.format_mut().delimiter("||");
        assert_eq!(rows("a||b|c||d", &s), vec![row(&["a", "b|c", "d"])]);
    }

    #[test]
    fn quoted_values_span_delimiters_and_newlines() {
        let s = CsvParserSettings::new();
        assert_eq!(
            rows("\"a,b\",\"x\ny\"", &s),
            vec![row(&["a,b", "x\ny"])]
        );
    }

    #[test]
    fn doubled_quote_is_a_literal_quote() {
        let s = CsvParserSettings::new();
        assert_eq!(rows("\"a\"\"b\"", &s), vec![row(&["a\"b"])]);
    }

    #[test]
    fn distinct_escape_character() {
        let mut s = CsvParserSettings::new();
        s.format_mut().quote_escape(b'\\');
        assert_eq!(rows("\"a\\\"b\"", &s), vec![row(&["a\"b"])]);
    }

    #[test]
    fn escape_the_escape() {
        let mut s = CsvParserSettings::new();
        s.format_mut().quote_escape(b'\\').escape_escape(Some(b'!'));
        assert_eq!(rows("\"a!\\b\"", &s), vec![row(&["a\\b"])]);
    }

    #[test]
    fn keep_quotes_and_escape_sequences() {
        let mut s = CsvParserSettings::new();
        s.keep_quotes(true).keep_escape_sequences(true);
        assert_eq!(rows("\"a\"\"b\"", &s), vec![row(&["\"a\"\"b\""])]);
    }

    #[test]
    fn whitespace_trimming_is_single_pass() {
        let s = CsvParserSettings::new();
        assert_eq!(rows("  a b  ,c", &s), vec![row(&["a b", "c"])]);
        let mut keep = CsvParserSettings::new();
        keep.ignore_leading_whitespace(false)
            .ignore_trailing_whitespace(false);
        assert_eq!(rows("  a b  ,c", &keep), vec![row(&["  a b  ", "c"])]);
    }

    #[test]
    fn empty_field_is_preserved_despite_trimming() {
        let mut s = CsvParserSettings::new();
        s.format_mut().delimiter("\t");
        assert_eq!(rows("A\t\tB", &s), vec![row(&["A", "", "B"])]);
    }

    #[test]
    fn empty_lines_are_skipped_by_default() {
        let s = CsvParserSettings::new();
        assert_eq!(
            rows("\n\na,b\n\n\nx,y\n\n", &s),
            vec![row(&["a", "b"]), row(&["x", "y"])]
        );
        let mut emit = CsvParserSettings::new();
        emit.skip_empty_lines(false);
        assert_eq!(
            rows("a\n\nb", &emit),
            vec![row(&["a"]), row(&[""]), row(&["b"])]
        );
    }

    #[test]
    fn comment_lines_are_consumed_whole() {
        let s = CsvParserSettings::new();
        assert_eq!(
            rows("# note\na,b\n  # indented\nc,d", &s),
            vec![row(&["a", "b"]), row(&["c", "d"])]
        );
    }

    #[test]
    fn unescaped_quote_stop_at_delimiter() {
        // Default policy: accumulate literally until the delimiter.
        let s = CsvParserSettings::new();
        assert_eq!(rows("\"a\"b,c", &s), vec![row(&["ab", "c"])]);
    }

    #[test]
    fn unescaped_quote_stop_at_closing_quote() {
        let mut s = CsvParserSettings::new();
        s.unescaped_quote_handling(UnescapedQuoteHandling::StopAtClosingQuote);
        assert_eq!(rows("\"a\"bcd,c", &s), vec![row(&["a", "c"])]);
    }

    #[test]
    fn unescaped_quote_skip_value() {
        let mut s = CsvParserSettings::new();
        s.unescaped_quote_handling(UnescapedQuoteHandling::SkipValue);
        let got = rows("\"a\"bcd,c", &s);
        assert_eq!(got, vec![vec![None, Some("c".to_string())]]);
    }

    #[test]
    fn unescaped_quote_back_to_delimiter() {
        let mut s = CsvParserSettings::new();
        s.unescaped_quote_handling(UnescapedQuoteHandling::BackToDelimiter);
        assert_eq!(rows("\"a\"b,c", &s), vec![row(&["\"a\"b", "c"])]);
    }

    #[test]
    fn unescaped_quote_raise_error() {
        let mut s = CsvParserSettings::new();
        s.unescaped_quote_handling(UnescapedQuoteHandling::RaiseError);
        let err = tokenize("\"a\"b,c", &s).unwrap_err();
        match err {
            crate::Error::Parse(err) => {
                assert_eq!(*err.kind(), ParseErrorKind::UnescapedQuote);
                assert_eq!(err.position().line(), 1);
            }
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn quote_inside_unquoted_content_is_literal_by_default() {
        let s = CsvParserSettings::new();
        assert_eq!(rows("a\"b,c", &s), vec![row(&["a\"b", "c"])]);
    }

    #[test]
    fn max_chars_per_column_is_fatal_and_bounded() {
        let mut s = CsvParserSettings::new();
        s.max_chars_per_column(4);
        let err = tokenize("abcdefgh", &s).unwrap_err();
        match err {
            crate::Error::Limit(err) => {
                assert_eq!(*err.kind(), LimitKind::MaxCharsPerColumn(4));
                assert!(err.content().len() <= 4);
                assert_eq!(err.content(), "abcd");
            }
            other => panic!("expected limit error, got {:?}", other),
        }
    }

    #[test]
    fn trailing_whitespace_after_closing_quote_is_ignored() {
        let s = CsvParserSettings::new();
        assert_eq!(rows("\"a\"  ,b", &s), vec![row(&["a", "b"])]);
    }

    #[test]
    fn trim_quoted_values() {
        let mut s = CsvParserSettings::new();
        s.trim_quoted_values(true);
        assert_eq!(rows("\" a \",b", &s), vec![row(&["a", "b"])]);
    }
}
