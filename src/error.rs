use std::error;
use std::fmt;
use std::io;
use std::result;

/// A type alias for `Result<T, flatfile::Error>`.
pub type Result<T> = result::Result<T, Error>;

/// A position in the input, used to contextualize errors and records.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Position {
    line: u64,
    column: u64,
    record: u64,
}

impl Position {
    /// Create a new position.
    pub fn new(line: u64, column: u64, record: u64) -> Position {
        Position { line, column, record }
    }

    /// The 1-based physical line in the input.
    pub fn line(&self) -> u64 {
        self.line
    }

    /// The 0-based character offset into the current line.
    pub fn column(&self) -> u64 {
        self.column
    }

    /// The 0-based index of the record being parsed.
    pub fn record(&self) -> u64 {
        self.record
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "line {}, column {}, record {}",
            self.line, self.column, self.record
        )
    }
}

/// An error that can occur while parsing or writing flat text data.
#[derive(Debug)]
pub enum Error {
    /// An I/O error from the underlying source or sink.
    Io(io::Error),
    /// A recoverable, record-level parsing error.
    ///
    /// Unless an error handler downgrades it, a parse error aborts the
    /// current record but not the parser itself.
    Parse(ParseError),
    /// A fatal resource-limit violation. This always aborts the run.
    Limit(LimitError),
    /// A configuration error, raised eagerly before any input is consumed.
    Config(String),
}

impl Error {
    /// Returns true if this error may be intercepted by an error handler.
    ///
    /// Only `Error::Parse` is recoverable; limits, I/O failures and
    /// configuration errors always abort.
    pub fn is_recoverable(&self) -> bool {
        matches!(*self, Error::Parse(_))
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::Io(err)
    }
}

impl From<ParseError> for Error {
    fn from(err: ParseError) -> Error {
        Error::Parse(err)
    }
}

impl From<LimitError> for Error {
    fn from(err: LimitError) -> Error {
        Error::Limit(err)
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match *self {
            Error::Io(ref err) => Some(err),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::Io(ref err) => err.fmt(f),
            Error::Parse(ref err) => err.fmt(f),
            Error::Limit(ref err) => err.fmt(f),
            Error::Config(ref msg) => write!(f, "configuration error: {}", msg),
        }
    }
}

/// The kind of a recoverable parsing error.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ParseErrorKind {
    /// A quote character appeared where the grammar does not allow one and
    /// the active policy is `UnescapedQuoteHandling::RaiseError`.
    UnescapedQuote,
    /// A fixed-width line had characters left over after all configured
    /// fields were consumed and trailing characters are not skipped.
    TrailingCharacters,
    /// A field did not contain valid UTF-8.
    InvalidUtf8,
}

/// A recoverable, record-level parsing error.
///
/// Carries the position of the failure and the raw content accumulated for
/// the offending record so callers can log or display the exact input text.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ParseError {
    kind: ParseErrorKind,
    position: Position,
    content: Option<String>,
}

impl ParseError {
    pub(crate) fn new(
        kind: ParseErrorKind,
        position: Position,
        content: Option<String>,
    ) -> ParseError {
        ParseError { kind, position, content }
    }

    /// The kind of parsing failure.
    pub fn kind(&self) -> &ParseErrorKind {
        &self.kind
    }

    /// The position at which parsing failed.
    pub fn position(&self) -> &Position {
        &self.position
    }

    /// The raw text consumed for the failing record, when available.
    pub fn content(&self) -> Option<&str> {
        self.content.as_deref()
    }
}

impl error::Error for ParseError {}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let what = match self.kind {
            ParseErrorKind::UnescapedQuote => "unescaped quote in value",
            ParseErrorKind::TrailingCharacters => {
                "characters left over after last fixed-width field"
            }
            ParseErrorKind::InvalidUtf8 => "invalid UTF-8 in field",
        };
        match self.content {
            Some(ref content) => {
                write!(f, "parse error ({}): {}: {:?}", self.position, what, content)
            }
            None => write!(f, "parse error ({}): {}", self.position, what),
        }
    }
}

/// The resource limit that was exceeded.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LimitKind {
    /// A record contained more columns than `max_columns`.
    MaxColumns(usize),
    /// A single field grew beyond `max_chars_per_column`.
    MaxCharsPerColumn(usize),
}

/// A fatal resource-limit error.
///
/// These guard against unbounded memory growth on malformed input, e.g. a
/// missing closing quote swallowing the rest of the file into one field.
/// They always abort the run and cannot be downgraded by an error handler.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LimitError {
    kind: LimitKind,
    position: Position,
    content: String,
}

impl LimitError {
    pub(crate) fn new(
        kind: LimitKind,
        position: Position,
        content: String,
    ) -> LimitError {
        LimitError { kind, position, content }
    }

    /// The limit that was exceeded.
    pub fn kind(&self) -> &LimitKind {
        &self.kind
    }

    /// The position at which the limit was hit.
    pub fn position(&self) -> &Position {
        &self.position
    }

    /// The content accumulated up to (and never beyond) the limit.
    pub fn content(&self) -> &str {
        &self.content
    }
}

impl error::Error for LimitError {}

impl fmt::Display for LimitError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.kind {
            LimitKind::MaxColumns(max) => write!(
                f,
                "fatal error ({}): record exceeds the maximum of {} columns",
                self.position, max
            ),
            LimitKind::MaxCharsPerColumn(max) => write!(
                f,
                "fatal error ({}): field exceeds the maximum of {} characters",
                self.position, max
            ),
        }
    }
}

/// What to do with a record that produced a recoverable parse error.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Recovery {
    /// Propagate the error to the caller, aborting the record.
    Abort,
    /// Discard the record and continue with the next line.
    SkipRecord,
    /// Keep the record: the offending field takes the given value and any
    /// fields not yet parsed are left null.
    UseValue(Option<String>),
}

/// A hook consulted when a recoverable parse error occurs.
///
/// Handlers may downgrade record-level errors into "skip and continue" or
/// substitute a value for the offending field. Fatal errors (I/O failures
/// and limit violations) never reach a handler.
pub trait ErrorHandler: Send {
    /// Decide how to recover from the given parse error.
    fn handle(&mut self, error: &ParseError) -> Recovery;
}

impl<F> ErrorHandler for F
where
    F: FnMut(&ParseError) -> Recovery + Send,
{
    fn handle(&mut self, error: &ParseError) -> Recovery {
        (self)(error)
    }
}
