/*!
The `flatfile` crate provides fast, configurable parsing and writing of
flat text formats: delimited data (CSV, TSV and friends) and fixed-width
records.

# Parsing delimited data

A [`CsvParser`] is configured through [`CsvParserSettings`] and pulls one
[`Record`] at a time:

```
use flatfile::{CsvParser, CsvParserSettings};

let data = "\
city,country,pop
Boston,United States,4628910
Concord,United States,42695
";

let mut parser = CsvParser::new({
    let mut settings = CsvParserSettings::new();
    settings.header_extraction(true);
    settings
});
parser.begin_parsing(data.as_bytes()).unwrap();
while let Some(record) = parser.parse_next().unwrap() {
    println!("{:?}", record);
}
assert_eq!(parser.headers().unwrap(), vec!["city", "country", "pop"]);
```

Line endings (`\r`, `\n`, `\r\n`) are normalized transparently, multi-byte
delimiters are supported, and malformed quoting is handled according to a
configurable [`UnescapedQuoteHandling`] policy. When the delimiter is not
known ahead of time, [`CsvParserSettings::detect_format`] infers it (along
with the quote, escape and line separator) from a sample of the input.

# Parsing fixed-width data

A [`FixedWidthParser`] slices records out of the input by character count
according to a [`FixedWidthFields`] layout:

```
use flatfile::{FixedWidthFields, FixedWidthParser, FixedWidthParserSettings};

let mut fields = FixedWidthFields::new();
fields.add_field("name", 8);
fields.add_field("code", 4);

let mut parser = FixedWidthParser::new(FixedWidthParserSettings::new(fields));
let records = parser.parse_all("Boston  0042\nConcord 0007\n".as_bytes()).unwrap();
assert_eq!(records[0], vec!["Boston", "0042"]);
```

Alternate layouts can be switched in per line, keyed on a literal line
prefix (lookahead) or on the prefix of the preceding line (lookbehind).

# Nulls, selection and recovery

Fields are surfaced as `Option<String>`: a null field (a skipped value, an
unfilled fixed-width slot, an unselected column) is distinct from an empty
string. Columns can be selected or excluded by name or index, and an
[`ErrorHandler`] can downgrade record-level parse errors into "skip and
continue" or substitute a value instead of aborting the run.

Large inputs can be prefetched on a background thread with
`read_input_on_separate_thread`, overlapping I/O with parsing.

# Writing

[`CsvWriter`] and [`FixedWidthWriter`] produce output that round-trips
through the corresponding parser: quoting on demand (or always, or never)
for delimited data, padding and alignment for fixed-width data.
*/

#![deny(missing_docs)]

mod buffer;
mod concurrent;
mod detect;
mod error;
mod fixed;
mod reader;
mod record;
mod select;
mod settings;
mod tokenizer;
mod writer;

pub use crate::error::{
    Error, ErrorHandler, LimitError, LimitKind, ParseError, ParseErrorKind,
    Position, Recovery, Result,
};
pub use crate::fixed::{Alignment, FixedWidthFields};
pub use crate::reader::{
    CsvParser, CsvRecords, FixedWidthParser, FixedWidthRecords,
};
pub use crate::record::{Record, RecordIter};
pub use crate::settings::{
    CommonSettings, CsvParserSettings, FixedWidthParserSettings, Format,
    Selection, UnescapedQuoteHandling,
};
pub use crate::writer::{CsvWriter, FixedWidthWriter, QuoteStyle};
