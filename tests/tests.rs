use std::io::Cursor;

use flatfile::{
    Alignment, CsvParser, CsvParserSettings, CsvWriter, Error,
    FixedWidthFields, FixedWidthParser, FixedWidthParserSettings,
    FixedWidthWriter, LimitKind, ParseErrorKind, Record, Recovery,
    UnescapedQuoteHandling,
};

fn input(data: &str) -> Cursor<Vec<u8>> {
    Cursor::new(data.as_bytes().to_vec())
}

fn parse(data: &str, settings: CsvParserSettings) -> Vec<Record> {
    let mut parser = CsvParser::new(settings);
    parser.parse_all(input(data)).unwrap()
}

fn parse_fixed(data: &str, settings: FixedWidthParserSettings) -> Vec<Record> {
    let mut parser = FixedWidthParser::new(settings);
    parser.parse_all(input(data)).unwrap()
}

#[test]
fn matches_a_naive_splitter_on_quote_free_input() {
    let inputs = [
        "a,b,c\n1,2,3",
        "a,,c\n,,\nx,y,z\n",
        "one\ntwo\nthree",
        "  spaced , fields ,kept",
        "trailing,comma,\n",
        "",
    ];
    for data in inputs {
        let mut settings = CsvParserSettings::new();
        settings
            .ignore_leading_whitespace(false)
            .ignore_trailing_whitespace(false)
            .skip_empty_lines(false);
        settings.format_mut().comment(None);
        let got: Vec<Vec<String>> = parse(data, settings)
            .into_iter()
            .map(|rec| rec.to_vec())
            .collect();

        let mut lines: Vec<&str> = data.split('\n').collect();
        if data.ends_with('\n') {
            lines.pop();
        }
        if data.is_empty() {
            lines.clear();
        }
        let naive: Vec<Vec<String>> = lines
            .iter()
            .map(|line| line.split(',').map(str::to_string).collect())
            .collect();
        assert_eq!(got, naive, "input {:?}", data);
    }
}

#[test]
fn writer_and_parser_round_trip() {
    let rows: Vec<Vec<&str>> = vec![
        vec!["plain", "with,delimiter", "with\"quote", "multi\nline", ""],
        vec!["", "", ""],
    ];
    let settings = CsvParserSettings::new();
    let mut wtr = CsvWriter::new(Vec::new(), &settings).unwrap();
    for row in &rows {
        wtr.write_record(row).unwrap();
    }
    let written = wtr.into_inner();

    let mut settings = CsvParserSettings::new();
    settings.ignore_leading_whitespace(false).ignore_trailing_whitespace(false);
    settings.format_mut().comment(None);
    let mut parser = CsvParser::new(settings);
    let records = parser.parse_all(Cursor::new(written)).unwrap();
    assert_eq!(records.len(), rows.len());
    for (record, row) in records.iter().zip(&rows) {
        assert_eq!(record, row);
    }
}

#[test]
fn round_trip_with_a_distinct_escape_character() {
    let mut settings = CsvParserSettings::new();
    settings
        .format_mut()
        .quote_escape(b'\\')
        .escape_escape(Some(b'\\'));
    let mut wtr = CsvWriter::new(Vec::new(), &settings).unwrap();
    wtr.write_record(&["a\"b", "c\\d"]).unwrap();
    let written = wtr.into_inner();

    let mut parser = CsvParser::new(settings);
    let records = parser.parse_all(Cursor::new(written)).unwrap();
    assert_eq!(records[0], vec!["a\"b", "c\\d"]);
}

#[test]
fn fixed_width_zero_padded_numbers_round_trip() {
    let mut fields = FixedWidthFields::new();
    fields.add_field("n", 3).alignment(Alignment::Right).padding(b'0');
    let settings = FixedWidthParserSettings::new(fields);

    let records = parse_fixed("007", settings.clone());
    assert_eq!(records[0], vec!["7"]);

    let mut wtr = FixedWidthWriter::new(Vec::new(), &settings).unwrap();
    wtr.write_record(&["7"]).unwrap();
    assert_eq!(wtr.into_inner(), b"007\n");
}

#[test]
fn current_line_counts_physical_lines_for_every_terminator() {
    for (data, newline) in [
        ("a,b\n1,2\n3,4", "\n"),
        ("a,b\r\n1,2\r\n3,4", "\r\n"),
        ("a,b\r1,2\r3,4", "\r"),
    ] {
        let mut parser = CsvParser::new(CsvParserSettings::new());
        parser.begin_parsing(input(data)).unwrap();
        parser.parse_next().unwrap().unwrap();
        assert_eq!(parser.current_line(), 1, "terminator {:?}", newline);
        parser.parse_next().unwrap().unwrap();
        assert_eq!(parser.current_line(), 2, "terminator {:?}", newline);
        // The final record has no trailing terminator but still counts.
        parser.parse_next().unwrap().unwrap();
        assert_eq!(parser.current_line(), 3, "terminator {:?}", newline);
        assert!(parser.parse_next().unwrap().is_none());
        assert_eq!(parser.current_line(), 3, "terminator {:?}", newline);
    }
}

#[test]
fn header_extraction_scenario() {
    let mut settings = CsvParserSettings::new();
    settings.header_extraction(true);
    let mut parser = CsvParser::new(settings);
    parser.begin_parsing(input("a,b,c\n1,2,3")).unwrap();
    let row = parser.parse_next().unwrap().unwrap();
    assert_eq!(parser.headers().unwrap(), vec!["a", "b", "c"]);
    assert_eq!(row, vec!["1", "2", "3"]);
    assert!(parser.parse_next().unwrap().is_none());
}

#[test]
fn empty_middle_field_with_tab_delimiter() {
    let mut settings = CsvParserSettings::new();
    settings.format_mut().delimiter("\t");
    let records = parse("A\t\tB", settings);
    assert_eq!(records[0], vec!["A", "", "B"]);
}

#[test]
fn fixed_width_row_at_eof_survives_trailing_char_skipping() {
    let mut settings =
        FixedWidthParserSettings::new(FixedWidthFields::from_widths([1, 1, 1]));
    settings.skip_trailing_chars_until_newline(true);
    let records = parse_fixed("123", settings);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0], vec!["1", "2", "3"]);
}

#[test]
fn detects_semicolons_from_candidates() {
    let mut settings = CsvParserSettings::new();
    settings
        .detect_format(true)
        .detection_candidates([",", ";", "|"]);
    let mut parser = CsvParser::new(settings);
    parser.begin_parsing(input("a;b;c\n1;2;3\n4;5;6")).unwrap();
    assert_eq!(parser.detected_format().unwrap().get_delimiter(), b";");
    let row = parser.parse_next().unwrap().unwrap();
    assert_eq!(row, vec!["a", "b", "c"]);
}

#[test]
fn stop_parsing_with_background_reading_is_safe() {
    let mut big = String::new();
    for i in 0..20_000 {
        big.push_str(&format!("{},{},{}\n", i, i * 2, i * 3));
    }
    let mut settings = CsvParserSettings::new();
    settings
        .read_input_on_separate_thread(true)
        .input_buffer_size(512);

    // Stop mid-run, concurrently with in-flight fills.
    let mut parser = CsvParser::new(settings.clone());
    parser.begin_parsing(input(&big)).unwrap();
    parser.parse_next().unwrap().unwrap();
    parser.stop_parsing().unwrap();

    // Stop after EOF raises nothing.
    let mut parser = CsvParser::new(settings.clone());
    parser.begin_parsing(input("x,y\n")).unwrap();
    while parser.parse_next().unwrap().is_some() {}
    parser.stop_parsing().unwrap();
    parser.stop_parsing().unwrap();

    // Background and synchronous runs agree.
    let sync = parse(&big, CsvParserSettings::new());
    let mut parser = CsvParser::new(settings);
    let background = parser.parse_all(input(&big)).unwrap();
    assert_eq!(background.len(), sync.len());
    assert_eq!(background.first(), sync.first());
    assert_eq!(background.last(), sync.last());
}

#[test]
fn max_chars_per_column_stops_at_the_limit() {
    let mut settings = CsvParserSettings::new();
    settings.max_chars_per_column(8);
    let mut parser = CsvParser::new(settings);
    let err = parser
        .parse_all(input("short,also\nabcdefghijklmnop,x"))
        .unwrap_err();
    match err {
        Error::Limit(err) => {
            assert_eq!(*err.kind(), LimitKind::MaxCharsPerColumn(8));
            // Captured content never grows past the limit.
            assert_eq!(err.content(), "abcdefgh");
        }
        other => panic!("expected limit error, got {}", other),
    }
}

#[test]
fn max_columns_is_fatal() {
    let mut settings = CsvParserSettings::new();
    settings.max_columns(2);
    let mut parser = CsvParser::new(settings);
    let err = parser.parse_all(input("a,b,c\n")).unwrap_err();
    assert!(!err.is_recoverable());
    match err {
        Error::Limit(err) => {
            assert_eq!(*err.kind(), LimitKind::MaxColumns(2));
        }
        other => panic!("expected limit error, got {}", other),
    }
}

#[test]
fn selection_by_name_reorders_columns() {
    let mut settings = CsvParserSettings::new();
    settings.header_extraction(true).select_fields(["c", "a"]);
    let mut parser = CsvParser::new(settings);
    parser.begin_parsing(input("a,b,c\n1,2,3\n4,5,6")).unwrap();
    assert_eq!(parser.parse_next().unwrap().unwrap(), vec!["3", "1"]);
    assert_eq!(parser.parse_next().unwrap().unwrap(), vec!["6", "4"]);
    assert_eq!(
        parser.selected_headers().unwrap(),
        vec![Some("c".to_string()), Some("a".to_string())]
    );
}

#[test]
fn selection_without_reordering_nulls_unselected_slots() {
    let mut settings = CsvParserSettings::new();
    settings.select_indexes([0, 2]).column_reordering(false);
    let records = parse("1,2,3", settings);
    assert_eq!(
        records[0].fields(),
        &[Some("1".to_string()), None, Some("3".to_string())]
    );
}

#[test]
fn exclusion_by_index() {
    let mut settings = CsvParserSettings::new();
    settings.exclude_indexes([1]);
    let records = parse("1,2,3", settings);
    assert_eq!(records[0], vec!["1", "3"]);
}

#[test]
fn null_and_empty_substitution() {
    let mut settings = CsvParserSettings::new();
    settings
        .unescaped_quote_handling(UnescapedQuoteHandling::SkipValue)
        .null_value(Some("N/A"))
        .empty_value(Some("?"));
    let records = parse("\"a\"junk,\"\",plain", settings);
    assert_eq!(records[0], vec!["N/A", "?", "plain"]);
}

#[test]
fn error_handler_skips_bad_records() {
    let mut settings = CsvParserSettings::new();
    settings.unescaped_quote_handling(UnescapedQuoteHandling::RaiseError);
    let mut parser = CsvParser::new(settings);
    parser.set_error_handler(|err: &flatfile::ParseError| {
        assert_eq!(*err.kind(), ParseErrorKind::UnescapedQuote);
        Recovery::SkipRecord
    });
    parser.begin_parsing(input("ok,1\n\"bad\"x,2\nfin,3\n")).unwrap();
    let mut rows = Vec::new();
    while let Some(rec) = parser.parse_next().unwrap() {
        rows.push(rec.to_vec());
    }
    assert_eq!(rows, vec![vec!["ok", "1"], vec!["fin", "3"]]);
}

#[test]
fn error_handler_substitutes_a_value() {
    let mut settings = CsvParserSettings::new();
    settings
        .header_extraction(true)
        .unescaped_quote_handling(UnescapedQuoteHandling::RaiseError);
    let mut parser = CsvParser::new(settings);
    parser.set_error_handler(|_: &flatfile::ParseError| {
        Recovery::UseValue(Some("replaced".to_string()))
    });
    parser
        .begin_parsing(input("h1,h2\n\"bad\"x,2\nfin,3\n"))
        .unwrap();
    let rec = parser.parse_next().unwrap().unwrap();
    // The substituted field keeps the record; the unparsed rest is null.
    assert_eq!(
        rec.fields(),
        &[Some("replaced".to_string()), None]
    );
    assert_eq!(parser.parse_next().unwrap().unwrap(), vec!["fin", "3"]);
}

#[test]
fn parse_errors_abort_without_a_handler() {
    let mut settings = CsvParserSettings::new();
    settings.unescaped_quote_handling(UnescapedQuoteHandling::RaiseError);
    let mut parser = CsvParser::new(settings);
    parser.begin_parsing(input("\"bad\"x,2\n")).unwrap();
    let err = parser.parse_next().unwrap_err();
    assert!(err.is_recoverable());
    match err {
        Error::Parse(err) => {
            assert_eq!(*err.kind(), ParseErrorKind::UnescapedQuote);
            assert_eq!(err.position().line(), 1);
            assert!(err.content().is_some());
        }
        other => panic!("expected parse error, got {}", other),
    }
}

#[test]
fn invalid_utf8_is_a_recoverable_parse_error() {
    let data = vec![b'o', b'k', b'\n', 0xFF, 0xFE, b'\n', b'f', b'i', b'n'];
    let mut parser = CsvParser::new(CsvParserSettings::new());
    parser.set_error_handler(|err: &flatfile::ParseError| {
        assert_eq!(*err.kind(), ParseErrorKind::InvalidUtf8);
        Recovery::SkipRecord
    });
    parser.begin_parsing(Cursor::new(data)).unwrap();
    let mut rows = Vec::new();
    while let Some(rec) = parser.parse_next().unwrap() {
        rows.push(rec.to_vec());
    }
    assert_eq!(rows, vec![vec!["ok"], vec!["fin"]]);
}

#[test]
fn comments_are_collected_not_parsed() {
    let mut parser = CsvParser::new(CsvParserSettings::new());
    parser
        .begin_parsing(input("# first\na,b\n  # second\nc,d\n"))
        .unwrap();
    assert_eq!(parser.parse_next().unwrap().unwrap(), vec!["a", "b"]);
    assert_eq!(parser.comments(), &["first".to_string()]);
    assert_eq!(parser.parse_next().unwrap().unwrap(), vec!["c", "d"]);
    assert_eq!(parser.last_comment(), Some("second"));
    assert_eq!(parser.comments().len(), 2);
}

#[test]
fn update_format_between_runs() {
    let mut parser = CsvParser::new(CsvParserSettings::new());
    let records = parser.parse_all(input("a,b\n")).unwrap();
    assert_eq!(records[0], vec!["a", "b"]);

    let mut format = flatfile::Format::new();
    format.delimiter("||");
    parser.update_format(format).unwrap();
    let records = parser.parse_all(input("a||b,c\n")).unwrap();
    assert_eq!(records[0], vec!["a", "b,c"]);

    // Swapping the format mid-run is refused.
    parser.begin_parsing(input("x||y\n")).unwrap();
    assert!(parser.update_format(flatfile::Format::new()).is_err());
}

#[test]
fn config_errors_are_raised_at_begin() {
    let mut settings = CsvParserSettings::new();
    settings.format_mut().delimiter("\"");
    let mut parser = CsvParser::new(settings);
    match parser.begin_parsing(input("a,b\n")) {
        Err(Error::Config(_)) => {}
        other => panic!("expected config error, got {:?}", other.map(|_| ())),
    }

    // Selecting by name without headers is caught before parsing too.
    let mut settings = CsvParserSettings::new();
    settings.select_fields(["name"]);
    let mut parser = CsvParser::new(settings);
    assert!(matches!(
        parser.begin_parsing(input("a,b\n")),
        Err(Error::Config(_))
    ));
}

#[test]
fn fixed_width_named_fields_support_selection() {
    let mut fields = FixedWidthFields::new();
    fields.add_field("id", 3);
    fields.add_field("name", 5);
    fields.add_field("flag", 1);
    let mut settings = FixedWidthParserSettings::new(fields);
    settings.select_fields(["flag", "id"]);
    let records = parse_fixed("001abcd Y\n002efgh N\n", settings);
    assert_eq!(records[0], vec!["Y", "001"]);
    assert_eq!(records[1], vec!["N", "002"]);
}

#[test]
fn fixed_width_layout_switching_end_to_end() {
    let mut settings =
        FixedWidthParserSettings::new(FixedWidthFields::from_widths([4, 4]));
    settings.add_format_for_lookahead(
        "H",
        FixedWidthFields::from_widths([1, 7]),
    );
    settings.add_format_for_lookbehind(
        "H",
        FixedWidthFields::from_widths([2, 6]),
    );
    let records =
        parse_fixed("Htitle  \nab012345\ncdefghij\n", settings);
    assert_eq!(records[0], vec!["H", "title"]);
    assert_eq!(records[1], vec!["ab", "012345"]);
    assert_eq!(records[2], vec!["cdef", "ghij"]);
}

#[test]
fn fixed_width_writer_round_trips_records() {
    let mut fields = FixedWidthFields::new();
    fields.add_field("a", 5);
    fields.add_field("b", 5).alignment(Alignment::Right);
    let settings = FixedWidthParserSettings::new(fields);

    let mut wtr = FixedWidthWriter::new(Vec::new(), &settings).unwrap();
    wtr.write_record(&["hi", "42"]).unwrap();
    wtr.write_record(&["there", "7"]).unwrap();
    let written = wtr.into_inner();
    assert_eq!(written, b"hi      42\nthere    7\n");

    let mut parser = FixedWidthParser::new(settings);
    let records = parser.parse_all(Cursor::new(written)).unwrap();
    assert_eq!(records[0], vec!["hi", "42"]);
    assert_eq!(records[1], vec!["there", "7"]);
}

#[test]
fn record_iterator_adapter() {
    let mut parser = CsvParser::new(CsvParserSettings::new());
    parser.begin_parsing(input("a,b\nc,d\n")).unwrap();
    let rows: Vec<Vec<String>> = parser
        .records()
        .map(|rec| rec.unwrap().to_vec())
        .collect();
    assert_eq!(rows, vec![vec!["a", "b"], vec!["c", "d"]]);
}

#[test]
fn positions_identify_records() {
    let mut parser = CsvParser::new(CsvParserSettings::new());
    parser.begin_parsing(input("a,b\n\n\nc,d\n")).unwrap();
    let first = parser.parse_next().unwrap().unwrap();
    assert_eq!(first.position().line(), 1);
    assert_eq!(first.position().record(), 0);
    let second = parser.parse_next().unwrap().unwrap();
    assert_eq!(second.position().line(), 4);
    assert_eq!(second.position().record(), 1);
}
