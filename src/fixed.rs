use crate::buffer::InputBuffer;
use crate::error::{
    Error, LimitError, LimitKind, ParseError, ParseErrorKind, Position, Result,
};
use crate::settings::FixedWidthParserSettings;
use crate::tokenizer::{FieldToken, StartOfRecord};

/// How a value sits inside its fixed-width slot, which in turn decides
/// which side the padding is stripped from.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Alignment {
    /// Value first, padding after. Trailing padding is stripped.
    Left,
    /// Padding first, value after. Leading padding is stripped.
    Right,
    /// Padding on both sides, both stripped.
    Center,
}

#[derive(Clone, Debug)]
pub(crate) struct FieldSpec {
    pub(crate) name: Option<String>,
    pub(crate) width: usize,
    pub(crate) alignment: Alignment,
    pub(crate) padding: u8,
    pub(crate) keep_padding: Option<bool>,
}

/// The field layout of a fixed-width format: an ordered list of slots, each
/// with a width and optionally a name, an alignment, and a padding
/// character.
///
/// ```
/// use flatfile::{Alignment, FixedWidthFields};
///
/// let mut fields = FixedWidthFields::new();
/// fields
///     .add_field("id", 6)
///     .alignment(Alignment::Right)
///     .padding(b'0');
/// fields.add_field("name", 20);
/// ```
#[derive(Clone, Debug, Default)]
pub struct FixedWidthFields {
    fields: Vec<FieldSpec>,
}

impl FixedWidthFields {
    /// Create an empty layout.
    pub fn new() -> FixedWidthFields {
        FixedWidthFields::default()
    }

    /// Create an anonymous layout from a list of widths.
    pub fn from_widths<I: IntoIterator<Item = usize>>(widths: I) -> FixedWidthFields {
        let mut fields = FixedWidthFields::new();
        for width in widths {
            fields.add_width(width);
        }
        fields
    }

    /// Append a named field of the given width. The alignment, padding and
    /// keep-padding setters apply to the most recently added field.
    pub fn add_field<S: Into<String>>(
        &mut self,
        name: S,
        width: usize,
    ) -> &mut Self {
        self.fields.push(FieldSpec {
            name: Some(name.into()),
            width,
            alignment: Alignment::Left,
            padding: b' ',
            keep_padding: None,
        });
        self
    }

    /// Append an anonymous field of the given width.
    pub fn add_width(&mut self, width: usize) -> &mut Self {
        self.fields.push(FieldSpec {
            name: None,
            width,
            alignment: Alignment::Left,
            padding: b' ',
            keep_padding: None,
        });
        self
    }

    /// Set the alignment of the most recently added field.
    /// The default is [`Alignment::Left`].
    pub fn alignment(&mut self, alignment: Alignment) -> &mut Self {
        if let Some(last) = self.fields.last_mut() {
            last.alignment = alignment;
        }
        self
    }

    /// Set the padding character of the most recently added field.
    /// The default is a space.
    pub fn padding(&mut self, padding: u8) -> &mut Self {
        if let Some(last) = self.fields.last_mut() {
            last.padding = padding;
        }
        self
    }

    /// Keep (or strip) padding for the most recently added field,
    /// overriding the parser-wide setting.
    pub fn keep_padding(&mut self, yes: bool) -> &mut Self {
        if let Some(last) = self.fields.last_mut() {
            last.keep_padding = Some(yes);
        }
        self
    }

    /// The number of fields in the layout.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if the layout has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// The configured widths, in order.
    pub fn widths(&self) -> Vec<usize> {
        self.fields.iter().map(|f| f.width).collect()
    }

    /// The field names, when every field was added with one.
    pub fn names(&self) -> Option<Vec<&str>> {
        self.fields.iter().map(|f| f.name.as_deref()).collect()
    }

    pub(crate) fn specs(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.fields.is_empty() {
            return Err(Error::Config(
                "fixed-width layout must have at least one field".to_string(),
            ));
        }
        if self.fields.iter().any(|f| f.width == 0) {
            return Err(Error::Config(
                "fixed-width fields must be at least 1 character wide".to_string(),
            ));
        }
        Ok(())
    }
}

/// The fixed-width field state machine.
///
/// Each record is sliced out of the input by character count according to
/// the active layout. The layout is chosen per physical line: a line whose
/// leading characters match a lookahead prefix uses that alternate layout;
/// failing that, a line whose *preceding* record matched a lookbehind
/// prefix uses the associated layout; otherwise the default layout applies.
pub(crate) struct FixedTokenizer {
    default_layout: Vec<FieldSpec>,
    lookahead_layouts: Vec<(Vec<u8>, Vec<FieldSpec>)>,
    lookbehind_layouts: Vec<(Vec<u8>, Vec<FieldSpec>)>,
    newline: u8,
    comment: Option<u8>,
    skip_empty_lines: bool,
    ignore_leading: bool,
    ignore_trailing: bool,
    keep_padding: bool,
    skip_trailing_chars: bool,
    record_ends_on_newline: bool,
    max_chars: usize,
    record_index: u64,
    /// Longest prefix any alternate layout needs to inspect.
    max_prefix: usize,
    /// Leading characters of the previous record, for lookbehind matching.
    prev_head: Vec<u8>,
    active: Vec<FieldSpec>,
    field_idx: usize,
    /// The current line or input ended before the layout was filled;
    /// remaining fields are null.
    ended: bool,
}

impl FixedTokenizer {
    pub(crate) fn new(settings: &FixedWidthParserSettings) -> FixedTokenizer {
        let resolve = |fields: &FixedWidthFields| fields.specs().to_vec();
        let max_prefix = settings
            .lookahead_formats
            .iter()
            .chain(&settings.lookbehind_formats)
            .map(|(p, _)| p.len())
            .max()
            .unwrap_or(0);
        FixedTokenizer {
            default_layout: resolve(&settings.fields),
            lookahead_layouts: settings
                .lookahead_formats
                .iter()
                .map(|(p, f)| (p.clone(), resolve(f)))
                .collect(),
            lookbehind_layouts: settings
                .lookbehind_formats
                .iter()
                .map(|(p, f)| (p.clone(), resolve(f)))
                .collect(),
            newline: settings.normalized_newline,
            comment: settings.comment,
            skip_empty_lines: settings.common.skip_empty_lines,
            ignore_leading: settings.common.ignore_leading_whitespace,
            ignore_trailing: settings.common.ignore_trailing_whitespace,
            keep_padding: settings.keep_padding,
            skip_trailing_chars: settings.skip_trailing_chars_until_newline,
            record_ends_on_newline: settings.record_ends_on_newline,
            max_chars: settings.common.max_chars_per_column,
            record_index: 0,
            max_prefix,
            prev_head: Vec::new(),
            active: Vec::new(),
            field_idx: 0,
            ended: false,
        }
    }

    pub(crate) fn set_record_index(&mut self, record: u64) {
        self.record_index = record;
    }

    pub(crate) fn start_record(
        &mut self,
        input: &mut InputBuffer,
    ) -> Result<StartOfRecord> {
        loop {
            match input.peek_char()? {
                None => {
                    input.next_char()?;
                    return Ok(StartOfRecord::End);
                }
                Some(c) if c == self.newline && self.skip_empty_lines => {
                    input.next_char()?;
                    continue;
                }
                Some(_) => {}
            }
            if let Some(marker) = self.comment {
                if input.peek_char()? == Some(marker) {
                    input.next_char()?;
                    return Ok(StartOfRecord::Comment(self.read_comment(input)?));
                }
            }
            self.choose_layout(input)?;
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
        while matches!(text.last(), Some(&b' ') | Some(&b'\t')) {
            text.pop();
        }
        while text.first() == Some(&b' ') {
            text.remove(0);
        }
        Ok(text)
    }

    fn choose_layout(&mut self, input: &mut InputBuffer) -> Result<()> {
        let head = if self.max_prefix > 0 {
            input.lookahead(self.max_prefix)?.to_vec()
        } else {
            Vec::new()
        };
        let mut layout = None;
        for (prefix, alt) in &self.lookahead_layouts {
            if head.starts_with(prefix) {
                layout = Some(alt.clone());
                break;
            }
        }
        if layout.is_none() {
            for (prefix, alt) in &self.lookbehind_layouts {
                if self.prev_head.starts_with(prefix) {
                    layout = Some(alt.clone());
                    break;
                }
            }
        }
        self.active = layout.unwrap_or_else(|| self.default_layout.clone());
        self.prev_head = head;
        self.field_idx = 0;
        self.ended = false;
        Ok(())
    }

    pub(crate) fn next_field(
        &mut self,
        input: &mut InputBuffer,
        out: &mut Vec<u8>,
        copy: bool,
    ) -> Result<FieldToken> {
        out.clear();
        let spec = self.active[self.field_idx].clone();
        let last = self.field_idx + 1 == self.active.len();

        let mut count = 0usize;
        while !self.ended && count < spec.width {
            match input.peek_char()? {
                None => {
                    input.next_char()?;
                    self.ended = true;
                }
                Some(c) if c == self.newline && self.record_ends_on_newline => {
                    input.next_char()?;
                    self.ended = true;
                }
                Some(c) => {
                    if count >= self.max_chars {
                        return Err(LimitError::new(
                            LimitKind::MaxCharsPerColumn(self.max_chars),
                            self.position(input),
                            String::from_utf8_lossy(out).into_owned(),
                        )
                        .into());
                    }
                    input.next_char()?;
                    count += 1;
                    if copy {
                        out.push(c);
                    }
                }
            }
        }

        // A field the line never reached carries no value at all.
        let null = count == 0 && self.ended;
        if !null {
            let keep = spec.keep_padding.unwrap_or(self.keep_padding);
            if !keep {
                self.strip(out, &spec);
            }
        }

        if last {
            if !self.ended {
                self.finish_line(input)?;
            }
            Ok(FieldToken { null, quoted: false, record_end: true })
        } else {
            self.field_idx += 1;
            Ok(FieldToken { null, quoted: false, record_end: false })
        }
    }

    fn strip(&self, out: &mut Vec<u8>, spec: &FieldSpec) {
        let pad = spec.padding;
        match spec.alignment {
            Alignment::Left => strip_trailing(out, pad),
            Alignment::Right => strip_leading(out, pad),
            Alignment::Center => {
                strip_trailing(out, pad);
                strip_leading(out, pad);
            }
        }
        if self.ignore_trailing {
            strip_trailing(out, b' ');
            strip_trailing(out, b'\t');
        }
        if self.ignore_leading {
            strip_leading(out, b' ');
            strip_leading(out, b'\t');
        }
    }

    /// The layout is filled; deal with whatever remains of the line.
    fn finish_line(&mut self, input: &mut InputBuffer) -> Result<()> {
        match input.peek_char()? {
            None => {
                input.next_char()?;
                Ok(())
            }
            Some(c) if c == self.newline => {
                input.next_char()?;
                Ok(())
            }
            Some(_) if !self.record_ends_on_newline => {
                // Records are packed back to back; the next one starts here.
                Ok(())
            }
            Some(_) if self.skip_trailing_chars => input.skip_to_newline(),
            Some(_) => Err(ParseError::new(
                ParseErrorKind::TrailingCharacters,
                self.position(input),
                input
                    .current_parsed_content()
                    .map(|raw| String::from_utf8_lossy(raw).into_owned()),
            )
            .into()),
        }
    }

    fn position(&self, input: &InputBuffer) -> Position {
        Position::new(
            input.error_line(),
            input.current_column(),
            self.record_index,
        )
    }
}

fn strip_trailing(out: &mut Vec<u8>, pad: u8) {
    while out.last() == Some(&pad) {
        out.pop();
    }
}

fn strip_leading(out: &mut Vec<u8>, pad: u8) {
    let lead = out.iter().take_while(|&&c| c == pad).count();
    if lead > 0 {
        out.drain(..lead);
    }
}
