use std::fmt;
use std::ops;

use crate::error::Position;

/// A single parsed row.
///
/// Fields are `Option<String>`: `None` represents a null field (a skipped
/// value, an unfilled fixed-width field, or an unselected column when
/// column reordering is disabled), as opposed to an empty string, which is
/// a real, zero-length value.
#[derive(Clone, Eq, PartialEq)]
pub struct Record {
    fields: Vec<Option<String>>,
    position: Position,
}

impl Record {
    pub(crate) fn new(fields: Vec<Option<String>>, position: Position) -> Record {
        Record { fields, position }
    }

    /// The field at the given index, or `None` if the index is out of
    /// bounds or the field is null.
    pub fn get(&self, i: usize) -> Option<&str> {
        self.fields.get(i).and_then(|f| f.as_deref())
    }

    /// The number of fields in this record.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if this record has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// All fields, nulls included.
    pub fn fields(&self) -> &[Option<String>] {
        &self.fields
    }

    /// An iterator over the fields, yielding `None` for null fields.
    pub fn iter(&self) -> impl Iterator<Item = Option<&str>> {
        self.fields.iter().map(|f| f.as_deref())
    }

    /// The position at which this record began.
    pub fn position(&self) -> &Position {
        &self.position
    }

    /// Consume the record, returning its fields.
    pub fn into_fields(self) -> Vec<Option<String>> {
        self.fields
    }

    /// The fields as strings, with null fields rendered as empty strings.
    pub fn to_vec(&self) -> Vec<String> {
        self.fields
            .iter()
            .map(|f| f.clone().unwrap_or_default())
            .collect()
    }
}

impl ops::Index<usize> for Record {
    type Output = str;

    fn index(&self, i: usize) -> &str {
        self.get(i).expect("field index out of bounds or null field")
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_list()
            .entries(self.fields.iter().map(|f| f.as_deref()))
            .finish()
    }
}

impl<'a> IntoIterator for &'a Record {
    type Item = Option<&'a str>;
    type IntoIter = RecordIter<'a>;

    fn into_iter(self) -> RecordIter<'a> {
        RecordIter { fields: &self.fields, i: 0 }
    }
}

/// An iterator over the fields of a [`Record`].
pub struct RecordIter<'a> {
    fields: &'a [Option<String>],
    i: usize,
}

impl<'a> Iterator for RecordIter<'a> {
    type Item = Option<&'a str>;

    fn next(&mut self) -> Option<Option<&'a str>> {
        let field = self.fields.get(self.i)?;
        self.i += 1;
        Some(field.as_deref())
    }
}

/// Compare against a slice of field values, treating every expected value
/// as non-null. Intended for tests and quick assertions.
impl<T: AsRef<str>> PartialEq<Vec<T>> for Record {
    fn eq(&self, other: &Vec<T>) -> bool {
        self.fields.len() == other.len()
            && self
                .fields
                .iter()
                .zip(other.iter())
                .all(|(a, b)| a.as_deref() == Some(b.as_ref()))
    }
}
