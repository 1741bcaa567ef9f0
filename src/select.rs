use crate::error::{Error, Result};
use crate::settings::Selection;

/// A [`Selection`](crate::Selection) resolved against actual column names
/// or a known record width, fixed for the duration of a parse run.
///
/// The plan answers two questions: whether a parsed column's value needs to
/// be kept at all (unselected columns skip the copy entirely), and how the
/// kept values are arranged in the emitted row. With column reordering the
/// row holds the selected columns in selection order; without it the row
/// keeps the full parsed width and unselected slots are null.
pub(crate) struct SelectionPlan {
    resolved: Resolved,
    reorder: bool,
}

enum Resolved {
    All,
    /// Parsed column indices in selection order.
    Include(Vec<usize>),
    /// Parsed column indices to drop.
    Exclude(Vec<usize>),
}

impl SelectionPlan {
    /// Resolve a selection. Selections by name need `headers`; selections
    /// by index need a known `width`. Name matching takes the first
    /// occurrence when headers repeat.
    pub(crate) fn resolve(
        selection: &Selection,
        headers: Option<&[Option<String>]>,
        width: usize,
        reorder: bool,
        trim_names: bool,
    ) -> Result<SelectionPlan> {
        let resolved = match *selection {
            Selection::All => Resolved::All,
            Selection::Fields(ref names) => {
                Resolved::Include(resolve_names(names, headers, trim_names)?)
            }
            Selection::Indexes(ref indexes) => {
                validate_indexes(indexes, width)?;
                Resolved::Include(indexes.clone())
            }
            Selection::ExcludeFields(ref names) => {
                Resolved::Exclude(resolve_names(names, headers, trim_names)?)
            }
            Selection::ExcludeIndexes(ref indexes) => {
                validate_indexes(indexes, width)?;
                Resolved::Exclude(indexes.clone())
            }
        };
        Ok(SelectionPlan { resolved, reorder })
    }

    /// Whether the value of the parsed column at `i` is kept.
    pub(crate) fn is_selected(&self, i: usize) -> bool {
        match self.resolved {
            Resolved::All => true,
            Resolved::Include(ref indexes) => indexes.contains(&i),
            Resolved::Exclude(ref indexes) => !indexes.contains(&i),
        }
    }

    /// Arrange one parsed row according to the plan.
    pub(crate) fn arrange(
        &self,
        mut parsed: Vec<Option<String>>,
    ) -> Vec<Option<String>> {
        match self.resolved {
            Resolved::All => parsed,
            Resolved::Include(ref indexes) if self.reorder => indexes
                .iter()
                .map(|&i| parsed.get_mut(i).and_then(Option::take))
                .collect(),
            Resolved::Exclude(ref indexes) if self.reorder => parsed
                .into_iter()
                .enumerate()
                .filter(|(i, _)| !indexes.contains(i))
                .map(|(_, field)| field)
                .collect(),
            _ => {
                for (i, field) in parsed.iter_mut().enumerate() {
                    if !self.is_selected(i) {
                        *field = None;
                    }
                }
                parsed
            }
        }
    }

    /// Project the header row the same way data rows are arranged, for
    /// reporting which headers a run actually emits.
    pub(crate) fn selected_headers(
        &self,
        headers: &[Option<String>],
    ) -> Vec<Option<String>> {
        self.arrange(headers.to_vec())
    }
}

fn resolve_names(
    names: &[String],
    headers: Option<&[Option<String>]>,
    trim_names: bool,
) -> Result<Vec<usize>> {
    let headers = headers.ok_or_else(|| {
        Error::Config(
            "selecting columns by name requires headers; enable header \
             extraction or use a fixed-width layout with named fields"
                .to_string(),
        )
    })?;
    let canon = |name: &str| {
        if trim_names {
            name.trim().to_string()
        } else {
            name.to_string()
        }
    };
    let mut indexes = Vec::with_capacity(names.len());
    for name in names {
        let wanted = canon(name);
        let found = headers.iter().position(|h| {
            h.as_deref().map(canon).as_deref() == Some(wanted.as_str())
        });
        match found {
            Some(i) => indexes.push(i),
            None => {
                return Err(Error::Config(format!(
                    "column {:?} not found in headers",
                    name
                )));
            }
        }
    }
    Ok(indexes)
}

fn validate_indexes(indexes: &[usize], width: usize) -> Result<()> {
    for &i in indexes {
        if i >= width {
            return Err(Error::Config(format!(
                "column index {} out of bounds for {} columns",
                i, width
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(names: &[&str]) -> Vec<Option<String>> {
        names.iter().map(|n| Some(n.to_string())).collect()
    }

    fn fields(values: &[&str]) -> Vec<Option<String>> {
        values.iter().map(|v| Some(v.to_string())).collect()
    }

    #[test]
    fn select_by_name_reorders() {
        let hdrs = headers(&["a", "b", "c"]);
        let plan = SelectionPlan::resolve(
            &Selection::Fields(vec!["c".to_string(), "a".to_string()]),
            Some(&hdrs),
            3,
            true,
            false,
        )
        .unwrap();
        assert_eq!(plan.arrange(fields(&["1", "2", "3"])), fields(&["3", "1"]));
        assert!(plan.is_selected(0));
        assert!(!plan.is_selected(1));
    }

    #[test]
    fn without_reordering_unselected_slots_are_null() {
        let plan = SelectionPlan::resolve(
            &Selection::Indexes(vec![0, 2]),
            None,
            3,
            false,
            false,
        )
        .unwrap();
        assert_eq!(
            plan.arrange(fields(&["1", "2", "3"])),
            vec![Some("1".to_string()), None, Some("3".to_string())]
        );
    }

    #[test]
    fn exclusion_keeps_parsed_order() {
        let hdrs = headers(&["a", "b", "c"]);
        let plan = SelectionPlan::resolve(
            &Selection::ExcludeFields(vec!["b".to_string()]),
            Some(&hdrs),
            3,
            true,
            false,
        )
        .unwrap();
        assert_eq!(plan.arrange(fields(&["1", "2", "3"])), fields(&["1", "3"]));
    }

    #[test]
    fn duplicate_headers_resolve_to_the_first_occurrence() {
        let hdrs = headers(&["x", "a", "x"]);
        let plan = SelectionPlan::resolve(
            &Selection::Fields(vec!["x".to_string()]),
            Some(&hdrs),
            3,
            true,
            false,
        )
        .unwrap();
        assert!(plan.is_selected(0));
        assert!(!plan.is_selected(2));
    }

    #[test]
    fn trimmed_header_matching() {
        let hdrs = headers(&[" a ", "b"]);
        let err = SelectionPlan::resolve(
            &Selection::Fields(vec!["a".to_string()]),
            Some(&hdrs),
            2,
            true,
            false,
        );
        assert!(err.is_err());
        let plan = SelectionPlan::resolve(
            &Selection::Fields(vec!["a".to_string()]),
            Some(&hdrs),
            2,
            true,
            true,
        )
        .unwrap();
        assert!(plan.is_selected(0));
    }

    #[test]
    fn unknown_names_and_indexes_are_config_errors() {
        let hdrs = headers(&["a"]);
        assert!(SelectionPlan::resolve(
            &Selection::Fields(vec!["nope".to_string()]),
            Some(&hdrs),
            1,
            true,
            false,
        )
        .is_err());
        assert!(SelectionPlan::resolve(
            &Selection::Indexes(vec![5]),
            None,
            2,
            true,
            false,
        )
        .is_err());
    }

    #[test]
    fn short_records_pad_with_nulls_when_reordering() {
        let plan = SelectionPlan::resolve(
            &Selection::Indexes(vec![0, 2]),
            None,
            3,
            true,
            false,
        )
        .unwrap();
        assert_eq!(
            plan.arrange(fields(&["1"])),
            vec![Some("1".to_string()), None]
        );
    }
}
