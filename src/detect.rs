use crate::settings::Format;

/// Delimiters considered by detection when the caller provides none, in
/// priority order. Earlier candidates win ties.
pub(crate) const DEFAULT_CANDIDATES: &[&[u8]] = &[b",", b"\t", b";", b"|", b":"];

/// How much of the input detection may inspect. The sample is taken by
/// lookahead, so detection never consumes anything.
pub(crate) const SAMPLE_SIZE: usize = 8 * 1024;

const MAX_SAMPLE_LINES: usize = 100;

/// Infer the delimiter, quote, quote escape and line separator from a
/// sample of the input. Characters the sample gives no evidence for keep
/// the values of `base`.
///
/// The delimiter is chosen by scoring each candidate over the sampled
/// lines: a candidate that appears on every line the same number of times
/// scores highest; among equally consistent candidates the one producing
/// narrower fields wins, and remaining ties fall back to candidate order.
/// A candidate that never appears cannot win, so an evidence-free sample
/// yields the first candidate.
pub(crate) fn detect_format(
    sample: &[u8],
    base: &Format,
    candidates: &[Vec<u8>],
) -> Format {
    let mut format = base.clone();
    let owned: Vec<Vec<u8>>;
    let candidates: &[Vec<u8>] = if candidates.is_empty() {
        owned = DEFAULT_CANDIDATES.iter().map(|c| c.to_vec()).collect();
        &owned
    } else {
        candidates
    };

    let (lines, separator) = split_lines(sample, base.comment);
    if let Some(sep) = separator {
        format.line_separator(sep);
    }
    if lines.is_empty() {
        format.delimiter(&candidates[0]);
        return format;
    }

    let quote = detect_quote(&lines, candidates).unwrap_or(base.quote);
    format.quote(quote);

    let mut best = 0;
    let mut best_score = Score::zero();
    for (i, candidate) in candidates.iter().enumerate() {
        let score = score_candidate(&lines, candidate, quote);
        if score.beats(&best_score) {
            best = i;
            best_score = score;
        }
    }
    format.delimiter(&candidates[best]);

    if let Some(escape) = detect_escape(sample, quote) {
        format.quote_escape(escape);
    }
    format
}

/// A candidate's fitness: what fraction of lines carry its modal count,
/// and how narrow the fields it produces are. Compared in that order.
struct Score {
    consistency: f64,
    avg_width: f64,
    appears: bool,
}

impl Score {
    fn zero() -> Score {
        Score { consistency: 0.0, avg_width: f64::MAX, appears: false }
    }

    fn beats(&self, other: &Score) -> bool {
        if self.appears != other.appears {
            return self.appears;
        }
        if self.consistency != other.consistency {
            return self.consistency > other.consistency;
        }
        // Strictly-less keeps earlier candidates on ties.
        self.avg_width < other.avg_width
    }
}

fn score_candidate(lines: &[&[u8]], candidate: &[u8], quote: u8) -> Score {
    let counts: Vec<usize> = lines
        .iter()
        .map(|line| count_outside_quotes(line, candidate, quote))
        .collect();
    let mut modal = 0;
    let mut modal_hits = 0;
    for &count in &counts {
        let hits = counts.iter().filter(|&&c| c == count).count();
        if hits > modal_hits || (hits == modal_hits && count > modal) {
            modal = count;
            modal_hits = hits;
        }
    }
    if modal == 0 {
        return Score::zero();
    }
    let total_len: usize = lines.iter().map(|l| l.len()).sum();
    Score {
        consistency: modal_hits as f64 / counts.len() as f64,
        avg_width: total_len as f64 / ((modal + 1) * lines.len()) as f64,
        appears: true,
    }
}

/// Count non-overlapping occurrences of `needle` outside quoted regions.
fn count_outside_quotes(line: &[u8], needle: &[u8], quote: u8) -> usize {
    let mut count = 0;
    let mut i = 0;
    let mut in_quotes = false;
    while i < line.len() {
        if line[i] == quote {
            in_quotes = !in_quotes;
            i += 1;
            continue;
        }
        if !in_quotes && line[i..].starts_with(needle) {
            count += 1;
            i += needle.len();
            continue;
        }
        i += 1;
    }
    count
}

/// A quote character is credible when it opens a field: the first
/// character of a line, or the first character after a candidate
/// delimiter. The most frequent credible character wins; `"` beats `'`
/// on ties by scan order.
fn detect_quote(lines: &[&[u8]], candidates: &[Vec<u8>]) -> Option<u8> {
    let mut best = None;
    let mut best_votes = 0;
    for &q in &[b'"', b'\''] {
        let mut votes = 0;
        for line in lines {
            if line.first() == Some(&q) {
                votes += 1;
            }
            for candidate in candidates {
                let mut i = 0;
                while i + candidate.len() < line.len() {
                    if line[i..].starts_with(candidate.as_slice())
                        && line[i + candidate.len()] == q
                    {
                        votes += 1;
                    }
                    i += 1;
                }
            }
        }
        if votes > best_votes {
            best = Some(q);
            best_votes = votes;
        }
    }
    best
}

/// Inside quoted regions a backslash before the quote signals a distinct
/// escape character; otherwise quotes escape by doubling (the default).
fn detect_escape(sample: &[u8], quote: u8) -> Option<u8> {
    let mut in_quotes = false;
    let mut i = 0;
    while i < sample.len() {
        let b = sample[i];
        if in_quotes && b == b'\\' && sample.get(i + 1) == Some(&quote) {
            return Some(b'\\');
        }
        if b == quote {
            in_quotes = !in_quotes;
        }
        i += 1;
    }
    None
}

/// Split the sample into physical lines, dropping comment lines and a
/// trailing partial line, and report the dominant line separator.
fn split_lines(sample: &[u8], comment: Option<u8>) -> (Vec<&[u8]>, Option<&'static [u8]>) {
    let mut lines = Vec::new();
    let (mut crlf, mut lf, mut cr) = (0usize, 0usize, 0usize);
    let mut start = 0;
    let mut i = 0;
    while i < sample.len() && lines.len() < MAX_SAMPLE_LINES {
        match sample[i] {
            b'\r' => {
                push_line(&mut lines, &sample[start..i], comment);
                if sample.get(i + 1) == Some(&b'\n') {
                    crlf += 1;
                    i += 2;
                } else {
                    cr += 1;
                    i += 1;
                }
                start = i;
            }
            b'\n' => {
                push_line(&mut lines, &sample[start..i], comment);
                lf += 1;
                i += 1;
                start = i;
            }
            _ => i += 1,
        }
    }
    // A short sample may be a single unterminated line; keep it. In a
    // longer one the unterminated tail likely got cut mid-line, so it is
    // not evidence.
    if lines.is_empty() && start < sample.len() {
        push_line(&mut lines, &sample[start..], comment);
    }

    let separator: Option<&'static [u8]> = if crlf >= lf && crlf >= cr && crlf > 0 {
        Some(b"\r\n")
    } else if lf >= cr && lf > 0 {
        Some(b"\n")
    } else if cr > 0 {
        Some(b"\r")
    } else {
        None
    };
    (lines, separator)
}

fn push_line<'a>(lines: &mut Vec<&'a [u8]>, line: &'a [u8], comment: Option<u8>) {
    if line.is_empty() {
        return;
    }
    if let Some(marker) = comment {
        let first = line.iter().find(|&&b| b != b' ' && b != b'\t');
        if first == Some(&marker) {
            return;
        }
    }
    lines.push(line);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detect(sample: &str) -> Format {
        detect_format(sample.as_bytes(), &Format::new(), &[])
    }

    #[test]
    fn detects_a_comma() {
        let f = detect("a,b,c\n1,2,3\n4,5,6\n");
        assert_eq!(f.get_delimiter(), b",");
        assert_eq!(f.get_line_separator(), b"\n");
    }

    #[test]
    fn detects_a_tab_over_a_comma() {
        let f = detect("a\tb,c\td\n1\t2\t3\n4\t5\t6\n");
        assert_eq!(f.get_delimiter(), b"\t");
    }

    #[test]
    fn detects_semicolons_with_commas_inside_values() {
        let f = detect("name;amount\nsmith, john;10\ndoe, jane;20\n");
        assert_eq!(f.get_delimiter(), b";");
    }

    #[test]
    fn quoted_delimiters_do_not_count() {
        let f = detect("\"a;b\",c\n\"d;e;f\",g\n\"h\",i\n");
        assert_eq!(f.get_delimiter(), b",");
        assert_eq!(f.get_quote(), b'"');
    }

    #[test]
    fn detects_single_quotes() {
        let f = detect("'a,a',b\n'c',d\n'e',f\n");
        assert_eq!(f.get_quote(), b'\'');
        assert_eq!(f.get_delimiter(), b",");
    }

    #[test]
    fn detects_crlf() {
        let f = detect("a,b\r\n1,2\r\n3,4\r\n");
        assert_eq!(f.get_line_separator(), b"\r\n");
    }

    #[test]
    fn detects_a_backslash_escape() {
        let f = detect("\"a\\\"b\",c\n\"d\",e\n");
        assert_eq!(f.get_quote_escape(), b'\\');
    }

    #[test]
    fn falls_back_to_the_first_candidate() {
        let f = detect("justoneword\nanotherline\n");
        assert_eq!(f.get_delimiter(), b",");
        let f = detect("");
        assert_eq!(f.get_delimiter(), b",");
    }

    #[test]
    fn caller_candidates_take_priority_order() {
        let sample = "a|b;c\nd|e;f\n";
        let f = detect_format(
            sample.as_bytes(),
            &Format::new(),
            &[b"|".to_vec(), b";".to_vec()],
        );
        assert_eq!(f.get_delimiter(), b"|");
    }

    #[test]
    fn comment_lines_are_not_evidence() {
        let f = detect("# a;b;c;d;e\n1,2\n3,4\n");
        assert_eq!(f.get_delimiter(), b",");
    }
}
