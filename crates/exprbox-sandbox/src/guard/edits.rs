//! Text edits against the original expression source.
//!
//! The guard never re-prints the AST. Rewrites are expressed as byte-range
//! edits over the source text and spliced in one pass, so the parts of an
//! expression that are not rewritten keep their exact original text.

use oxc_span::Span;

use super::GuardViolation;

/// A single edit against the original expression source.
///
/// Offsets are byte offsets into the source. An edit with `start == end` is an
/// insertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edit {
    /// Start offset (inclusive).
    pub start: u32,
    /// End offset (exclusive).
    pub end: u32,
    /// Replacement text.
    pub text: String,
}

impl Edit {
    /// Insert `text` at `at`.
    pub fn insert(at: u32, text: impl Into<String>) -> Self {
        Self {
            start: at,
            end: at,
            text: text.into(),
        }
    }

    /// Replace the source covered by `span` with `text`.
    pub fn replace(span: Span, text: impl Into<String>) -> Self {
        Self {
            start: span.start,
            end: span.end,
            text: text.into(),
        }
    }

    /// Replace `start..end` with `text`.
    pub fn replace_range(start: u32, end: u32, text: impl Into<String>) -> Self {
        Self {
            start,
            end,
            text: text.into(),
        }
    }

    /// Whether this edit only inserts text.
    pub fn is_insert(&self) -> bool {
        self.start == self.end
    }
}

/// Splice `edits` into `source[start..end]` and return the rewritten slice.
///
/// Edits are applied by position. At the same position insertions go before
/// replacements, and edits of the same kind keep the order they were produced
/// in. Any two edits whose ranges overlap are a conflict.
pub(crate) fn apply(
    source: &str,
    start: u32,
    end: u32,
    edits: Vec<Edit>,
) -> Result<String, GuardViolation> {
    let mut ordered: Vec<(usize, Edit)> = edits.into_iter().enumerate().collect();
    ordered.sort_by_key(|(seq, e)| (e.start, !e.is_insert(), *seq));

    let mut out = String::with_capacity((end - start) as usize + 64);
    let mut cursor = start as usize;
    for (_, edit) in ordered {
        let (s, e) = (edit.start as usize, edit.end as usize);
        if s > e
            || s < start as usize
            || e > end as usize
            || !source.is_char_boundary(s)
            || !source.is_char_boundary(e)
        {
            return Err(GuardViolation::EditConflict {
                message: format!("edit {s}..{e} is outside the expression source"),
            });
        }
        if s < cursor {
            return Err(GuardViolation::EditConflict {
                message: format!("edit {s}..{e} overlaps an earlier edit ending at {cursor}"),
            });
        }
        out.push_str(&source[cursor..s]);
        out.push_str(&edit.text);
        cursor = e;
    }
    out.push_str(&source[cursor..end as usize]);
    Ok(out)
}
