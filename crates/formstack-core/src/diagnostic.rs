//! Non-fatal findings returned alongside results.

use crate::formid::FormId;
use std::fmt;

/// Something dropped or skipped while producing a result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// A scalar reference that does not resolve in the record's file; the
    /// attribute was left out.
    UnresolvableReference {
        record: FormId,
        attribute: String,
        reference: FormId,
    },
    /// A list entry carrying an unresolvable reference was removed.
    EntryDropped {
        record: FormId,
        attribute: String,
        index: usize,
        reference: FormId,
    },
}

impl Diagnostic {
    pub fn record(&self) -> &FormId {
        match self {
            Diagnostic::UnresolvableReference { record, .. } | Diagnostic::EntryDropped { record, .. } => record,
        }
    }

    pub fn attribute(&self) -> &str {
        match self {
            Diagnostic::UnresolvableReference { attribute, .. } | Diagnostic::EntryDropped { attribute, .. } => {
                attribute
            }
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::UnresolvableReference {
                record,
                attribute,
                reference,
            } => write!(f, "{record}: '{attribute}' dropped, {reference} does not resolve"),
            Diagnostic::EntryDropped {
                record,
                attribute,
                index,
                reference,
            } => write!(f, "{record}: '{attribute}'[{index}] removed, {reference} does not resolve"),
        }
    }
}
