// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Errors and warnings produced while decoding storage configuration.
//!
//! Decoding never stops at the first problem. Every issue is appended to a
//! [`Diagnostics`] list tagged with the slot it concerns, and the caller
//! decides what to do once the whole input has been examined: any
//! [`DiagnosticKind::Error`] is blocking, warnings are informational.

use guest_storage_types::{Bus, SlotError};
use thiserror::Error;

/// A blocking problem with one slot's input.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DiskError {
    #[error("invalid value {value:?} for {field}: {reason}")]
    InvalidValue { field: &'static str, value: String, reason: String },

    #[error("{0} is required")]
    MissingField(&'static str),

    #[error("slot {0} is already in use")]
    DuplicateSlot(String),

    #[error("{device} devices are not supported on the {bus} bus")]
    UnsupportedOnBus { device: &'static str, bus: Bus },

    #[error("unrecognized slot {name:?}")]
    UnknownSlot {
        name: String,
        #[source]
        source: SlotError,
    },

    #[error("{0} and {1} cannot be used together")]
    ConflictingFields(&'static str, &'static str),

    #[error("more than one device block given for a single slot")]
    ConflictingBlocks,
}

/// The two kinds of blocking error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// A malformed field value, reported against that field.
    Validation,

    /// A problem with the shape of the input for a slot as a whole.
    Structural,
}

impl DiskError {
    pub fn class(&self) -> ErrorClass {
        match self {
            DiskError::InvalidValue { .. } => ErrorClass::Validation,
            _ => ErrorClass::Structural,
        }
    }

    pub(crate) fn invalid(
        field: &'static str,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        DiskError::InvalidValue {
            field,
            value: value.into(),
            reason: reason.into(),
        }
    }
}

/// A non-blocking note about input that was accepted but not fully used.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DiskWarning {
    #[error("{field} is not used by {variant} devices and was ignored")]
    FieldIgnored { field: &'static str, variant: &'static str },

    #[error("{field} is not supported on the {bus} bus and was ignored")]
    UnsupportedOnBus { field: &'static str, bus: Bus },

    #[error("unknown field {0:?} was ignored")]
    UnknownField(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum DiagnosticKind {
    Error(DiskError),
    Warning(DiskWarning),
}

/// One diagnostic, tagged with the slot name it concerns.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub slot: String,
    pub kind: DiagnosticKind,
}

impl Diagnostic {
    pub fn is_error(&self) -> bool {
        matches!(self.kind, DiagnosticKind::Error(_))
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            DiagnosticKind::Error(e) => {
                write!(f, "{}: error: {}", self.slot, e)
            }
            DiagnosticKind::Warning(w) => {
                write!(f, "{}: warning: {}", self.slot, w)
            }
        }
    }
}

/// An append-only list of diagnostics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Diagnostics(Vec<Diagnostic>);

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_error(&mut self, slot: impl ToString, error: DiskError) {
        self.0.push(Diagnostic {
            slot: slot.to_string(),
            kind: DiagnosticKind::Error(error),
        });
    }

    pub fn push_warning(&mut self, slot: impl ToString, warning: DiskWarning) {
        self.0.push(Diagnostic {
            slot: slot.to_string(),
            kind: DiagnosticKind::Warning(warning),
        });
    }

    /// True if any entry should stop the caller from applying the result.
    pub fn has_errors(&self) -> bool {
        self.0.iter().any(Diagnostic::is_error)
    }

    pub fn errors(&self) -> impl Iterator<Item = (&str, &DiskError)> {
        self.0.iter().filter_map(|d| match &d.kind {
            DiagnosticKind::Error(e) => Some((d.slot.as_str(), e)),
            DiagnosticKind::Warning(_) => None,
        })
    }

    pub fn warnings(&self) -> impl Iterator<Item = (&str, &DiskWarning)> {
        self.0.iter().filter_map(|d| match &d.kind {
            DiagnosticKind::Warning(w) => Some((d.slot.as_str(), w)),
            DiagnosticKind::Error(_) => None,
        })
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Diagnostic> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Emits every entry to `log`: errors at error level, warnings at warn.
    pub fn log(&self, log: &slog::Logger) {
        for d in &self.0 {
            match &d.kind {
                DiagnosticKind::Error(e) => {
                    slog::error!(log, "{}", e; "slot" => &d.slot);
                }
                DiagnosticKind::Warning(w) => {
                    slog::warn!(log, "{}", w; "slot" => &d.slot);
                }
            }
        }
    }
}

impl<'a> IntoIterator for &'a Diagnostics {
    type Item = &'a Diagnostic;
    type IntoIter = std::slice::Iter<'a, Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
