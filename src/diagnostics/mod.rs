//! Allocator diagnostics.
//!
//! Misuse and hard failures are returned as [`AllocError`](crate::AllocError)
//! values; the diagnostics here additionally report them through the `log`
//! facade with a stable code, a note and a fix suggestion.
//!
//! ## Diagnostic Codes
//!
//! | Code  | Meaning                          |
//! |-------|----------------------------------|
//! | GH0xx | Heap and block issues            |
//! | GH1xx | Descriptor table issues          |
//! | GH9xx | Device failures                  |

pub mod emit;
pub mod kind;

pub use emit::{emit, emit_with_context, is_suppressed, suppress_diagnostics};
pub use kind::{Diagnostic, DiagnosticKind};

pub use kind::{GH001, GH002, GH003, GH004, GH005, GH101, GH102, GH103, GH901};
