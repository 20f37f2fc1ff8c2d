//! Diagnostic emission through the `log` facade.

use std::sync::atomic::{AtomicBool, Ordering};

use super::kind::{Diagnostic, DiagnosticKind};

/// Global flag to suppress diagnostic output (for testing).
static DIAGNOSTICS_SUPPRESSED: AtomicBool = AtomicBool::new(false);

/// Suppress all diagnostic output.
pub fn suppress_diagnostics(suppress: bool) {
    DIAGNOSTICS_SUPPRESSED.store(suppress, Ordering::Relaxed);
}

/// Check if diagnostics are suppressed.
pub fn is_suppressed() -> bool {
    DIAGNOSTICS_SUPPRESSED.load(Ordering::Relaxed)
}

/// Emit a diagnostic.
pub fn emit(diag: &Diagnostic) {
    if is_suppressed() {
        return;
    }
    emit_to_log(diag, None);
}

/// Emit a diagnostic with additional runtime context.
pub fn emit_with_context(diag: &Diagnostic, context: &str) {
    if is_suppressed() {
        return;
    }
    emit_to_log(diag, Some(context));
}

fn emit_to_log(diag: &Diagnostic, context: Option<&str>) {
    let level = match diag.kind {
        DiagnosticKind::Error => log::Level::Error,
        DiagnosticKind::Warning => log::Level::Warn,
    };
    match context {
        Some(context) => log::log!(level, "[{}] {}: {} ({})", diag.code, diag.kind.prefix(), diag.message, context),
        None => log::log!(level, "[{}] {}: {}", diag.code, diag.kind.prefix(), diag.message),
    }

    if let Some(note) = diag.note {
        log::info!("  note: {}", note);
    }
    if let Some(help) = diag.help {
        log::info!("  help: {}", help);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::kind::GH001;

    #[test]
    fn test_suppression() {
        suppress_diagnostics(true);
        assert!(is_suppressed());
        emit(&GH001);
        suppress_diagnostics(false);
        assert!(!is_suppressed());
    }
}
