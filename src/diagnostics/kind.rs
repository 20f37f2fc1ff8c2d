//! Diagnostic kinds and predefined diagnostics.

/// The severity of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    /// Something is definitely wrong.
    Error,
    /// Something is probably wrong or wasteful.
    Warning,
}

impl DiagnosticKind {
    /// Get the display prefix for this kind.
    pub fn prefix(&self) -> &'static str {
        match self {
            DiagnosticKind::Error => "error",
            DiagnosticKind::Warning => "warning",
        }
    }
}

/// A diagnostic message with code, message, and optional context.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    /// Severity level.
    pub kind: DiagnosticKind,
    /// Diagnostic code (e.g., "GH001").
    pub code: &'static str,
    /// Primary message.
    pub message: &'static str,
    /// Optional additional context.
    pub note: Option<&'static str>,
    /// Optional fix suggestion.
    pub help: Option<&'static str>,
}

impl Diagnostic {
    /// Create a new error diagnostic.
    pub const fn error(code: &'static str, message: &'static str) -> Self {
        Self {
            kind: DiagnosticKind::Error,
            code,
            message,
            note: None,
            help: None,
        }
    }

    /// Create a new warning diagnostic.
    pub const fn warning(code: &'static str, message: &'static str) -> Self {
        Self {
            kind: DiagnosticKind::Warning,
            code,
            message,
            note: None,
            help: None,
        }
    }

    /// Add a note to this diagnostic.
    pub const fn with_note(mut self, note: &'static str) -> Self {
        self.note = Some(note);
        self
    }

    /// Add a help message to this diagnostic.
    pub const fn with_help(mut self, help: &'static str) -> Self {
        self.help = Some(help);
        self
    }
}

// =============================================================================
// Predefined diagnostics (GH0xx - Heaps and blocks)
// =============================================================================

/// GH001: Location freed through an allocator that does not own it.
pub const GH001: Diagnostic = Diagnostic::error(
    "GH001",
    "location freed through an allocator that does not own it"
).with_note("locations remember the allocator and backing heap that produced them")
 .with_help("free the location through the allocator it came from, or use GpuMemory::free()");

/// GH002: Double or stale free.
pub const GH002: Diagnostic = Diagnostic::error(
    "GH002",
    "location freed twice or after its block was reused"
).with_note("a freed location is marked released and its block may already belong to someone else")
 .with_help("free each location exactly once");

/// GH003: Location dropped without being freed.
pub const GH003: Diagnostic = Diagnostic::warning(
    "GH003",
    "resource location dropped without being freed"
).with_note("the block stays allocated until the allocator is torn down")
 .with_help("pass the location to its allocator's free() before dropping it");

/// GH004: Oversized backing heap.
pub const GH004: Diagnostic = Diagnostic::warning(
    "GH004",
    "request exceeds the default heap size, creating a dedicated heap"
).with_note("the dedicated heap is kept until teardown")
 .with_help("increase default_heap_size in AllocatorConfig if this happens often");

/// GH005: Retirement reported for a generation that was never submitted.
pub const GH005: Diagnostic = Diagnostic::warning(
    "GH005",
    "retired generation is newer than any submitted generation"
).with_note("frees tagged with the open generation may still be recorded into GPU work")
 .with_help("pass the value returned by submit_frame to on_frame_retired");

// =============================================================================
// Predefined diagnostics (GH1xx - Descriptors)
// =============================================================================

/// GH101: Descriptor slot table exhausted.
pub const GH101: Diagnostic = Diagnostic::error(
    "GH101",
    "descriptor slot table is full"
).with_note("descriptor tables have a fixed capacity and never grow")
 .with_help("free unused slots or raise rtv_capacity/dsv_capacity/srv_capacity");

/// GH102: Invalid descriptor slot free.
pub const GH102: Diagnostic = Diagnostic::error(
    "GH102",
    "descriptor slot freed twice or by the wrong table"
).with_help("free each slot handle exactly once through the table that issued it");

/// GH103: Descriptor cache exhausted.
pub const GH103: Diagnostic = Diagnostic::error(
    "GH103",
    "per-frame descriptor cache is full"
).with_note("the cache is only rewound when a frame retires")
 .with_help("raise cache_cbv_srv_uav_capacity/cache_rtv_capacity in AllocatorConfig");

// =============================================================================
// Predefined diagnostics (GH9xx - Device)
// =============================================================================

/// GH901: Device refused a heap or resource.
pub const GH901: Diagnostic = Diagnostic::error(
    "GH901",
    "device out of memory"
).with_note("the backend refused to create a heap or resource")
 .with_help("free resources or reduce default_heap_size");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predefined_codes() {
        for diag in [GH001, GH002, GH003, GH004, GH005, GH101, GH102, GH103, GH901] {
            assert!(diag.code.starts_with("GH"));
            assert_eq!(diag.code.len(), 5);
            assert!(diag.help.is_some());
        }
        assert_eq!(GH003.kind, DiagnosticKind::Warning);
        assert_eq!(GH901.kind.prefix(), "error");
    }
}
