use std::fmt;

/// Machine-readable error codes shared by every component of the lake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NotInitialized,
    ConfigParseError,
    InvalidLayout,
    MalformedRecord,
    UnknownActivityType,
    ManifestCorrupt,
    ManifestMissing,
    HistoryNotFound,
    InvalidEnhancement,
    EventFileWriteFailed,
    AtomicWriteFailed,
    InternalUnexpected,
}

impl ErrorCode {
    /// Every code, in table order.
    pub const ALL: [Self; 12] = [
        Self::NotInitialized,
        Self::ConfigParseError,
        Self::InvalidLayout,
        Self::MalformedRecord,
        Self::UnknownActivityType,
        Self::ManifestCorrupt,
        Self::ManifestMissing,
        Self::HistoryNotFound,
        Self::InvalidEnhancement,
        Self::EventFileWriteFailed,
        Self::AtomicWriteFailed,
        Self::InternalUnexpected,
    ];

    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::NotInitialized => "E1001",
            Self::ConfigParseError => "E1002",
            Self::InvalidLayout => "E1003",
            Self::MalformedRecord => "E2001",
            Self::UnknownActivityType => "E2002",
            Self::ManifestCorrupt => "E3001",
            Self::ManifestMissing => "E3002",
            Self::HistoryNotFound => "E4001",
            Self::InvalidEnhancement => "E4002",
            Self::EventFileWriteFailed => "E5001",
            Self::AtomicWriteFailed => "E5002",
            Self::InternalUnexpected => "E9001",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::NotInitialized => "Repository not initialized",
            Self::ConfigParseError => "Config file parse error",
            Self::InvalidLayout => "Invalid repository layout",
            Self::MalformedRecord => "Malformed activity record",
            Self::UnknownActivityType => "Unknown activity type",
            Self::ManifestCorrupt => "Corrupt manifest index",
            Self::ManifestMissing => "Manifest index missing",
            Self::HistoryNotFound => "Enhancement history file not found",
            Self::InvalidEnhancement => "Invalid enhancement record",
            Self::EventFileWriteFailed => "Event file write failed",
            Self::AtomicWriteFailed => "Atomic file replacement failed",
            Self::InternalUnexpected => "Internal unexpected error",
        }
    }

    /// Optional remediation hint that can be surfaced to operators.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::NotInitialized => Some("Run `spn init` to create the repository skeleton."),
            Self::ConfigParseError => Some("Fix syntax in .metaspn/config.toml and retry."),
            Self::InvalidLayout => {
                Some("The root needs .metaspn/ plus a sources/ or artifacts/ directory.")
            }
            Self::MalformedRecord => Some("Records need timestamp, platform and activity_type."),
            Self::UnknownActivityType => Some("Use `create` or `consume`."),
            Self::ManifestCorrupt | Self::ManifestMissing => {
                Some("Run `spn index rebuild` to regenerate the manifest.")
            }
            Self::HistoryNotFound => Some("Run `spn enhancements history <kind>` to list files."),
            Self::InvalidEnhancement => Some("Scores must lie within 0.0 and 1.0."),
            Self::EventFileWriteFailed | Self::AtomicWriteFailed => {
                Some("Check disk space and write permissions.")
            }
            Self::InternalUnexpected => Some("Retry once. If persistent, report a bug with logs."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::ErrorCode;
    use std::collections::HashSet;

    #[test]
    fn all_codes_are_unique() {
        let mut seen = HashSet::new();
        for code in ErrorCode::ALL {
            assert!(seen.insert(code.code()), "duplicate code {}", code.code());
        }
    }

    #[test]
    fn code_format_is_machine_friendly() {
        for code in ErrorCode::ALL {
            let raw = code.code();
            assert_eq!(raw.len(), 5);
            assert!(raw.starts_with('E'));
            assert!(raw.chars().skip(1).all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn display_uses_code() {
        assert_eq!(ErrorCode::ManifestCorrupt.to_string(), "E3001");
    }
}
