use std::fmt;

/// Machine-readable error codes for reports and exit handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigParseError,
    UnknownSerializer,
    SettingsInvalid,
    ModelElementNotFound,
    ModelAttributeMissing,
    IdentityViolation,
    SerializationFailed,
    LinkResolutionFailed,
    RemoteApiFailure,
    ProjectMissing,
    FailureRateExceeded,
    DocumentAreaMismatch,
    TemplateRenderFailed,
    InternalUnexpected,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::ConfigParseError => "E1001",
            Self::UnknownSerializer => "E1002",
            Self::SettingsInvalid => "E1003",
            Self::ModelElementNotFound => "E2001",
            Self::ModelAttributeMissing => "E2002",
            Self::IdentityViolation => "E2003",
            Self::SerializationFailed => "E3001",
            Self::LinkResolutionFailed => "E3002",
            Self::RemoteApiFailure => "E4001",
            Self::ProjectMissing => "E4002",
            Self::FailureRateExceeded => "E5001",
            Self::DocumentAreaMismatch => "E6001",
            Self::TemplateRenderFailed => "E6002",
            Self::InternalUnexpected => "E9001",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::ConfigParseError => "Type configuration parse error",
            Self::UnknownSerializer => "Unknown serializer in type configuration",
            Self::SettingsInvalid => "Invalid sync settings",
            Self::ModelElementNotFound => "Model element not found",
            Self::ModelAttributeMissing => "Model attribute missing",
            Self::IdentityViolation => "Work item without remote id registered",
            Self::SerializationFailed => "Work item serialization failed",
            Self::LinkResolutionFailed => "Link resolution failed",
            Self::RemoteApiFailure => "Remote tracker API call failed",
            Self::ProjectMissing => "Remote project does not exist",
            Self::FailureRateExceeded => "Too many work item failures",
            Self::DocumentAreaMismatch => "Mismatched document area markers",
            Self::TemplateRenderFailed => "Template rendering failed",
            Self::InternalUnexpected => "Internal unexpected error",
        }
    }

    /// Optional remediation hint that can be surfaced to operators.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::ConfigParseError => Some("Fix the YAML syntax of the synchronize config and retry."),
            Self::UnknownSerializer => {
                Some("Use one of the documented serializer names (optionally with a -suffix).")
            }
            Self::SettingsInvalid => Some("Check .c2p/config.toml and the command line flags."),
            Self::ModelElementNotFound | Self::ModelAttributeMissing => None,
            Self::IdentityViolation => Some("Report a bug: only created work items may be registered."),
            Self::SerializationFailed | Self::LinkResolutionFailed => {
                Some("Inspect the itemized errors above and fix the model or the config.")
            }
            Self::RemoteApiFailure => Some("Check tracker availability and the access token."),
            Self::ProjectMissing => Some("Verify POLARION_PROJECT_ID and the tracker URL."),
            Self::FailureRateExceeded => {
                Some("A systemic problem (credentials, network) is likely; fix it before rerunning.")
            }
            Self::DocumentAreaMismatch => {
                Some("Every c2pAreaStart block needs a matching c2pAreaEnd block with the same id.")
            }
            Self::TemplateRenderFailed => Some("Check template names and parameters."),
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
        let all = [
            ErrorCode::ConfigParseError,
            ErrorCode::UnknownSerializer,
            ErrorCode::SettingsInvalid,
            ErrorCode::ModelElementNotFound,
            ErrorCode::ModelAttributeMissing,
            ErrorCode::IdentityViolation,
            ErrorCode::SerializationFailed,
            ErrorCode::LinkResolutionFailed,
            ErrorCode::RemoteApiFailure,
            ErrorCode::ProjectMissing,
            ErrorCode::FailureRateExceeded,
            ErrorCode::DocumentAreaMismatch,
            ErrorCode::TemplateRenderFailed,
            ErrorCode::InternalUnexpected,
        ];

        let mut seen = HashSet::new();
        for code in all {
            assert!(seen.insert(code.code()), "duplicate code {}", code.code());
        }
    }

    #[test]
    fn code_format_is_machine_friendly() {
        let code = ErrorCode::FailureRateExceeded.code();
        assert_eq!(code.len(), 5);
        assert!(code.starts_with('E'));
        assert!(code.chars().skip(1).all(|c| c.is_ascii_digit()));
    }
}
