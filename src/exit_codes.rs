//! CLI exit codes.

/// Exit codes emitted by the `capns` binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    /// Everything completed.
    Success,
    /// Planning or validation failed (no path, invalid manifest, bad
    /// inputs).
    PlanFailure,
    /// The plan was built but execution failed.
    ExecutionFailure,
    /// Command-line usage error.
    Usage,
}

impl ExitCode {
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::PlanFailure => 1,
            Self::ExecutionFailure => 2,
            Self::Usage => 64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_values() {
        assert_eq!(ExitCode::Success.as_i32(), 0);
        assert_eq!(ExitCode::PlanFailure.as_i32(), 1);
        assert_eq!(ExitCode::ExecutionFailure.as_i32(), 2);
        assert_eq!(ExitCode::Usage.as_i32(), 64);
    }
}
