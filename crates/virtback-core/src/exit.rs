//! Process exit contract
//!
//! Automation distinguishes three outcomes: success, success with warnings
//! (only when strict mode is requested) and fatal failure.

/// Final outcome of a CLI invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Success,
    Failure,
    Warnings,
}

impl ExitStatus {
    /// Derive the status from a finished operation.
    pub fn from_outcome(failed: bool, warnings: usize, strict: bool) -> Self {
        if failed {
            ExitStatus::Failure
        } else if strict && warnings > 0 {
            ExitStatus::Warnings
        } else {
            ExitStatus::Success
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            ExitStatus::Success => 0,
            ExitStatus::Failure => 1,
            ExitStatus::Warnings => 2,
        }
    }
}

impl From<ExitStatus> for std::process::ExitCode {
    fn from(status: ExitStatus) -> Self {
        std::process::ExitCode::from(status.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_wins() {
        assert_eq!(ExitStatus::from_outcome(true, 3, true), ExitStatus::Failure);
    }

    #[test]
    fn test_warnings_need_strict() {
        assert_eq!(ExitStatus::from_outcome(false, 2, false), ExitStatus::Success);
        assert_eq!(ExitStatus::from_outcome(false, 2, true), ExitStatus::Warnings);
        assert_eq!(ExitStatus::from_outcome(false, 0, true), ExitStatus::Success);
    }

    #[test]
    fn test_codes_are_distinct() {
        assert_eq!(ExitStatus::Success.code(), 0);
        assert_eq!(ExitStatus::Failure.code(), 1);
        assert_eq!(ExitStatus::Warnings.code(), 2);
    }
}
