//! Job lifecycle state machine.

use serde::{Deserialize, Serialize};

use crate::Error;

/// Lifecycle states of an archive job.
///
/// ```text
/// waiting -> downloading -> muxing -> finished
///    \            \            \
///     +------------+------------+--> error | unavailable | cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Created, waiting for the broadcast or for admission.
    #[default]
    Waiting,
    /// Fragments are being fetched.
    Downloading,
    /// Fragments are being combined into the output file.
    Muxing,
    Finished,
    Error,
    /// Upstream content went away.
    Unavailable,
    Cancelled,
}

impl JobStatus {
    pub const ALL: [JobStatus; 7] = [
        Self::Waiting,
        Self::Downloading,
        Self::Muxing,
        Self::Finished,
        Self::Error,
        Self::Unavailable,
        Self::Cancelled,
    ];

    /// Convert to database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Downloading => "downloading",
            Self::Muxing => "muxing",
            Self::Finished => "finished",
            Self::Error => "error",
            Self::Unavailable => "unavailable",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse from database string representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "waiting" => Some(Self::Waiting),
            "downloading" => Some(Self::Downloading),
            "muxing" => Some(Self::Muxing),
            "finished" => Some(Self::Finished),
            "error" => Some(Self::Error),
            "unavailable" => Some(Self::Unavailable),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Human-facing label, e.g. `Downloading`.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Waiting => "Waiting",
            Self::Downloading => "Downloading",
            Self::Muxing => "Muxing",
            Self::Finished => "Finished",
            Self::Error => "Error",
            Self::Unavailable => "Unavailable",
            Self::Cancelled => "Cancelled",
        }
    }

    /// No transition leaves a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Finished | Self::Error | Self::Unavailable | Self::Cancelled
        )
    }

    /// Validate a state transition. Self-loops are not transitions.
    pub fn can_transition_to(&self, target: JobStatus) -> bool {
        use JobStatus::*;

        match (self, target) {
            (Waiting, Downloading) => true,
            (Downloading, Muxing) => true,
            (Muxing, Finished) => true,
            (Waiting | Downloading | Muxing, Error | Unavailable | Cancelled) => true,
            _ => false,
        }
    }

    /// Attempt to transition to a new state.
    pub fn transition_to(&self, target: JobStatus) -> Result<JobStatus, Error> {
        if self.can_transition_to(target) {
            Ok(target)
        } else {
            Err(Error::InvalidStateTransition {
                from: self.as_str().to_string(),
                to: target.as_str().to_string(),
            })
        }
    }

    /// The forward path from `self` to `target` along the happy path, used when
    /// the downloader reports a later stage without the intermediate ones.
    pub fn forward_path(&self, target: JobStatus) -> Vec<JobStatus> {
        const HAPPY: [JobStatus; 4] = [
            JobStatus::Waiting,
            JobStatus::Downloading,
            JobStatus::Muxing,
            JobStatus::Finished,
        ];
        let from = HAPPY.iter().position(|s| s == self);
        let to = HAPPY.iter().position(|s| *s == target);
        match (from, to) {
            (Some(from), Some(to)) if from < to => HAPPY[from + 1..=to].to_vec(),
            _ => Vec::new(),
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_from_str() {
        for status in JobStatus::ALL {
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(JobStatus::parse("invalid"), None);
    }

    #[test]
    fn test_valid_transitions() {
        assert!(JobStatus::Waiting.can_transition_to(JobStatus::Downloading));
        assert!(JobStatus::Downloading.can_transition_to(JobStatus::Muxing));
        assert!(JobStatus::Muxing.can_transition_to(JobStatus::Finished));
        for from in [JobStatus::Waiting, JobStatus::Downloading, JobStatus::Muxing] {
            for to in [JobStatus::Error, JobStatus::Unavailable, JobStatus::Cancelled] {
                assert!(from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn test_invalid_transitions() {
        assert!(!JobStatus::Waiting.can_transition_to(JobStatus::Muxing));
        assert!(!JobStatus::Waiting.can_transition_to(JobStatus::Finished));
        assert!(!JobStatus::Downloading.can_transition_to(JobStatus::Waiting));
        assert!(!JobStatus::Downloading.can_transition_to(JobStatus::Downloading));
    }

    #[test]
    fn test_terminal_states_are_final() {
        for from in JobStatus::ALL.into_iter().filter(JobStatus::is_terminal) {
            for to in JobStatus::ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn test_transition_to_error() {
        let result = JobStatus::Finished.transition_to(JobStatus::Downloading);
        assert!(matches!(result, Err(Error::InvalidStateTransition { .. })));
    }

    #[test]
    fn test_forward_path() {
        assert_eq!(
            JobStatus::Waiting.forward_path(JobStatus::Finished),
            vec![JobStatus::Downloading, JobStatus::Muxing, JobStatus::Finished]
        );
        assert_eq!(
            JobStatus::Muxing.forward_path(JobStatus::Finished),
            vec![JobStatus::Finished]
        );
        assert!(JobStatus::Finished.forward_path(JobStatus::Waiting).is_empty());
        assert!(JobStatus::Waiting.forward_path(JobStatus::Error).is_empty());
    }
}
