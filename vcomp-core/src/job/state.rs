use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Opaque job token; also the namespace of the job's files.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn generate() -> Self {
        let mut id = Uuid::new_v4().simple().to_string();
        id.truncate(8);
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for JobId {
    type Err = String;

    /// Ids become path components, so only `[A-Za-z0-9_-]` is accepted.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let valid = !s.is_empty()
            && s.len() <= 64
            && s
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if valid {
            Ok(Self(s.to_string()))
        } else {
            Err(format!("invalid job id: {s:?}"))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Acquisition,
    Probe,
    Plan,
    Encode,
    Cancelled,
    Workspace,
    Internal,
}

impl FailureKind {
    /// Failures the caller can fix by changing the request.
    pub fn is_input_level(&self) -> bool {
        matches!(
            self,
            FailureKind::Acquisition | FailureKind::Probe | FailureKind::Plan
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "failure")]
pub enum JobState {
    Created,
    Acquiring,
    Probing,
    Planning,
    Encoding,
    Ready,
    Failed(FailureKind),
    /// Local inputs removed. Carries the failure when the job did not succeed.
    Cleaned(Option<FailureKind>),
}

impl JobState {
    pub fn name(&self) -> &'static str {
        match self {
            JobState::Created => "created",
            JobState::Acquiring => "acquiring",
            JobState::Probing => "probing",
            JobState::Planning => "planning",
            JobState::Encoding => "encoding",
            JobState::Ready => "ready",
            JobState::Failed(_) => "failed",
            JobState::Cleaned(_) => "cleaned",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Ready | JobState::Failed(_) | JobState::Cleaned(_)
        )
    }

    fn is_pipeline_step(&self) -> bool {
        !matches!(
            self,
            JobState::Created | JobState::Failed(_) | JobState::Cleaned(_)
        )
    }

    fn rank(&self) -> u8 {
        match self {
            JobState::Created => 0,
            JobState::Acquiring => 1,
            JobState::Probing => 2,
            JobState::Planning => 3,
            JobState::Encoding => 4,
            JobState::Ready | JobState::Failed(_) => 5,
            JobState::Cleaned(_) => 6,
        }
    }

    /// Strictly forward: one pipeline step at a time, `Failed` from any
    /// non-terminal state, `Cleaned` only after `Ready` or `Failed`.
    pub fn can_transition_to(&self, next: &JobState) -> bool {
        match (self, next) {
            (JobState::Ready, JobState::Cleaned(None)) => true,
            (JobState::Failed(kind), JobState::Cleaned(Some(cleaned))) => kind == cleaned,
            (current, JobState::Failed(_)) => !current.is_terminal(),
            (current, next) if next.is_pipeline_step() => {
                !current.is_terminal() && next.rank() == current.rank() + 1
            }
            _ => false,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Failed(kind) | JobState::Cleaned(Some(kind)) => {
                write!(f, "{}({kind:?})", self.name())
            }
            _ => f.write_str(self.name()),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("illegal job transition {from} -> {to}")]
pub struct TransitionError {
    pub from: JobState,
    pub to: JobState,
}

#[derive(Debug, Clone, Serialize)]
pub struct Transition {
    pub state: JobState,
    pub at: DateTime<Utc>,
}

/// Current state plus the timestamped path that led to it.
#[derive(Debug, Clone, Serialize)]
pub struct JobLifecycle {
    state: JobState,
    history: Vec<Transition>,
}

impl JobLifecycle {
    pub fn new() -> Self {
        Self {
            state: JobState::Created,
            history: vec![Transition {
                state: JobState::Created,
                at: Utc::now(),
            }],
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn history(&self) -> &[Transition] {
        &self.history
    }

    pub fn visited(&self, state: &JobState) -> bool {
        self.history
            .iter()
            .any(|entry| entry.state.name() == state.name())
    }

    pub fn advance(&mut self, next: JobState) -> Result<(), TransitionError> {
        if !self.state.can_transition_to(&next) {
            return Err(TransitionError {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        self.history.push(Transition {
            state: next,
            at: Utc::now(),
        });
        Ok(())
    }
}

impl Default for JobLifecycle {
    fn default() -> Self {
        Self::new()
    }
}
