//! Statuses, actions and retry budgets.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Status of a job, task or callback as recorded by the control plane.
///
/// State transitions of a job run:
/// - Pending -> Running -> Success | Error | Cancelled
/// - Running -> Pending (retry scheduled, message requeued)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[default]
    Pending,
    Running,
    Success,
    Error,
    Cancelled,
}

impl Status {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Success | Status::Error | Status::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Running => "running",
            Status::Success => "success",
            Status::Error => "error",
            Status::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The three terminal callbacks of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackKind {
    OnSuccess,
    OnError,
    OnCancel,
}

impl CallbackKind {
    /// Callback that follows a terminal status. `None` for non-terminal ones.
    pub fn for_status(status: Status) -> Option<Self> {
        match status {
            Status::Success => Some(CallbackKind::OnSuccess),
            Status::Error => Some(CallbackKind::OnError),
            Status::Cancelled => Some(CallbackKind::OnCancel),
            Status::Pending | Status::Running => None,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "on_success" => Some(CallbackKind::OnSuccess),
            "on_error" => Some(CallbackKind::OnError),
            "on_cancel" => Some(CallbackKind::OnCancel),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CallbackKind::OnSuccess => "on_success",
            CallbackKind::OnError => "on_error",
            CallbackKind::OnCancel => "on_cancel",
        }
    }
}

impl fmt::Display for CallbackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What a job is doing right now.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Action {
    Task(String),
    Callback(CallbackKind),
}

impl Action {
    /// Parse a remote name: callback names win over task names.
    pub fn from_name(name: &str) -> Self {
        match CallbackKind::from_name(name) {
            Some(kind) => Action::Callback(kind),
            None => Action::Task(name.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Action::Task(name) => name,
            Action::Callback(kind) => kind.name(),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Retry budget of a phase. `-1` on the wire means unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RetryLimit {
    Unlimited,
    Limited(u32),
}

impl RetryLimit {
    pub fn from_wire(value: i64) -> Self {
        if value < 0 {
            RetryLimit::Unlimited
        } else {
            RetryLimit::Limited(u32::try_from(value).unwrap_or(u32::MAX))
        }
    }

    pub fn to_wire(self) -> i64 {
        match self {
            RetryLimit::Unlimited => -1,
            RetryLimit::Limited(n) => i64::from(n),
        }
    }

    /// May a phase that has already retried `retries` times retry again?
    pub fn allows(self, retries: u32) -> bool {
        match self {
            RetryLimit::Unlimited => true,
            RetryLimit::Limited(max) => retries < max,
        }
    }
}

impl Default for RetryLimit {
    fn default() -> Self {
        RetryLimit::Limited(3)
    }
}

impl fmt::Display for RetryLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryLimit::Unlimited => f.write_str("unlimited"),
            RetryLimit::Limited(n) => write!(f, "{n}"),
        }
    }
}

impl Serialize for RetryLimit {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.to_wire())
    }
}

impl<'de> Deserialize<'de> for RetryLimit {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        i64::deserialize(deserializer).map(RetryLimit::from_wire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::pending(Status::Pending, false)]
    #[case::running(Status::Running, false)]
    #[case::success(Status::Success, true)]
    #[case::error(Status::Error, true)]
    #[case::cancelled(Status::Cancelled, true)]
    fn terminal_statuses(#[case] status: Status, #[case] terminal: bool) {
        assert_eq!(status.is_terminal(), terminal);
    }

    #[rstest]
    #[case(Status::Success, Some(CallbackKind::OnSuccess))]
    #[case(Status::Error, Some(CallbackKind::OnError))]
    #[case(Status::Cancelled, Some(CallbackKind::OnCancel))]
    #[case(Status::Running, None)]
    fn callbacks_follow_terminal_status(
        #[case] status: Status,
        #[case] expected: Option<CallbackKind>,
    ) {
        assert_eq!(CallbackKind::for_status(status), expected);
    }

    #[test]
    fn action_names_prefer_callbacks() {
        assert_eq!(
            Action::from_name("on_cancel"),
            Action::Callback(CallbackKind::OnCancel)
        );
        assert_eq!(Action::from_name("fetch"), Action::Task("fetch".into()));
    }

    #[test]
    fn retry_limit_wire_format() {
        assert_eq!(RetryLimit::from_wire(-1), RetryLimit::Unlimited);
        assert_eq!(RetryLimit::from_wire(2), RetryLimit::Limited(2));
        assert_eq!(serde_json::to_string(&RetryLimit::Unlimited).unwrap(), "-1");
        let back: RetryLimit = serde_json::from_str("5").unwrap();
        assert_eq!(back, RetryLimit::Limited(5));
    }

    #[test]
    fn retry_limit_allows_strictly_below_budget() {
        assert!(RetryLimit::Limited(1).allows(0));
        assert!(!RetryLimit::Limited(1).allows(1));
        assert!(!RetryLimit::Limited(0).allows(0));
        assert!(RetryLimit::Unlimited.allows(u32::MAX));
    }
}
