//! Trigger events delivered by a git provider or synthesised by the CLI.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An incoming event that may start a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerEvent {
    /// Unique delivery identifier; the same delivery never starts two runs.
    pub delivery_id: String,
    /// What happened.
    pub kind: EventKind,
    /// When the event was received.
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventKind {
    PullRequest(PullRequestEvent),
    /// Any event type the orchestrator does not act on.
    Other { name: String },
}

/// A pull request lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestEvent {
    /// Pull request number.
    pub number: u64,
    /// Activity type (opened, synchronize, reopened, closed, ...).
    pub action: String,
    /// Repository full name (owner/name).
    pub repository: String,
    /// Head commit of the pull request.
    pub head_sha: String,
    /// Head branch, if known.
    pub head_ref: Option<String>,
    /// Clone URL of the repository holding the head commit. Differs from the
    /// base repository for pull requests opened from forks.
    #[serde(default)]
    pub head_clone_url: Option<String>,
}

impl PullRequestEvent {
    /// Parse a GitHub `pull_request` webhook payload.
    pub fn from_github_payload(payload: &serde_json::Value) -> Option<Self> {
        let pr = payload.get("pull_request")?;
        let number = payload
            .get("number")
            .and_then(|n| n.as_u64())
            .or_else(|| pr.get("number").and_then(|n| n.as_u64()))?;
        let action = payload.get("action")?.as_str()?.to_string();
        let head = pr.get("head")?;
        let head_sha = head.get("sha")?.as_str()?.to_string();
        let head_ref = head
            .get("ref")
            .and_then(|r| r.as_str())
            .map(|s| s.to_string());
        let head_clone_url = head
            .get("repo")
            .and_then(|r| r.get("clone_url"))
            .and_then(|u| u.as_str())
            .map(|s| s.to_string());
        let repository = payload
            .get("repository")
            .and_then(|r| r.get("full_name"))
            .and_then(|n| n.as_str())
            .unwrap_or_default()
            .to_string();

        Some(Self {
            number,
            action,
            repository,
            head_sha,
            head_ref,
            head_clone_url,
        })
    }
}

impl TriggerEvent {
    pub fn pull_request(delivery_id: impl Into<String>, event: PullRequestEvent) -> Self {
        Self {
            delivery_id: delivery_id.into(),
            kind: EventKind::PullRequest(event),
            received_at: Utc::now(),
        }
    }

    pub fn other(delivery_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            delivery_id: delivery_id.into(),
            kind: EventKind::Other { name: name.into() },
            received_at: Utc::now(),
        }
    }

    /// Event type name as the git provider spells it.
    pub fn name(&self) -> &str {
        match &self.kind {
            EventKind::PullRequest(_) => "pull_request",
            EventKind::Other { name } => name,
        }
    }

    pub fn pull_request_event(&self) -> Option<&PullRequestEvent> {
        match &self.kind {
            EventKind::PullRequest(pr) => Some(pr),
            EventKind::Other { .. } => None,
        }
    }

    /// Key shared by all events of the same pull request. A newer run for the
    /// same key supersedes the older one.
    pub fn supersession_key(&self) -> Option<String> {
        self.pull_request_event()
            .map(|pr| format!("{}#{}", pr.repository, pr.number))
    }

    pub fn head_sha(&self) -> Option<&str> {
        self.pull_request_event().map(|pr| pr.head_sha.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_github_pull_request_payload() {
        let payload = json!({
            "action": "opened",
            "number": 42,
            "pull_request": {
                "number": 42,
                "head": { "sha": "0123456789abcdef", "ref": "fix-build" }
            },
            "repository": { "full_name": "octo/widgets" }
        });

        let pr = PullRequestEvent::from_github_payload(&payload).unwrap();
        assert_eq!(pr.number, 42);
        assert_eq!(pr.action, "opened");
        assert_eq!(pr.repository, "octo/widgets");
        assert_eq!(pr.head_sha, "0123456789abcdef");
        assert_eq!(pr.head_ref.as_deref(), Some("fix-build"));
        assert_eq!(pr.head_clone_url, None);
    }

    #[test]
    fn test_parse_fork_pull_request_keeps_head_repository() {
        let payload = json!({
            "action": "synchronize",
            "number": 9,
            "pull_request": {
                "head": {
                    "sha": "feedface",
                    "ref": "patch-1",
                    "repo": { "clone_url": "https://github.com/contributor/widgets.git" }
                },
                "base": {
                    "repo": { "clone_url": "https://github.com/octo/widgets.git" }
                }
            },
            "repository": { "full_name": "octo/widgets" }
        });

        let pr = PullRequestEvent::from_github_payload(&payload).unwrap();
        assert_eq!(pr.repository, "octo/widgets");
        assert_eq!(
            pr.head_clone_url.as_deref(),
            Some("https://github.com/contributor/widgets.git")
        );
    }

    #[test]
    fn test_parse_rejects_payload_without_pull_request() {
        let payload = json!({ "action": "opened", "number": 1 });
        assert!(PullRequestEvent::from_github_payload(&payload).is_none());
    }

    #[test]
    fn test_supersession_key_groups_by_pull_request() {
        let pr = PullRequestEvent {
            number: 3,
            action: "opened".to_string(),
            repository: "octo/widgets".to_string(),
            head_sha: "aaa".to_string(),
            head_ref: None,
            head_clone_url: None,
        };
        let first = TriggerEvent::pull_request("d1", pr.clone());
        let second = TriggerEvent::pull_request(
            "d2",
            PullRequestEvent {
                action: "synchronize".to_string(),
                head_sha: "bbb".to_string(),
                ..pr
            },
        );
        assert_eq!(first.supersession_key(), second.supersession_key());
        assert_eq!(TriggerEvent::other("d3", "push").supersession_key(), None);
    }
}
