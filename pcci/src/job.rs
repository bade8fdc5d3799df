use std::fmt::Display;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Sentinel pull-request value meaning "test the default branch".
pub const DEFAULT_BRANCH_SENTINEL: &str = "master";

/// Error returned when a queued item is not of the form `org/project/pr`.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
#[error("malformed job descriptor {raw:?}: {reason}")]
pub struct MalformedJobDescriptor {
    /// The raw item as it was popped from the queue.
    pub raw: String,
    /// What was wrong with it.
    pub reason: &'static str,
}

impl MalformedJobDescriptor {
    fn new(raw: &str, reason: &'static str) -> Self {
        Self {
            raw: raw.to_string(),
            reason,
        }
    }
}

/// Which revision of the project a job should test.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum PullRequest {
    /// The project's default branch (`master` on the wire).
    DefaultBranch,
    /// A pull request, identified by whatever the queue carried.
    Number(String),
}

impl PullRequest {
    fn parse(value: &str) -> Self {
        if value == DEFAULT_BRANCH_SENTINEL {
            Self::DefaultBranch
        } else {
            Self::Number(value.to_string())
        }
    }

    /// Returns true for the default-branch sentinel.
    pub fn is_default_branch(&self) -> bool {
        matches!(self, Self::DefaultBranch)
    }

    /// Wire form of the pull request field.
    pub fn as_str(&self) -> &str {
        match self {
            Self::DefaultBranch => DEFAULT_BRANCH_SENTINEL,
            Self::Number(n) => n,
        }
    }
}

impl Display for PullRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of work: an organization, a project and the revision to test.
///
/// Immutable once leased. Constructed only through [`JobDescriptor::parse`]
/// (or [`JobDescriptor::new`]) so every instance has three non-empty fields.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct JobDescriptor {
    organization: String,
    project: String,
    pull_request: PullRequest,
}

impl JobDescriptor {
    /// Build a descriptor from its parts, applying the same validation as parsing.
    pub fn new(
        organization: impl Into<String>,
        project: impl Into<String>,
        pull_request: impl AsRef<str>,
    ) -> Result<Self, MalformedJobDescriptor> {
        let raw = format!(
            "{}/{}/{}",
            organization.into(),
            project.into(),
            pull_request.as_ref()
        );
        Self::parse(&raw)
    }

    /// Parse the queue wire format `org/project/pr`.
    pub fn parse(raw: &str) -> Result<Self, MalformedJobDescriptor> {
        let mut parts = raw.split('/');
        let (Some(organization), Some(project), Some(pr), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(MalformedJobDescriptor::new(
                raw,
                "expected exactly three '/'-separated fields",
            ));
        };

        if organization.is_empty() || project.is_empty() || pr.is_empty() {
            return Err(MalformedJobDescriptor::new(raw, "empty field"));
        }
        if raw.chars().any(|c| c.is_whitespace() || c == '+') {
            // '+' is the artifact-name field separator
            return Err(MalformedJobDescriptor::new(
                raw,
                "fields must not contain whitespace or '+'",
            ));
        }

        Ok(Self {
            organization: organization.to_string(),
            project: project.to_string(),
            pull_request: PullRequest::parse(pr),
        })
    }

    pub fn organization(&self) -> &str {
        &self.organization
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn pull_request(&self) -> &PullRequest {
        &self.pull_request
    }

    /// Clone URL of the project under `base` (e.g. `https://github.com`).
    pub fn clone_url(&self, base: &str) -> String {
        format!(
            "{}/{}/{}",
            base.trim_end_matches('/'),
            self.organization,
            self.project
        )
    }

    /// Local branch the pull request head is fetched into, if any.
    pub fn local_branch(&self) -> Option<String> {
        match &self.pull_request {
            PullRequest::DefaultBranch => None,
            PullRequest::Number(n) => Some(format!("pr_{n}")),
        }
    }

    /// Fetch refspec `pull/<N>/head:pr_<N>`, if this job targets a pull request.
    pub fn pr_refspec(&self) -> Option<String> {
        match &self.pull_request {
            PullRequest::DefaultBranch => None,
            PullRequest::Number(n) => Some(format!("pull/{n}/head:pr_{n}")),
        }
    }
}

impl FromStr for JobDescriptor {
    type Err = MalformedJobDescriptor;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Display for JobDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.organization, self.project, self.pull_request
        )
    }
}

/// Identifier of one worker process, used to correlate its log lines.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct WorkerId(pub Uuid);

impl Default for WorkerId {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
