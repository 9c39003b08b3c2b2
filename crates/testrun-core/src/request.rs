//! Test run requests and their validation.

use serde::{Deserialize, Serialize};
use std::ops::Deref;
use std::time::Duration;

use crate::error::ValidationError;
use crate::framework::Framework;

/// Informational priority carried with a request. It never affects scheduling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

/// A request to execute one test (or test selection) in one framework.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestRunRequest {
    /// Runner that executes the test.
    pub framework: Framework,

    /// Test name or path used as the framework's selection filter.
    #[serde(alias = "testName")]
    pub test_identifier: String,

    /// Tag filters. Empty means no tag filter.
    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default)]
    pub priority: Priority,

    #[serde(default)]
    pub description: Option<String>,

    /// Test location passed to the runner. Falls back to the framework default.
    #[serde(default)]
    pub test_path: Option<String>,

    /// Deadline override in seconds. Falls back to the orchestrator default.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl TestRunRequest {
    /// Create a new request with no tags and default priority.
    pub fn new(framework: Framework, test_identifier: impl Into<String>) -> Self {
        Self {
            framework,
            test_identifier: test_identifier.into(),
            tags: Vec::new(),
            priority: Priority::default(),
            description: None,
            test_path: None,
            timeout_secs: None,
        }
    }

    /// Builder method to add a tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Builder method to set the test path.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.test_path = Some(path.into());
        self
    }

    /// Builder method to set a per-request deadline.
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    /// Check the request and normalize it.
    ///
    /// Normalization trims whitespace, sorts and deduplicates tags, and
    /// drops blank optional strings.
    pub fn validate(self) -> Result<ValidRequest, ValidationError> {
        let test_identifier = self.test_identifier.trim().to_string();
        if test_identifier.is_empty() {
            return Err(ValidationError::EmptyTestIdentifier);
        }

        let mut tags = Vec::with_capacity(self.tags.len());
        for (index, tag) in self.tags.iter().enumerate() {
            let tag = tag.trim();
            if tag.is_empty() {
                return Err(ValidationError::EmptyTag { index });
            }
            tags.push(tag.to_string());
        }
        tags.sort();
        tags.dedup();

        if self.timeout_secs == Some(0) {
            return Err(ValidationError::ZeroTimeout);
        }

        Ok(ValidRequest(Self {
            framework: self.framework,
            test_identifier,
            tags,
            priority: self.priority,
            description: non_blank(self.description),
            test_path: non_blank(self.test_path),
            timeout_secs: self.timeout_secs,
        }))
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// A request that passed validation. Only these reach the command builder.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ValidRequest(TestRunRequest);

impl ValidRequest {
    /// Deadline for this request, or `default` when none was requested.
    pub fn deadline(&self, default: Duration) -> Duration {
        self.0
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(default)
    }

    pub fn into_inner(self) -> TestRunRequest {
        self.0
    }
}

impl Deref for ValidRequest {
    type Target = TestRunRequest;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_normalizes() {
        let valid = TestRunRequest::new(Framework::Pytest, "  test_login ")
            .with_tag("smoke")
            .with_tag(" critical ")
            .with_tag("smoke")
            .with_path("   ")
            .validate()
            .unwrap();

        assert_eq!(valid.test_identifier, "test_login");
        assert_eq!(valid.tags, vec!["critical", "smoke"]);
        assert!(valid.test_path.is_none());
    }

    #[test]
    fn test_empty_identifier_rejected() {
        let err = TestRunRequest::new(Framework::Robot, " \t").validate();
        assert_eq!(err, Err(ValidationError::EmptyTestIdentifier));
    }

    #[test]
    fn test_empty_tag_rejected() {
        let err = TestRunRequest::new(Framework::Robot, "smoke")
            .with_tag("ok")
            .with_tag("")
            .validate();
        assert_eq!(err, Err(ValidationError::EmptyTag { index: 1 }));
    }

    #[test]
    fn test_empty_tag_set_is_valid() {
        let valid = TestRunRequest::new(Framework::Playwright, "login-flow")
            .validate()
            .unwrap();
        assert!(valid.tags.is_empty());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let err = TestRunRequest::new(Framework::Pytest, "x")
            .with_timeout_secs(0)
            .validate();
        assert_eq!(err, Err(ValidationError::ZeroTimeout));
    }

    #[test]
    fn test_deadline_fallback() {
        let default = Duration::from_secs(300);
        let plain = TestRunRequest::new(Framework::Pytest, "x").validate().unwrap();
        assert_eq!(plain.deadline(default), default);

        let custom = TestRunRequest::new(Framework::Pytest, "x")
            .with_timeout_secs(5)
            .validate()
            .unwrap();
        assert_eq!(custom.deadline(default), Duration::from_secs(5));
    }

    #[test]
    fn test_deserialize_legacy_field_names() {
        let req: TestRunRequest = serde_json::from_str(
            r#"{"framework": "robot", "testName": "Login", "tags": ["critical"], "priority": "high"}"#,
        )
        .unwrap();
        assert_eq!(req.framework, Framework::Robot);
        assert_eq!(req.test_identifier, "Login");
        assert_eq!(req.priority, Priority::High);

        let unknown = serde_json::from_str::<TestRunRequest>(
            r#"{"framework": "cypress", "testIdentifier": "x"}"#,
        );
        assert!(unknown.is_err());
    }
}
