//! Structural acceptance gate for produced specifications.

use crate::load_test::{LoadTestSpec, HTTP_METHODS};
use serde::Serialize;

/// Host substituted when no URL can be found.
pub const DEFAULT_BASE_URL: &str = "https://api.example.com";

const MAX_SENSIBLE_USERS: u32 = 10_000;

/// Whether `url` is empty or a stand-in rather than a real target.
pub fn is_placeholder_url(url: &str) -> bool {
    let url = url.trim();
    url.is_empty()
        || url.trim_end_matches('/') == DEFAULT_BASE_URL
        || url.contains("your-")
        || url.contains('<')
}

fn is_absolute(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CommandValidator;

impl CommandValidator {
    pub fn validate(&self, spec: &LoadTestSpec) -> ValidationReport {
        let mut report = ValidationReport::default();
        let errors = &mut report.errors;
        let warnings = &mut report.warnings;

        if spec.id.trim().is_empty() {
            errors.push("id is required".to_string());
        }
        if spec.name.trim().is_empty() {
            errors.push("name is required".to_string());
        }
        if spec.requests.is_empty() {
            errors.push("at least one request is required".to_string());
        }

        for (i, request) in spec.requests.iter().enumerate() {
            let method = request.method.to_ascii_uppercase();
            if !HTTP_METHODS.contains(&method.as_str()) {
                errors.push(format!("requests[{}]: unknown HTTP method '{}'", i, request.method));
            }

            let url = request.url.trim();
            if url.is_empty() {
                errors.push(format!("requests[{}]: url is required", i));
            } else if !is_absolute(url) && !url.starts_with('/') {
                errors.push(format!("requests[{}]: url '{}' is neither absolute nor path-rooted", i, url));
            } else if is_placeholder_url(url) {
                warnings.push(format!("requests[{}]: url '{}' looks like a placeholder", i, url));
            }

            if let Some(payload) = &request.payload {
                if matches!(method.as_str(), "GET" | "HEAD") {
                    warnings.push(format!("requests[{}]: {} request carries a body", i, method));
                }
                let has_content_type = request.headers.keys().any(|k| k.eq_ignore_ascii_case("content-type"));
                if !has_content_type && !payload.template.trim().is_empty() {
                    warnings.push(format!("requests[{}]: body without Content-Type header", i));
                }
            }
        }

        if spec.duration.value == 0 {
            errors.push("duration must be greater than zero".to_string());
        }

        let pattern = &spec.load_pattern;
        let users = pattern.virtual_users.filter(|n| *n > 0);
        let rate = pattern.requests_per_second.filter(|n| *n > 0);
        if users.is_none() && rate.is_none() {
            errors.push("loadPattern needs virtualUsers or requestsPerSecond".to_string());
        }
        if users.is_some_and(|n| n > MAX_SENSIBLE_USERS) {
            warnings.push(format!("loadPattern.virtualUsers above {} is unusually large", MAX_SENSIBLE_USERS));
        }

        for step in spec.workflow.iter().flatten() {
            if step.request_index >= spec.requests.len() {
                errors.push(format!(
                    "workflow step '{}' references missing request {}",
                    step.name, step.request_index
                ));
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_test::{LoadPattern, PayloadSpec, RequestSpec, WorkflowStep};

    fn spec() -> LoadTestSpec {
        serde_json::from_value(serde_json::json!({
            "id": "loadtest_1",
            "name": "health",
            "requests": [{"method": "GET", "url": "https://shop.test/health"}],
            "loadPattern": {"type": "constant", "virtualUsers": 10}
        }))
        .unwrap()
    }

    #[test]
    fn test_valid_spec() {
        let report = CommandValidator.validate(&spec());
        assert!(report.is_valid(), "{:?}", report);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_required_fields() {
        let mut s = spec();
        s.id.clear();
        s.name = "  ".into();
        s.requests.clear();
        s.duration.value = 0;
        s.load_pattern = LoadPattern::default();
        let report = CommandValidator.validate(&s);
        assert_eq!(report.errors.len(), 5, "{:?}", report.errors);
    }

    #[test]
    fn test_request_checks() {
        let mut s = spec();
        s.requests = vec![
            RequestSpec::new("FETCH", "https://shop.test"),
            RequestSpec::new("GET", "shop.test/x"),
            RequestSpec::new("post", "/orders"),
        ];
        let report = CommandValidator.validate(&s);
        assert_eq!(report.errors.len(), 2, "{:?}", report.errors);
        assert!(report.errors[0].contains("FETCH"));
        assert!(report.errors[1].contains("neither absolute nor path-rooted"));
    }

    #[test]
    fn test_warnings() {
        let mut s = spec();
        let mut get_with_body = RequestSpec::new("GET", DEFAULT_BASE_URL);
        get_with_body.payload = Some(PayloadSpec {
            template: "{}".into(),
            variables: Vec::new(),
        });
        s.requests = vec![get_with_body];
        s.load_pattern.virtual_users = Some(50_000);
        let report = CommandValidator.validate(&s);
        assert!(report.is_valid());
        assert_eq!(report.warnings.len(), 4, "{:?}", report.warnings);
    }

    #[test]
    fn test_rate_only_pattern_is_valid() {
        let mut s = spec();
        s.load_pattern.virtual_users = None;
        s.load_pattern.requests_per_second = Some(20);
        assert!(CommandValidator.validate(&s).is_valid());
    }

    #[test]
    fn test_workflow_index_checked() {
        let mut s = spec();
        s.workflow = Some(vec![WorkflowStep {
            name: "checkout".into(),
            request_index: 3,
            think_time_ms: None,
            condition: None,
        }]);
        assert!(!CommandValidator.validate(&s).is_valid());
    }

    #[test]
    fn test_placeholder_detection() {
        assert!(is_placeholder_url(""));
        assert!(is_placeholder_url("https://api.example.com/"));
        assert!(is_placeholder_url("https://<your-host>/x"));
        assert!(!is_placeholder_url("https://api.example.com/users"));
    }
}
