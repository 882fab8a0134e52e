//! Sample filtering for scraped metrics
//!
//! The scraping engine consults the workload's filter after a scrape and
//! before forwarding samples upstream.

use crate::models::AllowRule;

/// One scraped metric sample
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sample {
    pub name: String,
    pub labels: Vec<(String, String)>,
}

impl Sample {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            labels: Vec::new(),
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.push((key.into(), value.into()));
        self
    }

    fn label(&self, key: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Decides whether an individual sample may be forwarded
pub trait SampleFilter: Send + Sync {
    fn permit(&self, sample: &Sample) -> bool;
}

/// Accepts every sample
#[derive(Debug, Default)]
pub struct PermissiveFilter;

impl SampleFilter for PermissiveFilter {
    fn permit(&self, _sample: &Sample) -> bool {
        true
    }
}

/// Accepts only samples matching at least one allow-list rule.
///
/// A rule matches when its name equals the sample name and every label
/// predicate equals the corresponding sample label.
#[derive(Debug, Default)]
pub struct RestrictiveFilter {
    rules: Vec<AllowRule>,
}

impl RestrictiveFilter {
    pub fn new(rules: Vec<AllowRule>) -> Self {
        Self { rules }
    }
}

impl SampleFilter for RestrictiveFilter {
    fn permit(&self, sample: &Sample) -> bool {
        self.rules.iter().any(|rule| {
            rule.name == sample.name
                && rule
                    .labels
                    .iter()
                    .all(|(key, value)| sample.label(key) == Some(value.as_str()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_permissive_accepts_everything() {
        let filter = PermissiveFilter;
        assert!(filter.permit(&Sample::new("node_cpu_seconds_total")));
        assert!(filter.permit(&Sample::new("")));
    }

    #[test]
    fn test_restrictive_matches_by_name() {
        let filter = RestrictiveFilter::new(vec![AllowRule {
            name: "http_requests_total".to_string(),
            labels: HashMap::new(),
        }]);
        assert!(filter.permit(&Sample::new("http_requests_total")));
        assert!(!filter.permit(&Sample::new("http_requests_in_flight")));
    }

    #[test]
    fn test_restrictive_label_predicates_must_all_match() {
        let mut labels = HashMap::new();
        labels.insert("code".to_string(), "500".to_string());
        let filter = RestrictiveFilter::new(vec![AllowRule {
            name: "http_requests_total".to_string(),
            labels,
        }]);

        let matching = Sample::new("http_requests_total")
            .with_label("code", "500")
            .with_label("method", "GET");
        let wrong_value = Sample::new("http_requests_total").with_label("code", "200");
        let missing_label = Sample::new("http_requests_total");

        assert!(filter.permit(&matching));
        assert!(!filter.permit(&wrong_value));
        assert!(!filter.permit(&missing_label));
    }

    #[test]
    fn test_empty_rule_set_denies_everything() {
        let filter = RestrictiveFilter::default();
        assert!(!filter.permit(&Sample::new("up")));
    }
}
