//! Lighthouse assertion-results parsing.
//!
//! The audit tool writes a list of per-assertion records to a fixed
//! artifact path. This module turns the failing records into findings with
//! per-route, per-metric identity and explicit threshold attribution, so
//! the repair loop can reason about what regressed and against what bar.

use crate::config::LighthouseConfig;
use crate::report::{Finding, GateKind};
use serde::Deserialize;
use std::path::Path;
use tracing::debug;

/// Artifact path relative to the project root, as written by the default
/// audit runner.
pub const ASSERTION_RESULTS_PATH: &str = ".lighthouseci/assertion-results.json";

// ============================================================================
// Artifact shape
// ============================================================================

/// One assertion record from the audit artifact.
///
/// The artifact is tool-owned JSON; every field beyond `passed` is
/// optional in practice, so the struct keeps them optional and the
/// extractor decides what it needs.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssertionRecord {
    #[serde(default)]
    pub passed: bool,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub assertion: Option<String>,
    #[serde(default)]
    pub numeric_value: Option<f64>,
    #[serde(default)]
    pub expected: Option<serde_json::Value>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub audit_property: Option<String>,
}

// ============================================================================
// Extraction
// ============================================================================

/// Parse the assertion-results artifact at its fixed path under `cwd`.
///
/// A missing or unparsable artifact yields no findings; the gate runner
/// falls back to its exit-code finding in that case.
#[must_use]
pub fn extract_findings(cwd: &Path, config: &LighthouseConfig) -> Vec<Finding> {
    let path = cwd.join(ASSERTION_RESULTS_PATH);
    let Ok(text) = std::fs::read_to_string(&path) else {
        debug!(path = %path.display(), "no assertion-results artifact");
        return Vec::new();
    };
    let Ok(records) = serde_json::from_str::<Vec<AssertionRecord>>(&text) else {
        debug!(path = %path.display(), "assertion-results artifact did not parse");
        return Vec::new();
    };
    findings_from_records(&records, config)
}

/// Turn parsed assertion records into findings.
#[must_use]
pub fn findings_from_records(
    records: &[AssertionRecord],
    config: &LighthouseConfig,
) -> Vec<Finding> {
    records
        .iter()
        .filter(|r| !r.passed)
        .map(|record| finding_from_record(record, config))
        .collect()
}

fn finding_from_record(record: &AssertionRecord, config: &LighthouseConfig) -> Finding {
    let route = record
        .url
        .as_deref()
        .map(route_of)
        .unwrap_or_else(|| "/".to_string());
    let metric = record
        .assertion
        .clone()
        .unwrap_or_else(|| "unknown".to_string());

    let (threshold, source) = attribute_threshold(record, &metric, config);

    let actual = match record.numeric_value {
        Some(v) => serde_json::json!(v),
        None => serde_json::json!(record
            .message
            .clone()
            .unwrap_or_else(|| "n/a".to_string())),
    };

    let summary = record.message.clone().unwrap_or_else(|| {
        format!("Lighthouse assertion '{metric}' failed for {route}")
    });

    let mut finding = Finding::new(
        format!("lh_{}_{}", slug(&route), slug(&metric)),
        GateKind::Lighthouse,
        summary,
    );
    finding.route = Some(route);
    finding.metric = Some(metric);
    finding.actual = Some(actual);
    finding.threshold = Some(threshold);
    finding.raw.threshold_source = Some(source);
    finding
}

/// Resolve the threshold a failing assertion was judged against.
///
/// First match wins: the assertion's own `expected` field, then a config
/// entry keyed by the category name for `categories:<name>` assertions,
/// then an exact config key match, then `unknown`.
fn attribute_threshold(
    record: &AssertionRecord,
    metric: &str,
    config: &LighthouseConfig,
) -> (serde_json::Value, String) {
    if let Some(expected) = &record.expected {
        return (expected.clone(), "assertion_expected".to_string());
    }

    if let Some(category) = metric.strip_prefix("categories:") {
        if let Some(threshold) = config.thresholds.get(category) {
            return (
                serde_json::json!(threshold),
                format!("config_category:{category}"),
            );
        }
    }

    if let Some(threshold) = config.thresholds.get(metric) {
        return (
            serde_json::json!(threshold),
            format!("config_metric:{metric}"),
        );
    }

    (serde_json::json!("n/a"), "unknown".to_string())
}

/// Path component of a URL, query stripped; `/` when unparsable.
fn route_of(url: &str) -> String {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);

    let path = if let Some(scheme_end) = without_query.find("://") {
        let after_scheme = &without_query[scheme_end + 3..];
        match after_scheme.find('/') {
            Some(slash) => &after_scheme[slash..],
            None => "/",
        }
    } else if without_query.starts_with('/') {
        without_query
    } else {
        return "/".to_string();
    };

    if path.is_empty() {
        "/".to_string()
    } else {
        path.to_string()
    }
}

/// Lowercase, non-alphanumerics collapsed to a single underscore,
/// trimmed of leading/trailing underscores.
fn slug(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_was_sep = true;
    for ch in text.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
            last_was_sep = false;
        } else if !last_was_sep {
            out.push('_');
            last_was_sep = true;
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    if out.is_empty() {
        "root".to_string()
    } else {
        out
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn record(json: &str) -> AssertionRecord {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_route_of_full_url() {
        assert_eq!(route_of("https://example.com/pricing?x=1"), "/pricing");
        assert_eq!(route_of("https://example.com/a/b"), "/a/b");
    }

    #[test]
    fn test_route_of_url_without_path_maps_to_root() {
        assert_eq!(route_of("https://example.com"), "/");
        assert_eq!(route_of("not a url"), "/");
        assert_eq!(route_of(""), "/");
    }

    #[test]
    fn test_route_of_bare_path() {
        assert_eq!(route_of("/checkout?step=2"), "/checkout");
    }

    #[test]
    fn test_slug_collapses_nonalnum() {
        assert_eq!(slug("/pricing"), "pricing");
        assert_eq!(slug("categories:performance"), "categories_performance");
        assert_eq!(slug("first-contentful-paint"), "first_contentful_paint");
        assert_eq!(slug("///"), "root");
    }

    #[test]
    fn test_finding_id_stable_for_route_metric_pair() {
        let config = LighthouseConfig::default();
        let rec = record(
            r#"{"passed": false, "url": "https://app.dev/pricing", "assertion": "categories:seo"}"#,
        );
        let a = finding_from_record(&rec, &config);
        let b = finding_from_record(&rec, &config);
        assert_eq!(a.id, b.id);
        assert_eq!(a.id, "lh_pricing_categories_seo");
    }

    #[test]
    fn test_threshold_from_assertion_expected() {
        let config = LighthouseConfig::default();
        let rec = record(
            r#"{"passed": false, "url": "https://a.dev/", "assertion": "categories:performance",
                "expected": 0.9, "numericValue": 0.62}"#,
        );
        let finding = finding_from_record(&rec, &config);
        assert_eq!(finding.threshold, Some(serde_json::json!(0.9)));
        assert_eq!(
            finding.raw.threshold_source.as_deref(),
            Some("assertion_expected")
        );
        assert_eq!(finding.actual, Some(serde_json::json!(0.62)));
    }

    #[test]
    fn test_threshold_from_config_category() {
        let config = LighthouseConfig::default();
        let rec = record(
            r#"{"passed": false, "url": "https://a.dev/x", "assertion": "categories:accessibility"}"#,
        );
        let finding = finding_from_record(&rec, &config);
        assert_eq!(finding.threshold, Some(serde_json::json!(0.8)));
        assert_eq!(
            finding.raw.threshold_source.as_deref(),
            Some("config_category:accessibility")
        );
    }

    #[test]
    fn test_threshold_from_config_metric_exact_key() {
        let mut config = LighthouseConfig::default();
        config
            .thresholds
            .insert("first-contentful-paint".to_string(), 2000.0);
        let rec = record(
            r#"{"passed": false, "url": "https://a.dev/", "assertion": "first-contentful-paint",
                "numericValue": 3500}"#,
        );
        let finding = finding_from_record(&rec, &config);
        assert_eq!(finding.threshold, Some(serde_json::json!(2000.0)));
        assert_eq!(
            finding.raw.threshold_source.as_deref(),
            Some("config_metric:first-contentful-paint")
        );
    }

    #[test]
    fn test_threshold_unknown() {
        let config = LighthouseConfig::default();
        let rec =
            record(r#"{"passed": false, "url": "https://a.dev/", "assertion": "total-byte-weight"}"#);
        let finding = finding_from_record(&rec, &config);
        assert_eq!(finding.threshold, Some(serde_json::json!("n/a")));
        assert_eq!(finding.raw.threshold_source.as_deref(), Some("unknown"));
    }

    #[test]
    fn test_passing_records_ignored() {
        let config = LighthouseConfig::default();
        let records = vec![
            record(r#"{"passed": true, "url": "https://a.dev/", "assertion": "categories:seo"}"#),
            record(r#"{"passed": false, "url": "https://a.dev/", "assertion": "categories:seo"}"#),
        ];
        let findings = findings_from_records(&records, &config);
        assert_eq!(findings.len(), 1);
    }

    #[test]
    fn test_actual_falls_back_to_message() {
        let config = LighthouseConfig::default();
        let rec = record(
            r#"{"passed": false, "url": "https://a.dev/", "assertion": "color-contrast",
                "message": "expected no failing elements"}"#,
        );
        let finding = finding_from_record(&rec, &config);
        assert_eq!(
            finding.actual,
            Some(serde_json::json!("expected no failing elements"))
        );
    }

    #[test]
    fn test_extract_findings_missing_artifact() {
        let temp = tempfile::TempDir::new().unwrap();
        let findings = extract_findings(temp.path(), &LighthouseConfig::default());
        assert!(findings.is_empty());
    }

    #[test]
    fn test_extract_findings_from_artifact_file() {
        let temp = tempfile::TempDir::new().unwrap();
        let dir = temp.path().join(".lighthouseci");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("assertion-results.json"),
            r#"[{"passed": false, "url": "https://a.dev/docs", "assertion": "categories:performance",
                 "numericValue": 0.5, "expected": 0.9}]"#,
        )
        .unwrap();

        let findings = extract_findings(temp.path(), &LighthouseConfig::default());
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].route.as_deref(), Some("/docs"));
        assert_eq!(findings[0].id, "lh_docs_categories_performance");
    }
}
