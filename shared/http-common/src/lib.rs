//! Shared HTTP utilities for the goods catalog workspace.
//!
//! Provides framework-agnostic response bodies, time formatting and query
//! string helpers used by the api-server.

use chrono::{DateTime, SecondsFormat, Utc};
use std::time::SystemTime;

// ============================================================================
// JSON Response Helpers (framework-agnostic)
// ============================================================================

/// Create a structured error JSON with a default message based on the code.
///
/// Returns: `{"error": {"code": "<code>", "message": "<default message>"}}`
pub fn json_err(code: &str) -> serde_json::Value {
    let message = match code {
        "not_found" => "Resource not found",
        "bad_request" => "Bad request",
        "invalid_pagination" => "Invalid pagination parameters",
        "invalid_field" => "Unknown field name",
        "unauthorized" => "Organization scope required",
        "error" | "internal" => "Internal server error",
        _ => code, // Fallback to code as message for unknown codes
    };
    serde_json::json!({"error": {"code": code, "message": message}})
}

/// Create a structured error JSON with a custom message.
///
/// Returns: `{"error": {"code": "<code>", "message": "<message>"}}`
pub fn json_error_with_message(code: &str, message: &str) -> serde_json::Value {
    serde_json::json!({"error": {"code": code, "message": message}})
}

// ============================================================================
// Time Utilities
// ============================================================================

/// Convert SystemTime to RFC3339 string (millisecond precision, UTC).
pub fn system_time_to_rfc3339(t: SystemTime) -> String {
    let dt: DateTime<Utc> = t.into();
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

// ============================================================================
// Query Parsing
// ============================================================================

/// Split a comma-separated query value (`fields=uuid,name`) into trimmed,
/// non-empty items.
pub fn split_list(value: Option<&str>) -> Vec<&str> {
    value
        .map(|v| v.split(',').map(str::trim).filter(|s| !s.is_empty()).collect())
        .unwrap_or_default()
}

/// Parse every item of a comma-separated list with `parse`.
///
/// Returns the first item `parse` rejects as the error.
pub fn parse_list<T, F>(value: Option<&str>, parse: F) -> Result<Vec<T>, String>
where
    F: Fn(&str) -> Option<T>,
{
    split_list(value)
        .into_iter()
        .map(|item| parse(item).ok_or_else(|| item.to_string()))
        .collect()
}
