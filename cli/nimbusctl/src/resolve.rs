//! Name → resource resolution.
//!
//! The APIs are ID-addressed; for UX every command accepts either a stable
//! ID or a display name. Resolution is uniform across resource types:
//!
//! 1. try the token as a literal ID (direct fetch, never lists)
//! 2. on 404 only, list the collection (server-side filters applied) and
//!    filter client-side for exact name equality
//! 3. exactly one match wins; zero or many is `NotFound` either way, so an
//!    ambiguous name can never silently resolve to an arbitrary pick
//!
//! Names are not globally unique; uniqueness is only checked within the
//! scope of a single lookup.

use serde_json::Value;
use tracing::debug;

use crate::client::ServiceClient;
use crate::error::CliError;

/// Static description of a resource collection.
#[derive(Debug, Clone, Copy)]
pub struct ResourceKind {
    /// Envelope key for a single resource ("server").
    pub singular: &'static str,
    /// Envelope key for the list response ("servers"); also used in
    /// user-facing batch messages.
    pub plural: &'static str,
    /// Collection path ("/servers").
    pub path: &'static str,
}

/// Resolve a user-supplied token (name or ID) to exactly one resource.
///
/// `filters` are applied server-side on the list call (e.g. scoping by a
/// parent resource); the name comparison is always done client-side.
/// Transport errors other than 404 on the direct fetch propagate unchanged.
pub async fn find_resource(
    client: &ServiceClient,
    kind: &ResourceKind,
    token: &str,
    filters: &[(&str, &str)],
) -> Result<Value, CliError> {
    // An empty token is a literal ID attempt like any other; an ID match
    // always wins over a name match because this fetch runs first.
    match client
        .get::<Value>(&format!("{}/{}", kind.path, token))
        .await
    {
        Ok(body) => {
            debug!(kind = kind.singular, token, "resolved by ID");
            return Ok(unwrap_envelope(body, kind.singular));
        }
        Err(err) if err.is_http_not_found() => {
            debug!(kind = kind.singular, token, "ID fetch 404, falling back to list");
        }
        Err(err) => return Err(err),
    }

    let body: Value = client.get(&list_path(kind, filters)).await?;
    let items = body[kind.plural].as_array().cloned().unwrap_or_default();

    let mut matches: Vec<Value> = items
        .into_iter()
        .filter(|item| item["name"].as_str() == Some(token))
        .collect();

    match matches.len() {
        1 => Ok(matches.remove(0)),
        0 => Err(CliError::NotFound(format!(
            "No {} with a name or ID of '{}' exists",
            kind.singular, token
        ))),
        n => Err(CliError::NotFound(format!(
            "{} {}s exist with the name '{}'; use an ID to select exactly one",
            n, kind.singular, token
        ))),
    }
}

/// Delete a batch of resources by name or ID.
///
/// One failed resolution or deletion never short-circuits the rest: every
/// token that resolves gets its DELETE issued. Failures are aggregated into
/// a single command error afterwards.
pub async fn delete_resources(
    client: &ServiceClient,
    kind: &ResourceKind,
    tokens: &[String],
) -> Result<(), CliError> {
    let mut failures = 0usize;

    for token in tokens {
        let result = async {
            let resource = find_resource(client, kind, token, &[]).await?;
            let id = resource["id"].as_str().ok_or_else(|| {
                CliError::NotFound(format!(
                    "{} '{}' resolved without an id",
                    kind.singular, token
                ))
            })?;
            client.delete(&format!("{}/{}", kind.path, id)).await
        }
        .await;

        if let Err(err) = result {
            tracing::error!(kind = kind.singular, token = token.as_str(), error = %err,
                "failed to delete");
            failures += 1;
        }
    }

    if failures > 0 {
        Err(CliError::Command(format!(
            "{} of {} {} failed to delete.",
            failures,
            tokens.len(),
            kind.plural
        )))
    } else {
        Ok(())
    }
}

fn list_path(kind: &ResourceKind, filters: &[(&str, &str)]) -> String {
    if filters.is_empty() {
        return kind.path.to_string();
    }
    let query: Vec<String> = filters.iter().map(|(k, v)| format!("{k}={v}")).collect();
    format!("{}?{}", kind.path, query.join("&"))
}

fn unwrap_envelope(body: Value, key: &str) -> Value {
    match body.get(key) {
        Some(inner) => inner.clone(),
        None => body,
    }
}

/// Validate a string field as an integer within `[min, max]`.
///
/// Used for numeric request fields (port numbers) so that a malformed value
/// fails fast with `InvalidValue` before any request is constructed.
pub fn validate_int_range(name: &str, value: &str, min: i64, max: i64) -> Result<i64, CliError> {
    let parsed: i64 = value.trim().parse().map_err(|_| {
        CliError::InvalidValue(format!(
            "{name} should be an integer in [{min}, {max}], got '{value}'"
        ))
    })?;
    if parsed < min || parsed > max {
        return Err(CliError::InvalidValue(format!(
            "{name} should be an integer in [{min}, {max}], got {parsed}"
        )));
    }
    Ok(parsed)
}
