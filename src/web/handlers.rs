use std::str::FromStr;

use salvo::prelude::*;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};

use crate::db::PageRequest;
use crate::media::IncomingFile;
use crate::web::{ApiError, WebState};

pub mod auth;
pub mod content;
pub mod database;
pub mod files;
pub mod health;
pub mod search;
pub mod subjects;
pub mod users;

/// Positive id from the route, e.g. `{id}`, within the schema's INTEGER key range.
pub(crate) fn path_id(req: &Request, name: &str) -> Result<i64, ApiError> {
    req.param::<String>(name)
        .as_deref()
        .and_then(parse_row_id)
        .ok_or_else(|| ApiError::bad_request(format!("invalid {name}")))
}

fn parse_row_id(raw: &str) -> Option<i64> {
    raw.parse::<i32>().ok().filter(|id| *id > 0).map(i64::from)
}

/// Optional query parameter; present but unparsable values are rejected.
pub(crate) fn query_param<T: FromStr>(req: &Request, name: &str) -> Result<Option<T>, ApiError> {
    match req.query::<String>(name) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ApiError::bad_request(format!("invalid {name}: {raw}"))),
    }
}

pub(crate) fn page_request(req: &Request, state: &WebState) -> Result<PageRequest, ApiError> {
    Ok(PageRequest::new(
        query_param(req, "page")?,
        query_param(req, "limit")?,
        state.pagination.default_limit,
        state.pagination.max_limit,
    ))
}

pub(crate) async fn json_body<T: DeserializeOwned>(req: &mut Request) -> Result<T, ApiError> {
    req.parse_json::<T>()
        .await
        .map_err(|err| ApiError::bad_request(format!("invalid JSON body: {err}")))
}

/// Collects multipart parts sent as `files` (repeated) or a single `file`.
pub(crate) async fn multipart_files(
    req: &mut Request,
    max_size: usize,
) -> Result<Vec<IncomingFile>, ApiError> {
    req.set_secure_max_size(max_size);
    let form = req
        .form_data()
        .await
        .map_err(|err| ApiError::bad_request(format!("invalid multipart body: {err}")))?;

    let incoming = ["files", "file"]
        .into_iter()
        .filter_map(|field| form.files.get_vec(field))
        .flatten()
        .map(|part| IncomingFile {
            name: part.name().map(str::to_string),
            path: part.path().to_path_buf(),
            size: part.size(),
            content_type: part.content_type().map(|mime| mime.to_string()),
        })
        .collect();
    Ok(incoming)
}

/// Deserializes a present field (including `null`) as `Some(..)`, so that an
/// absent field and an explicit `null` can be told apart in partial updates.
pub(crate) fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

pub(crate) fn trimmed_text(value: &str, field: &str, max_chars: usize) -> Result<String, ApiError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ApiError::bad_request(format!("{field} is required")));
    }
    if value.chars().count() > max_chars {
        return Err(ApiError::bad_request(format!(
            "{field} must be at most {max_chars} characters"
        )));
    }
    Ok(value.to_string())
}

/// Trims optional free text, treating blank input as absent.
pub(crate) fn optional_text(value: Option<String>) -> Option<String> {
    value
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}
