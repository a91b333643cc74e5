//! Native API served by the facade under `/v/`
//!
//! Currently a single read-only storage location listing backed by a seeded
//! hierarchy.

use crate::error::{full_body, json_error_response, FacadeErrorCode, FacadeResponse};
use hyper::header::{HeaderMap, HeaderValue, ALLOW, AUTHORIZATION, CONTENT_TYPE};
use hyper::{Method, Response, StatusCode, Uri};
use serde::Serialize;

pub const STORAGE_LOCATIONS_PATH: &str = "/v/storage/locations";

/// A physical storage location
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageLocation {
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub parent_id: Option<String>,
}

impl StorageLocation {
    fn new(id: &str, label: &str, kind: &str, parent_id: Option<&str>) -> Self {
        Self {
            id: id.to_string(),
            label: label.to_string(),
            kind: kind.to_string(),
            parent_id: parent_id.map(String::from),
        }
    }
}

#[derive(Debug, Serialize)]
struct StorageLocationsResponse {
    locations: Vec<StorageLocation>,
}

/// Whether a path belongs to the storage location endpoint
pub fn is_storage_locations_path(path: &str) -> bool {
    path == STORAGE_LOCATIONS_PATH
        || path
            .strip_prefix(STORAGE_LOCATIONS_PATH)
            .map(|rest| rest.starts_with('/'))
            .unwrap_or(false)
}

pub fn seed_storage_locations() -> Vec<StorageLocation> {
    vec![
        StorageLocation::new("loc_building_a", "Building A", "building", None),
        StorageLocation::new("loc_room_101", "Room 101", "room", Some("loc_building_a")),
        StorageLocation::new("loc_range_a", "Range A", "range", Some("loc_room_101")),
        StorageLocation::new("loc_shelf_3", "Shelf 3", "shelf", Some("loc_range_a")),
        StorageLocation::new("loc_shelf_4", "Shelf 4", "shelf", Some("loc_range_a")),
    ]
}

/// Keep locations under `parent_id` whose label contains `query` (case-insensitive).
pub fn filter_storage_locations(
    locations: Vec<StorageLocation>,
    parent_id: &str,
    query: &str,
) -> Vec<StorageLocation> {
    let query = query.to_lowercase();
    locations
        .into_iter()
        .filter(|location| {
            parent_id.is_empty() || location.parent_id.as_deref() == Some(parent_id)
        })
        .filter(|location| query.is_empty() || location.label.to_lowercase().contains(&query))
        .collect()
}

fn query_param(uri: &Uri, name: &str) -> String {
    uri.query()
        .and_then(|query| {
            url::form_urlencoded::parse(query.as_bytes())
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.trim().to_string())
        })
        .unwrap_or_default()
}

fn authorized(headers: &HeaderMap, token: Option<&str>) -> bool {
    let Some(token) = token else {
        return true;
    };
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim() == format!("Bearer {}", token))
        .unwrap_or(false)
}

/// Handle `GET /v/storage/locations`
pub fn storage_locations(
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
    token: Option<&str>,
) -> FacadeResponse {
    if method != Method::GET {
        let mut response =
            json_error_response(FacadeErrorCode::MethodNotAllowed, "method not allowed");
        response
            .headers_mut()
            .insert(ALLOW, HeaderValue::from_static("GET"));
        return response;
    }

    if !authorized(headers, token) {
        return json_error_response(FacadeErrorCode::Unauthorized, "unauthorized");
    }

    let locations = filter_storage_locations(
        seed_storage_locations(),
        &query_param(uri, "parent_id"),
        &query_param(uri, "query"),
    );
    let body = serde_json::to_string(&StorageLocationsResponse { locations })
        .unwrap_or_else(|_| r#"{"locations":[]}"#.to_string());

    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "application/json")
        .body(full_body(body))
        .expect("valid response with static header")
}
