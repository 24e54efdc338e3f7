//! Uniform JSON response envelope.
//!
//! Every JSON body has the shape `{"status", "data", "error"}`; listings add
//! `limit`, `offset` and `total_count`. The body status is always the
//! transport status.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// Pagination fields attached to list responses.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct Page {
    pub limit: u64,
    pub offset: u64,
    pub total_count: u64,
}

/// Response body envelope.
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub status: u16,
    pub data: Option<T>,
    pub error: Option<Vec<String>>,
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub page: Option<Page>,
}

impl<T> Envelope<T> {
    pub fn error(status: StatusCode, messages: Vec<String>) -> Self {
        Self {
            status: status.as_u16(),
            data: None,
            error: Some(messages),
            page: None,
        }
    }
}

/// A successful handler reply rendered inside the envelope.
#[derive(Debug)]
pub struct Reply<T> {
    status: StatusCode,
    body: Envelope<T>,
}

impl<T: Serialize> Reply<T> {
    pub fn with_status(status: StatusCode, data: T) -> Self {
        Self {
            status,
            body: Envelope {
                status: status.as_u16(),
                data: Some(data),
                error: None,
                page: None,
            },
        }
    }

    pub fn ok(data: T) -> Self {
        Self::with_status(StatusCode::OK, data)
    }

    pub fn created(data: T) -> Self {
        Self::with_status(StatusCode::CREATED, data)
    }

    pub fn page(data: T, page: Page) -> Self {
        let mut reply = Self::ok(data);
        reply.body.page = Some(page);
        reply
    }
}

impl Reply<()> {
    /// A success envelope with `data: null`.
    pub fn empty() -> Self {
        Self {
            status: StatusCode::OK,
            body: Envelope {
                status: StatusCode::OK.as_u16(),
                data: None,
                error: None,
                page: None,
            },
        }
    }
}

impl<T: Serialize> IntoResponse for Reply<T> {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}
