//! Request extraction with normalize-then-validate semantics, gated behind the
//! `axum` feature so non-HTTP consumers of this crate don't pull in axum.

#![cfg(feature = "axum")]

use axum::{
    extract::{rejection::JsonRejection, FromRequest, Json, Request},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{de::DeserializeOwned, Serialize};
use validator::Validate;

/// Types that can normalize themselves before validation (e.g. coercing a
/// dialect's optional fields into canonical form). Default is a no-op.
pub trait Normalizable {
    fn normalize(&mut self) {}
}

pub struct ValidatedJson<T>(pub T);

impl<T> std::ops::Deref for ValidatedJson<T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> std::ops::DerefMut for ValidatedJson<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.0
    }
}

#[derive(Serialize)]
struct InvalidRequestError<'a> {
    error: InvalidRequestDetail<'a>,
}

#[derive(Serialize)]
struct InvalidRequestDetail<'a> {
    message: String,
    #[serde(rename = "type")]
    error_type: &'static str,
    code: &'a str,
}

fn invalid_request(message: String, code: &'static str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(InvalidRequestError {
            error: InvalidRequestDetail {
                message,
                error_type: "invalid_request_error",
                code,
            },
        }),
    )
        .into_response()
}

impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Normalizable + Validate,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(mut value) = Json::<T>::from_request(req, state)
            .await
            .map_err(map_json_rejection)?;

        value.normalize();
        value.validate().map_err(|errors| {
            let message = errors
                .field_errors()
                .into_iter()
                .flat_map(|(field, errs)| {
                    errs.iter().map(move |e| {
                        e.message
                            .clone()
                            .map(|m| m.to_string())
                            .unwrap_or_else(|| format!("{field} is invalid"))
                    })
                })
                .collect::<Vec<_>>()
                .join("; ");
            invalid_request(message, "400")
        })?;

        Ok(ValidatedJson(value))
    }
}

fn map_json_rejection(rejection: JsonRejection) -> Response {
    match rejection {
        JsonRejection::JsonDataError(e) => invalid_request(e.to_string(), "json_parse_error"),
        JsonRejection::JsonSyntaxError(e) => invalid_request(e.to_string(), "json_parse_error"),
        JsonRejection::MissingJsonContentType(e) => invalid_request(e.to_string(), "json_parse_error"),
        other => invalid_request(other.to_string(), "json_parse_error"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, Validate)]
    struct Sample {
        #[validate(length(min = 1))]
        name: String,
    }

    impl Normalizable for Sample {}

    #[test]
    fn validate_rejects_empty_field() {
        let sample = Sample {
            name: String::new(),
        };
        assert!(sample.validate().is_err());
    }
}
