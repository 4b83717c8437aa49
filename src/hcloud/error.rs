//! Mapping of Hetzner Cloud API failures onto [`ProviderError`].

use reqwest::StatusCode;

use crate::provider::ProviderError;

use super::types::ApiErrorEnvelope;

/// Resource a request addressed, used to fill `NotFound` errors.
#[derive(Clone, Copy, Debug)]
pub(super) struct Target<'a> {
    pub(super) resource: &'a str,
    pub(super) id: &'a str,
}

impl<'a> Target<'a> {
    pub(super) const fn new(resource: &'a str, id: &'a str) -> Self {
        Self { resource, id }
    }

    pub(super) fn not_found(self) -> ProviderError {
        ProviderError::NotFound {
            resource: self.resource.to_owned(),
            id: self.id.to_owned(),
        }
    }
}

pub(super) fn transport(err: &reqwest::Error) -> ProviderError {
    ProviderError::Unavailable {
        message: err.to_string(),
    }
}

pub(super) fn decode(err: &serde_json::Error) -> ProviderError {
    ProviderError::InvalidResponse {
        message: err.to_string(),
    }
}

pub(super) fn from_response(status: StatusCode, body: &[u8], target: Target<'_>) -> ProviderError {
    let (code, message) = serde_json::from_slice::<ApiErrorEnvelope>(body).map_or_else(
        |_| {
            (
                status.as_str().to_owned(),
                String::from_utf8_lossy(body).into_owned(),
            )
        },
        |envelope| (envelope.error.code, envelope.error.message),
    );
    classify(status.as_u16(), code, message, target)
}

pub(super) fn classify(
    status: u16,
    code: String,
    message: String,
    target: Target<'_>,
) -> ProviderError {
    match (status, code.as_str()) {
        (429, _) | (_, "rate_limit_exceeded") => ProviderError::RateLimited { message },
        (_, "locked" | "conflict") => ProviderError::Locked { message },
        (404, _) | (_, "not_found") => target.not_found(),
        (500..=599, _) | (_, "unavailable" | "timeout") => ProviderError::Unavailable { message },
        _ => ProviderError::Rejected { code, message },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const VOLUME: Target<'static> = Target::new("volume", "4711");

    #[rstest]
    #[case(429, "rate_limit_exceeded", true)]
    #[case(423, "locked", true)]
    #[case(409, "conflict", true)]
    #[case(503, "unavailable", true)]
    #[case(422, "invalid_input", false)]
    #[case(404, "not_found", false)]
    fn classification_marks_transient_codes(
        #[case] status: u16,
        #[case] code: &str,
        #[case] transient: bool,
    ) {
        let err = classify(status, code.to_owned(), String::from("msg"), VOLUME);
        assert_eq!(err.is_transient(), transient, "{status} {code}: {err}");
    }

    #[test]
    fn not_found_names_target() {
        let err = from_response(
            StatusCode::NOT_FOUND,
            br#"{"error": {"code": "not_found", "message": "volume not found"}}"#,
            VOLUME,
        );
        assert_eq!(
            err,
            ProviderError::NotFound {
                resource: String::from("volume"),
                id: String::from("4711"),
            }
        );
    }

    #[test]
    fn unparsable_body_keeps_raw_text() {
        let err = from_response(StatusCode::BAD_REQUEST, b"oops", VOLUME);
        assert_eq!(
            err,
            ProviderError::Rejected {
                code: String::from("400"),
                message: String::from("oops"),
            }
        );
    }
}
