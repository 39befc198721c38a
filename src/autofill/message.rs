//! Request/response contract between a fill session and an external UI.
//!
//! One JSON object per message. Requests are tagged by `action`:
//!
//! ```text
//! {"action":"fillForm"}         -> {"success":true}
//! {"action":"checkFormStatus"}  -> {"isGoogleForm":true,"isFormFilled":false,"formFields":3}
//! ```

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Request {
    /// Fill the page now, unless this session already filled it.
    FillForm,
    /// Report whether the page is the form and how far the session got.
    CheckFormStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Response {
    Fill {
        success: bool,
    },
    #[serde(rename_all = "camelCase")]
    Status {
        is_google_form: bool,
        is_form_filled: bool,
        form_fields: usize,
    },
    Error {
        error: String,
    },
}

impl Response {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error: message.into(),
        }
    }
}

/// Parse one request line. Malformed input becomes an error response so the
/// caller can answer it instead of dropping the connection.
pub fn parse_request(line: &str) -> Result<Request, Response> {
    serde_json::from_str(line.trim())
        .map_err(|err| Response::error(format!("invalid request: {err}")))
}

/// Serialise a response as a single line.
pub fn encode_response(response: &Response) -> String {
    serde_json::to_string(response)
        .unwrap_or_else(|err| format!("{{\"error\":\"failed to encode response: {err}\"}}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_actions() {
        assert_eq!(parse_request(r#"{"action":"fillForm"}"#), Ok(Request::FillForm));
        assert_eq!(
            parse_request(r#" {"action":"checkFormStatus"} "#),
            Ok(Request::CheckFormStatus)
        );
    }

    #[test]
    fn unknown_action_is_an_error_response() {
        let Err(Response::Error { error }) = parse_request(r#"{"action":"logFormFill"}"#) else {
            panic!("expected an error response");
        };
        assert!(error.starts_with("invalid request"));
        assert!(parse_request("not json").is_err());
    }

    #[test]
    fn responses_use_the_wire_field_names() {
        assert_eq!(
            encode_response(&Response::Fill { success: true }),
            r#"{"success":true}"#
        );
        assert_eq!(
            encode_response(&Response::Status {
                is_google_form: true,
                is_form_filled: false,
                form_fields: 3,
            }),
            r#"{"isGoogleForm":true,"isFormFilled":false,"formFields":3}"#
        );
        assert_eq!(
            encode_response(&Response::error("boom")),
            r#"{"error":"boom"}"#
        );
    }
}
