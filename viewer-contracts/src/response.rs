use serde::Serialize;

/// The envelope every mutation endpoint responds with.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    /// Whether the operation succeeded.
    pub success: bool,
    /// Payload, flattened into the envelope alongside `success`.
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    /// Present only when `success` is false.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    /// Build a success envelope wrapping `data`.
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

impl ApiResponse<()> {
    /// Build a success envelope with no payload beyond `{success: true}`.
    #[must_use]
    pub fn ok() -> Self {
        Self {
            success: true,
            data: None,
            error: None,
        }
    }

    /// Build a failure envelope carrying `message`.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_envelope_flattens_payload() {
        #[derive(Serialize)]
        struct Body {
            count: u32,
        }
        let json = serde_json::to_value(ApiResponse::success(Body { count: 3 })).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["count"], 3);
    }

    #[test]
    fn failure_envelope_omits_data() {
        let json = serde_json::to_value(ApiResponse::<()>::failure("bad path")).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "bad path");
        assert!(json.get("data").is_none());
    }
}
