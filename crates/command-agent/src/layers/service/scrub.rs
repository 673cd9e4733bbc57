use agent_protocol::SendCommandPayload;
use serde_json::Value;

pub const REDACTED: &str = "[redacted]";

/// Copy of the payload that is safe to log: the cloud-watch configuration
/// and its echo in the `properties` parameter are replaced.
pub fn scrubbed(payload: &SendCommandPayload) -> SendCommandPayload {
    let mut view = payload.clone();
    if let Some(cloud_watch) = view.document_content.runtime_config.cloud_watch.as_mut() {
        cloud_watch.properties = Value::String(REDACTED.to_string());
        if let Some(properties) = view.parameters.get_mut("properties") {
            *properties = Value::String(REDACTED.to_string());
        }
    }
    view
}

/// Debug log of the scrubbed payload.
pub fn log_payload(message_id: &str, payload: &SendCommandPayload) {
    if !tracing::enabled!(tracing::Level::DEBUG) {
        return;
    }
    let view = scrubbed(payload);
    match serde_json::to_string(&view) {
        Ok(json) => tracing::debug!(
            event = "message.payload",
            id = %message_id,
            has_cloud_watch = payload.document_content.runtime_config.cloud_watch.is_some(),
            payload = %json,
        ),
        Err(err) => tracing::debug!(event = "message.payload", id = %message_id, error = %err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(raw: &str) -> SendCommandPayload {
        serde_json::from_str(raw).expect("payload")
    }

    #[test]
    fn cloud_watch_credentials_never_reach_the_view() {
        let raw = payload(
            r#"{
                "CommandId": "c1",
                "Parameters": {"properties": "{\"AccessKey\":\"AKIA-SECRET\"}"},
                "DocumentContent": {
                    "schemaVersion": "1.2",
                    "runtimeConfig": {
                        "aws:cloudWatch": {"properties": "{\"AccessKey\":\"AKIA-SECRET\"}"}
                    }
                }
            }"#,
        );
        let view = scrubbed(&raw);
        let json = serde_json::to_string(&view).unwrap();
        assert!(!json.contains("AKIA-SECRET"));
        assert!(json.contains(REDACTED));
        // The payload used for execution is untouched.
        assert!(serde_json::to_string(&raw).unwrap().contains("AKIA-SECRET"));
    }

    #[test]
    fn payload_without_cloud_watch_is_unchanged() {
        let raw = payload(
            r#"{
                "Parameters": {"properties": "keep"},
                "DocumentContent": {"schemaVersion": "2.2", "mainSteps": []}
            }"#,
        );
        assert_eq!(scrubbed(&raw), raw);
    }
}
