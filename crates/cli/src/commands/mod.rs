pub mod chains;
pub mod config;
pub mod executions;
pub mod migrate;
pub mod preview;
pub mod seed;
pub mod select;
pub mod serve;
pub mod stats;
pub mod sweep;

mod runtime;

use quorum_core::errors::{ApplicationError, InterfaceError};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
            data: None,
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    /// Success with a structured `data` field next to the message.
    pub fn success_with_data(
        command: &str,
        message: impl Into<String>,
        data: &impl Serialize,
    ) -> Self {
        match serde_json::to_value(data) {
            Ok(data) => {
                let payload = CommandOutcome {
                    command: command.to_string(),
                    status: "ok".to_string(),
                    error_class: None,
                    message: message.into(),
                    data: Some(data),
                };
                Self { exit_code: 0, output: serialize_payload(payload) }
            }
            Err(error) => Self::failure(command, "serialization", error.to_string(), 9),
        }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
            data: None,
        };
        Self { exit_code, output: serialize_payload(payload) }
    }
}

/// Failure raised while a command runs, carrying its error class and exit code.
#[derive(Debug, Clone)]
pub(crate) struct CommandError {
    pub error_class: &'static str,
    pub message: String,
    pub exit_code: u8,
}

impl CommandError {
    pub fn new(error_class: &'static str, message: impl Into<String>, exit_code: u8) -> Self {
        Self { error_class, message: message.into(), exit_code }
    }

    pub fn input(error: anyhow::Error) -> Self {
        Self::new("invalid_input", format!("{error:#}"), 7)
    }

    pub fn into_result(self, command: &str) -> CommandResult {
        CommandResult::failure(command, self.error_class, self.message, self.exit_code)
    }
}

impl From<ApplicationError> for CommandError {
    fn from(value: ApplicationError) -> Self {
        match InterfaceError::from(value) {
            InterfaceError::BadRequest { message, .. } => Self::new("rejected", message, 7),
            InterfaceError::NotFound { message, .. } => Self::new("not_found", message, 8),
            InterfaceError::ServiceUnavailable { message, .. } => {
                Self::new("persistence", message, 4)
            }
            InterfaceError::Internal { message, .. } => Self::new("internal", message, 9),
        }
    }
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\
             \"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}

#[cfg(test)]
mod tests {
    use quorum_core::domain::chain::ChainId;
    use quorum_core::errors::{ApplicationError, EngineError};
    use serde_json::Value;

    use super::{CommandError, CommandResult};

    #[test]
    fn success_with_data_embeds_structured_payload() {
        let result = CommandResult::success_with_data(
            "stats",
            "usage for chain-a",
            &serde_json::json!({ "usage_count": 3 }),
        );
        let payload: Value = serde_json::from_str(&result.output).expect("json");

        assert_eq!(result.exit_code, 0);
        assert_eq!(payload["status"], "ok");
        assert_eq!(payload["data"]["usage_count"], 3);
        assert_eq!(payload["error_class"], Value::Null);
    }

    #[test]
    fn plain_success_omits_data_field() {
        let result = CommandResult::success("migrate", "applied pending migrations");
        let payload: Value = serde_json::from_str(&result.output).expect("json");

        assert!(payload.get("data").is_none());
    }

    #[test]
    fn application_errors_map_to_stable_classes_and_exit_codes() {
        let missing: CommandError = ApplicationError::from(EngineError::ChainNotFound {
            chain_id: ChainId("chain-x".to_string()),
        })
        .into();
        assert_eq!((missing.error_class, missing.exit_code), ("not_found", 8));

        let inactive: CommandError = ApplicationError::from(EngineError::ChainInactive {
            chain_id: ChainId("chain-x".to_string()),
        })
        .into();
        assert_eq!((inactive.error_class, inactive.exit_code), ("rejected", 7));

        let store: CommandError = ApplicationError::Persistence("disk full".to_string()).into();
        assert_eq!((store.error_class, store.exit_code), ("persistence", 4));
        assert_eq!(store.message, "disk full");
    }
}
