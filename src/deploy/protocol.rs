//! Wire types for the host ↔ extension RPC channel.
//!
//! The transport is JSON lines over the extension process's stdio. Every
//! message is a single-line JSON object tagged by `kind`. Per resource, the
//! extension streams zero or more non-terminal updates and exactly one
//! terminal update.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Lifecycle of one resource operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProvisioningState {
    Accepted,
    Running,
    Succeeded,
    Failed,
    Canceled,
}

impl ProvisioningState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }
}

impl fmt::Display for ProvisioningState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accepted => write!(f, "accepted"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Canceled => write!(f, "canceled"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
    NoOp,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
            Self::NoOp => write!(f, "noOp"),
        }
    }
}

/// One entry of the deployment's ordered operation log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisioningOperation {
    /// Symbolic name of the resource the operation applies to.
    pub resource: String,
    pub kind: OperationKind,
    pub state: ProvisioningState,
    /// Final resource properties reported by the extension, when terminal
    /// and successful.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Host → extension messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HostRequest {
    Initialize {
        /// Protocol version the host speaks.
        version: u32,
    },
    Submit {
        resource: String,
        #[serde(rename = "type")]
        resource_type: String,
        #[serde(rename = "apiVersion")]
        api_version: String,
        operation: OperationKind,
        properties: Value,
    },
    Cancel {
        resource: String,
    },
    Shutdown,
}

/// Extension → host messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExtensionResponse {
    Initialized {
        version: u32,
    },
    Update {
        resource: String,
        state: ProvisioningState,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        properties: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

/// A state transition for one in-flight operation, as routed to its
/// subscriber.
#[derive(Debug, Clone)]
pub struct OperationUpdate {
    pub state: ProvisioningState,
    pub properties: Option<Value>,
    pub error: Option<String>,
}

pub const PROTOCOL_VERSION: u32 = 1;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_terminal_states() {
        assert!(ProvisioningState::Succeeded.is_terminal());
        assert!(ProvisioningState::Failed.is_terminal());
        assert!(ProvisioningState::Canceled.is_terminal());
        assert!(!ProvisioningState::Accepted.is_terminal());
        assert!(!ProvisioningState::Running.is_terminal());
    }

    #[test]
    fn test_protocol_submit_wire_shape() {
        let request = HostRequest::Submit {
            resource: "dns".to_string(),
            resource_type: "Microsoft.Network/dnsZones".to_string(),
            api_version: "2018-05-01".to_string(),
            operation: OperationKind::Create,
            properties: serde_json::json!({ "name": "name" }),
        };
        let wire = serde_json::to_value(&request).unwrap();
        assert_eq!(wire["kind"], "submit");
        assert_eq!(wire["type"], "Microsoft.Network/dnsZones");
        assert_eq!(wire["apiVersion"], "2018-05-01");
        assert_eq!(wire["operation"], "create");
    }

    #[test]
    fn test_protocol_update_parses_minimal_line() {
        let line = r#"{"kind":"update","resource":"dns","state":"succeeded"}"#;
        let response: ExtensionResponse = serde_json::from_str(line).unwrap();
        match response {
            ExtensionResponse::Update {
                resource,
                state,
                properties,
                error,
            } => {
                assert_eq!(resource, "dns");
                assert_eq!(state, ProvisioningState::Succeeded);
                assert!(properties.is_none());
                assert!(error.is_none());
            }
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[test]
    fn test_protocol_failed_update_carries_error() {
        let line = r#"{"kind":"update","resource":"dns","state":"failed","error":"quota exceeded"}"#;
        let response: ExtensionResponse = serde_json::from_str(line).unwrap();
        assert!(matches!(
            response,
            ExtensionResponse::Update { state: ProvisioningState::Failed, error: Some(_), .. }
        ));
    }
}
