//! Wire frames exchanged with pages and the approval UI.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestFrame {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub params: Vec<Value>,
}

impl RequestFrame {
    pub fn new(id: impl Into<String>, name: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseFrame {
    pub id: String,
    pub payload: Payload,
}

impl ResponseFrame {
    pub fn ok(id: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            id: id.into(),
            payload: Payload {
                success: true,
                data,
                error: None,
            },
        }
    }

    pub fn err(id: impl Into<String>, error: &Error) -> Self {
        Self {
            id: id.into(),
            payload: Payload {
                success: false,
                data: None,
                error: Some(error.to_string()),
            },
        }
    }
}

/// Closed set of operation names. Matching is exact and case-sensitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    GetNetwork,
    IsEnabled,
    Enable,
    EnableResponse,
    Disable,
    GetAddresses,
    GetNextAddress,
    GetNextChangeAddress,
    SignTransaction,
    SignTransactionResponse,
    SendTransaction,
    SendTransactionResponse,
}

impl Operation {
    pub const ALL: [Operation; 12] = [
        Operation::GetNetwork,
        Operation::IsEnabled,
        Operation::Enable,
        Operation::EnableResponse,
        Operation::Disable,
        Operation::GetAddresses,
        Operation::GetNextAddress,
        Operation::GetNextChangeAddress,
        Operation::SignTransaction,
        Operation::SignTransactionResponse,
        Operation::SendTransaction,
        Operation::SendTransactionResponse,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Operation::GetNetwork => "getNetwork",
            Operation::IsEnabled => "isEnabled",
            Operation::Enable => "enable",
            Operation::EnableResponse => "ENABLE_RESPONSE",
            Operation::Disable => "disable",
            Operation::GetAddresses => "getAddresses",
            Operation::GetNextAddress => "getNextAddress",
            Operation::GetNextChangeAddress => "getNextChangeAddress",
            Operation::SignTransaction => "signTransaction",
            Operation::SignTransactionResponse => "SIGN_TRANSACTION_RESPONSE",
            Operation::SendTransaction => "sendTransaction",
            Operation::SendTransactionResponse => "SEND_TRANSACTION_RESPONSE",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.name() == name)
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// First frame of a connection. Pages announce their origin; the approval UI
/// omits it and presents the token it was opened with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    #[serde(default)]
    pub origin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}
