//! Protocol messages.
//!
//! Every exchange carries exactly one [`Message`] in each direction. On the
//! wire a message is `{"code": "...", "payload": ...}`; codes without a
//! payload omit the field.

use serde::{Deserialize, Serialize};

use encmesh_models::{Cause, ClientTask, Node, StatusReport, TaskKey};

/// Crash notification payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrashReport {
    pub unid: String,
    pub cause: Cause,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "code", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    /// Worker registration or disconnect notice (status NOT_CONNECTED)
    Connect(Node),
    /// Acknowledgement / close
    Bye,
    /// Identifier assignment, or directive to re-register
    NewUnid(String),
    Status(StatusReport),
    Crash(CrashReport),
    TaskRequest(ClientTask),
    TaskAccepted,
    TaskRefused,
    DeleteTask(TaskKey),
    TaskDeleted { removed: bool },
    StatusRequest,
    Shutdown,
}

impl Message {
    /// Protocol code of the message.
    pub fn code(&self) -> &'static str {
        match self {
            Message::Connect(_) => "CONNECT",
            Message::Bye => "BYE",
            Message::NewUnid(_) => "NEW_UNID",
            Message::Status(_) => "STATUS",
            Message::Crash(_) => "CRASH",
            Message::TaskRequest(_) => "TASK_REQUEST",
            Message::TaskAccepted => "TASK_ACCEPTED",
            Message::TaskRefused => "TASK_REFUSED",
            Message::DeleteTask(_) => "DELETE_TASK",
            Message::TaskDeleted { .. } => "TASK_DELETED",
            Message::StatusRequest => "STATUS_REQUEST",
            Message::Shutdown => "SHUTDOWN",
        }
    }
}
