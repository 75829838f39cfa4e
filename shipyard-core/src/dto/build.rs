//! Build dispatch/completion packets (Structured payloads on the build channel)

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Sent once per worker, listing every target routed to it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchPacket {
    pub project_id: Uuid,
    pub targets: Vec<String>,
    pub git_url: String,
    pub branch: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Status reported by a worker for one target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompletionStatus {
    /// Informational only
    Building,
    Complete,
    Error,
}

/// Asynchronous status report for one target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionPacket {
    pub status: CompletionStatus,
    pub target_name: String,
    /// Build duration in milliseconds
    #[serde(default)]
    pub time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Echo of the dispatch packet's project id, used for correlation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_directory: Option<String>,
}

impl CompletionPacket {
    pub fn building(project_id: Uuid, target: impl Into<String>) -> Self {
        Self {
            status: CompletionStatus::Building,
            target_name: target.into(),
            time: 0,
            message: None,
            project_id: Some(project_id),
            output_directory: None,
        }
    }

    pub fn complete(
        project_id: Uuid,
        target: impl Into<String>,
        time: i64,
        output_directory: impl Into<String>,
    ) -> Self {
        Self {
            status: CompletionStatus::Complete,
            target_name: target.into(),
            time,
            message: None,
            project_id: Some(project_id),
            output_directory: Some(output_directory.into()),
        }
    }

    pub fn error(project_id: Uuid, target: impl Into<String>, time: i64, message: String) -> Self {
        Self {
            status: CompletionStatus::Error,
            target_name: target.into(),
            time,
            message: Some(message),
            project_id: Some(project_id),
            output_directory: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_packet_wire_names() {
        let packet = DispatchPacket {
            project_id: Uuid::nil(),
            targets: vec!["LinuxBuild".into()],
            git_url: "git@example.com:game.git".into(),
            branch: "main".into(),
            version: None,
        };

        let json = serde_json::to_value(&packet).unwrap();
        assert_eq!(json["projectId"], Uuid::nil().to_string());
        assert_eq!(json["gitUrl"], "git@example.com:game.git");
        assert!(json.get("version").is_none());
    }

    #[test]
    fn test_completion_packet_accepts_minimal_payload() {
        let packet: CompletionPacket = serde_json::from_str(
            r#"{ "status": "Complete", "targetName": "WindowsBuild", "time": 1200 }"#,
        )
        .unwrap();

        assert_eq!(packet.status, CompletionStatus::Complete);
        assert_eq!(packet.target_name, "WindowsBuild");
        assert_eq!(packet.time, 1200);
        assert!(packet.project_id.is_none());
    }

    #[test]
    fn test_unknown_status_is_rejected() {
        let result = serde_json::from_str::<CompletionPacket>(
            r#"{ "status": "Exploded", "targetName": "WindowsBuild" }"#,
        );
        assert!(result.is_err());
    }
}
