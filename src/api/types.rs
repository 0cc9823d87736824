//! Wire types for the control-plane REST surface.

use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckinInput {
    #[serde(rename = "agentID")]
    pub agent_id: String,
    pub agent_version: String,
    pub pool_labels: Vec<String>,
}

/// A work assignment. All three fields must be present for the run loop to
/// launch a worker; a 204 check-in produces the default (empty) value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckinOutput {
    #[serde(rename = "workerImageURI")]
    pub worker_image_uri: Option<String>,
    pub worker_environment_variables: Option<Vec<(String, String)>>,
    pub auth_token: Option<String>,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool_labels: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_status: Option<TaskStatus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Submitted,
    Starting,
    Running,
    Error,
    Succeeded,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTaskInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

/// Flatten `[key, value]` pairs into `KEY=value` strings for the container
/// environment.
pub fn stringify_environment_variables(pairs: &[(String, String)]) -> Vec<String> {
    pairs
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stringify_environment_variables() {
        let pairs = vec![
            ("RERUN_WORKER_FOO".to_string(), "bar".to_string()),
            ("RERUN_WORKER_BAR".to_string(), "foo".to_string()),
        ];

        let vars = stringify_environment_variables(&pairs);
        assert_eq!(vars.len(), 2);
        assert!(vars.contains(&"RERUN_WORKER_FOO=bar".to_string()));
        assert!(vars.contains(&"RERUN_WORKER_BAR=foo".to_string()));
    }

    #[test]
    fn test_checkin_output_field_names() {
        let out: CheckinOutput = serde_json::from_value(serde_json::json!({
            "workerImageURI": "img:A",
            "workerEnvironmentVariables": [["X", "1"], ["Y", "2"]],
            "authToken": "t",
        }))
        .unwrap();

        assert_eq!(out.worker_image_uri.as_deref(), Some("img:A"));
        assert_eq!(
            out.worker_environment_variables,
            Some(vec![
                ("X".to_string(), "1".to_string()),
                ("Y".to_string(), "2".to_string())
            ])
        );
        assert_eq!(out.auth_token.as_deref(), Some("t"));
    }

    #[test]
    fn test_checkin_output_empty_body() {
        let out: CheckinOutput = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(out.worker_image_uri.is_none());
        assert!(out.worker_environment_variables.is_none());
        assert!(out.auth_token.is_none());
    }

    #[test]
    fn test_checkin_input_field_names() {
        let input = CheckinInput {
            agent_id: "fred".to_string(),
            agent_version: "0.3.2".to_string(),
            pool_labels: vec!["small".to_string()],
        };

        let json = serde_json::to_value(&input).unwrap();
        assert_eq!(json["agentID"], "fred");
        assert_eq!(json["agentVersion"], "0.3.2");
        assert_eq!(json["poolLabels"][0], "small");
    }

    #[test]
    fn test_task_status_wire_values() {
        assert_eq!(
            serde_json::to_value(TaskStatus::Succeeded).unwrap(),
            "SUCCEEDED"
        );
        assert_eq!(serde_json::to_value(TaskStatus::Running).unwrap(), "RUNNING");
    }

    #[test]
    fn test_heartbeat_input_skips_unset_fields() {
        let input = HeartbeatInput {
            agent_name: Some("fred".to_string()),
            pool_labels: Some(vec!["small".to_string()]),
            ..Default::default()
        };

        let json = serde_json::to_value(&input).unwrap();
        assert_eq!(json["agentName"], "fred");
        assert!(json.get("taskName").is_none());
        assert!(json.get("taskStatus").is_none());
    }
}
