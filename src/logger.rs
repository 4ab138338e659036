use std::fs::{File, OpenOptions};
use std::io::Write;

use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use crate::diff::diff_json;

/// How user-context poll bodies are written to the message log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageLogMode {
    Full,
    Diffed,
}

pub(crate) struct MessageLogger {
    mode: MessageLogMode,
    file: File,
    previous_state: Option<Value>,
}

impl MessageLogger {
    pub fn new(mode: MessageLogMode, path: &str) -> std::io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Self {
            mode,
            file,
            previous_state: None,
        })
    }

    pub fn log_request(&mut self, method: &str, path: &str, body: Option<&Value>) {
        let entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "dir": "req",
            "method": method,
            "path": path,
            "body": body,
        });
        self.write_line(&entry);
    }

    pub fn log_command(&mut self, action: &str, unit_id: &str, body: &Value) {
        let entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "dir": "cmd",
            "action": action,
            "unit": unit_id,
            "body": body,
        });
        self.write_line(&entry);
    }

    pub fn log_response(&mut self, action: &str, status: u16, body: &str) {
        let entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "dir": "resp",
            "action": action,
            "status": status,
            "body": body,
        });
        self.write_line(&entry);
    }

    /// Non-200 polls carry no document; only the status is recorded.
    pub fn log_poll(&mut self, status: u16, body: &Value) {
        if status != 200 {
            let entry = json!({
                "ts": Utc::now().to_rfc3339(),
                "dir": "poll",
                "status": status,
            });
            self.write_line(&entry);
            return;
        }

        match self.mode {
            MessageLogMode::Full => {
                let entry = json!({
                    "ts": Utc::now().to_rfc3339(),
                    "dir": "poll",
                    "status": status,
                    "body": body,
                });
                self.write_line(&entry);
            }
            MessageLogMode::Diffed => {
                if self.previous_state.is_none() {
                    let entry = json!({
                        "ts": Utc::now().to_rfc3339(),
                        "dir": "poll",
                        "status": status,
                        "full": true,
                        "body": body,
                    });
                    self.write_line(&entry);
                    self.previous_state = Some(body.clone());
                } else {
                    let mut changes = Vec::new();
                    if let Some(prev) = self.previous_state.as_ref() {
                        diff_json(prev, body, "", &mut changes);
                    }

                    let change_entries: Vec<Value> = changes
                        .iter()
                        .map(|(path, old, new)| {
                            json!({ "path": path, "old": old, "new": new })
                        })
                        .collect();

                    let entry = json!({
                        "ts": Utc::now().to_rfc3339(),
                        "dir": "poll",
                        "status": status,
                        "changes": change_entries,
                    });
                    self.write_line(&entry);
                    self.previous_state = Some(body.clone());
                }
            }
        }
    }

    fn write_line(&mut self, entry: &Value) {
        if let Ok(line) = serde_json::to_string(entry)
            && let Err(e) = writeln!(self.file, "{line}")
        {
            warn!("failed to write log entry: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn logger(mode: MessageLogMode) -> (NamedTempFile, MessageLogger) {
        let tmp = NamedTempFile::new().unwrap();
        let logger = MessageLogger::new(mode, tmp.path().to_str().unwrap()).unwrap();
        (tmp, logger)
    }

    fn read_lines(tmp: &NamedTempFile) -> Vec<Value> {
        std::fs::read_to_string(tmp.path())
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn request_and_command_entries() {
        let (tmp, mut log) = logger(MessageLogMode::Full);
        log.log_request("GET", "/api/user/context", None);
        log.log_command("set_forced_hot_water", "U1", &json!({"forcedHotWaterMode": true}));
        log.log_response("apply_unit_state", 500, "boom");

        let lines = read_lines(&tmp);
        assert_eq!(lines.len(), 3);
        assert!(lines.iter().all(|l| l["ts"].is_string()));
        assert_eq!(
            (&lines[0]["dir"], &lines[0]["method"], &lines[0]["path"]),
            (&json!("req"), &json!("GET"), &json!("/api/user/context"))
        );
        assert_eq!(lines[1]["unit"], "U1");
        assert_eq!(lines[1]["body"]["forcedHotWaterMode"], true);
        assert_eq!((&lines[2]["status"], &lines[2]["body"]), (&json!(500), &json!("boom")));
    }

    #[test]
    fn failed_poll_records_status_only() {
        let (tmp, mut log) = logger(MessageLogMode::Full);
        log.log_poll(401, &Value::Null);

        let lines = read_lines(&tmp);
        assert_eq!(lines[0]["status"], 401);
        assert!(lines[0].get("body").is_none());
    }

    #[test]
    fn diffed_polls_log_full_then_changes() {
        let (tmp, mut log) = logger(MessageLogMode::Diffed);
        let home = json!({"buildings": [{"id": "B1", "name": "Home"}]});
        log.log_poll(200, &home);
        log.log_poll(200, &home);
        log.log_poll(200, &json!({"buildings": [{"id": "B1", "name": "Cabin"}]}));

        let lines = read_lines(&tmp);
        assert_eq!(lines[0]["full"], true);
        assert_eq!(lines[1]["changes"], json!([]));
        assert_eq!(
            lines[2]["changes"],
            json!([{"path": "buildings.0.name", "old": "Home", "new": "Cabin"}])
        );
    }
}
