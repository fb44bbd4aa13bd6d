//! Coordinator/worker messages

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::config::TestConfig;
use crate::report::FileResult;
use crate::reporter::RunnerEvent;

/// Coordinator to worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Configure the worker. Replaces any live context.
    Init { config: Box<TestConfig> },
    /// Run one file. With `fresh`, the previous context is torn down first.
    RunFile { path: PathBuf, fresh: bool },
    /// Change base environment variables; `None` removes one.
    ApplyEnv {
        changes: BTreeMap<String, Option<String>>,
    },
    /// Tear down the live context.
    Teardown,
    Shutdown,
}

/// Worker to coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Event { event: RunnerEvent },
    FileDone { result: FileResult },
    Ack,
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::CaseInfo;

    #[test]
    fn test_wire_shape() {
        let request = Request::RunFile {
            path: PathBuf::from("/a.test.js"),
            fresh: true,
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            serde_json::json!({"type": "run_file", "path": "/a.test.js", "fresh": true})
        );

        let response = Response::Event {
            event: RunnerEvent::CaseStart(CaseInfo {
                file: PathBuf::from("/a.test.js"),
                id: 3,
                full_name: "math > adds".to_string(),
            }),
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"event\":\"case_start\""));
        assert_eq!(serde_json::from_str::<Response>(&json).unwrap(), response);
    }
}
