// JSON output for machine consumers

use serde::Serialize;
use serde_json::json;

use super::response::ResultJson;

/// Prints boundary payloads as JSON on stdout
pub struct JsonOutput {
    pretty: bool,
}

impl JsonOutput {
    pub fn new(pretty: bool) -> Self {
        JsonOutput { pretty }
    }

    pub fn emit<T: Serialize>(&self, result: &ResultJson<T>) {
        println!("{}", self.to_json(result));
    }

    pub fn to_json<T: Serialize>(&self, result: &ResultJson<T>) -> String {
        let rendered = if self.pretty {
            serde_json::to_string_pretty(result)
        } else {
            serde_json::to_string(result)
        };

        rendered.unwrap_or_else(|e| {
            json!({
                "status": "failure",
                "kind": "internal",
                "messages": [format!("failed to serialize result: {}", e)],
            })
            .to_string()
        })
    }
}
