use serde_json::{json, Value};
use shark_core::error::SharkError;

/// The result every command hands back to the dispatcher: a one-line human
/// summary and the structured payload the `--json` surface emits. Both views
/// derive from the same data.
#[derive(Debug)]
pub struct CommandOutput {
    pub summary: String,
    pub data: Value,
    pub warnings: Vec<String>,
}

impl CommandOutput {
    pub fn new(summary: impl Into<String>, data: Value) -> Self {
        Self {
            summary: summary.into(),
            data,
            warnings: Vec::new(),
        }
    }

    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings.extend(warnings);
        self
    }
}

/// Print a successful result. JSON goes to stdout as a stable envelope;
/// the human view is a single summary line with warnings on stderr.
pub fn emit(json_mode: bool, output: &CommandOutput) {
    if json_mode {
        let envelope = json!({
            "success": true,
            "data": output.data,
            "warnings": output.warnings,
        });
        println!("{}", serde_json::to_string_pretty(&envelope).expect("serializable envelope"));
    } else {
        for warning in &output.warnings {
            eprintln!("warning: {warning}");
        }
        println!("{}", output.summary);
    }
}

/// Print a failure in the matching shape; the caller maps the error to the
/// process exit code.
pub fn emit_error(json_mode: bool, error: &SharkError) {
    if json_mode {
        let envelope = json!({
            "success": false,
            "error": {
                "kind": error.kind(),
                "message": error.to_string(),
            },
        });
        println!("{}", serde_json::to_string_pretty(&envelope).expect("serializable envelope"));
    } else {
        eprintln!("error: {error}");
    }
}
