use std::time::Instant;

use serde_json::{json, Map, Value};
use tracing::{debug, error, info, warn};

use crate::{collections::CollectionKind, AppError};

fn wrap_details(value: Value) -> Value {
    if value.is_object() {
        value
    } else {
        json!({ "value": value })
    }
}

fn is_expected_failure(code: &str) -> bool {
    code.starts_with("FAMILY/") || code.starts_with("IDENTITY/")
}

/// Timing and outcome logging for one sync operation.
pub struct SyncLogScope {
    cmd: &'static str,
    family_code: Option<String>,
    collection: Option<CollectionKind>,
    start: Instant,
}

impl SyncLogScope {
    pub fn new(
        cmd: &'static str,
        family_code: Option<String>,
        collection: Option<CollectionKind>,
    ) -> Self {
        let scope = Self {
            cmd,
            family_code,
            collection,
            start: Instant::now(),
        };
        debug!(
            target: "famhealth",
            area = "sync",
            cmd = scope.cmd,
            family_code = scope.family_code.as_deref(),
            collection = scope.collection_name(),
            details = %json!({ "stage": "enter" })
        );
        scope
    }

    fn collection_name(&self) -> Option<&'static str> {
        self.collection.map(CollectionKind::remote_name)
    }

    fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    pub fn success(&self, details: Value) {
        info!(
            target: "famhealth",
            area = "sync",
            cmd = self.cmd,
            family_code = self.family_code.as_deref(),
            collection = self.collection_name(),
            duration_ms = self.elapsed_ms(),
            details = %wrap_details(details)
        );
    }

    pub fn warn(&self, details: Value) {
        warn!(
            target: "famhealth",
            area = "sync",
            cmd = self.cmd,
            family_code = self.family_code.as_deref(),
            collection = self.collection_name(),
            duration_ms = self.elapsed_ms(),
            details = %wrap_details(details)
        );
    }

    /// Validation-style failures (unknown family, cancelled sign-in) log at
    /// `warn`; everything else at `error`.
    pub fn fail(&self, err: &AppError) {
        let mut map = Map::new();
        map.insert("code".into(), Value::String(err.code().to_string()));
        map.insert("message".into(), Value::String(err.message().to_string()));
        if !err.context().is_empty() {
            let context: Map<String, Value> = err
                .context()
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect();
            map.insert("context".into(), Value::Object(context));
        }

        let details = Value::Object(map);
        if is_expected_failure(err.code()) {
            self.warn(details);
            return;
        }

        error!(
            target: "famhealth",
            area = "sync",
            cmd = self.cmd,
            family_code = self.family_code.as_deref(),
            collection = self.collection_name(),
            duration_ms = self.elapsed_ms(),
            details = %details
        );
    }
}
