//! Purpose: Structured schema for non-fatal stderr notices.
//! Exports: `Notice`, `notice_json`.
//! Role: CLI diagnostics for no-op outcomes such as creating a table that already exists.
//! Invariants: Notices are non-fatal and never alter stdout payloads.
use serde_json::{Map, Value, json};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: String,
    pub time: String,
    pub cmd: String,
    pub table: String,
    pub message: String,
    pub details: Map<String, Value>,
}

impl Notice {
    /// Builds a notice stamped with the current UTC time.
    pub fn now(
        kind: impl Into<String>,
        cmd: impl Into<String>,
        table: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let time = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_default();
        Self {
            kind: kind.into(),
            time,
            cmd: cmd.into(),
            table: table.into(),
            message: message.into(),
            details: Map::new(),
        }
    }

    pub fn with_detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }
}

pub fn notice_json(notice: &Notice) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(notice.kind));
    inner.insert("time".to_string(), json!(notice.time));
    inner.insert("cmd".to_string(), json!(notice.cmd));
    inner.insert("table".to_string(), json!(notice.table));
    inner.insert("message".to_string(), json!(notice.message));
    inner.insert("details".to_string(), Value::Object(notice.details.clone()));

    let mut outer = Map::new();
    outer.insert("notice".to_string(), Value::Object(inner));
    Value::Object(outer)
}

#[cfg(test)]
mod tests {
    use super::{Notice, notice_json};

    #[test]
    fn notice_json_has_required_fields() {
        let notice = Notice::now(
            "table_exists",
            "table create",
            "t1",
            "table already exists; nothing created",
        )
        .with_detail("families", 2);

        let value = notice_json(&notice);
        let obj = value
            .get("notice")
            .and_then(|v| v.as_object())
            .expect("notice object");

        assert_eq!(obj.get("kind").and_then(|v| v.as_str()), Some("table_exists"));
        assert_eq!(obj.get("cmd").and_then(|v| v.as_str()), Some("table create"));
        assert_eq!(obj.get("table").and_then(|v| v.as_str()), Some("t1"));
        assert!(obj.get("time").and_then(|v| v.as_str()).is_some_and(|t| t.ends_with('Z')));
        assert_eq!(
            obj.get("details")
                .and_then(|v| v.get("families"))
                .and_then(|v| v.as_u64()),
            Some(2)
        );
    }
}
