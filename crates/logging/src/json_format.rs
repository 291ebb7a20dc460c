// crates/logging/src/json_format.rs

use serde_json::{Map, Value};
use time::OffsetDateTime;
use time::macros::format_description;
use tracing::{Event, Subscriber};
use tracing_serde::{AsSerde, fields::AsMap};
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields, format::Writer};
use tracing_subscriber::registry::LookupSpan;

/// One JSON object per line.
///
/// Keys: `timestamp` (when enabled), `level`, `target`, `process` (our own
/// pid), `message`, and `fields` holding every other recorded field, such as
/// the child's `command`, `pid` and `status`.
#[derive(Default)]
pub struct JsonFormatter {
    timestamps: bool,
}

impl JsonFormatter {
    pub fn new(timestamps: bool) -> Self {
        Self { timestamps }
    }
}

fn utc_now() -> Result<String, std::fmt::Error> {
    OffsetDateTime::now_utc()
        .format(&format_description!(
            "[year]-[month]-[day]T[hour]:[minute]:[second]Z"
        ))
        .map_err(|_| std::fmt::Error)
}

impl<S, N> FormatEvent<S, N> for JsonFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'writer> FormatFields<'writer> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        let meta = event.metadata();
        let mut fields = match serde_json::to_value(event.field_map()) {
            Ok(Value::Object(map)) => map,
            Ok(_) => Map::new(),
            Err(_) => return Err(std::fmt::Error),
        };
        let message = fields.remove("message").unwrap_or(Value::Null);

        let mut obj = Map::new();
        if self.timestamps {
            obj.insert("timestamp".into(), Value::String(utc_now()?));
        }
        let level = serde_json::to_value(meta.level().as_serde()).map_err(|_| std::fmt::Error)?;
        obj.insert("level".into(), level);
        obj.insert("target".into(), Value::from(meta.target()));
        obj.insert("process".into(), Value::from(std::process::id()));
        obj.insert("message".into(), message);
        obj.insert("fields".into(), Value::Object(fields));

        let line = serde_json::to_string(&obj).map_err(|_| std::fmt::Error)?;
        writer.write_str(&line)?;
        writer.write_char('\n')
    }
}
