// crates/logging/src/formatter.rs
use crate::util::parse_escapes;
use std::collections::HashMap;
use std::fmt;
use time::{OffsetDateTime, macros::format_description};
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields, format::Writer};
use tracing_subscriber::registry::LookupSpan;

/// Plain-text event layout.
///
/// Without a template each message is word-wrapped to `$COLUMNS` (default
/// 80). With a template, `%` escapes are replaced per event:
///
/// | escape | value |
/// |---|---|
/// | `%t` | local time |
/// | `%p` | our pid |
/// | `%l` | level |
/// | `%T` | target |
/// | `%m` | message |
/// | `%c` | `command` field |
/// | `%P` | `pid` field (the child) |
/// | `%s` | `status` field |
/// | `%%` | a literal `%` |
pub struct ExecFormatter {
    tokens: Option<Vec<Token>>,
}

impl ExecFormatter {
    pub fn new(template: Option<String>) -> Self {
        let tokens = template.map(|t| parse_tokens(&parse_escapes(&t)));
        Self { tokens }
    }

    fn columns() -> usize {
        std::env::var("COLUMNS")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|&c| c > 0)
            .unwrap_or(80)
    }

    fn wrap(msg: &str, width: usize) -> String {
        let mut out = String::new();
        let mut line_len = 0usize;
        for word in msg.split_whitespace() {
            let wlen = word.len();
            if line_len == 0 {
                out.push_str(word);
                line_len = wlen;
            } else if line_len + 1 + wlen > width {
                out.push('\n');
                out.push_str(word);
                line_len = wlen;
            } else {
                out.push(' ');
                out.push_str(word);
                line_len += 1 + wlen;
            }
        }
        out
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Lit(String),
    Percent,
    Time,
    Pid,
    Level,
    Target,
    Message,
    Command,
    ChildPid,
    Status,
}

fn parse_tokens(fmt: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut chars = fmt.chars();
    let mut lit = String::new();
    while let Some(c) = chars.next() {
        if c != '%' {
            lit.push(c);
            continue;
        }
        let token = match chars.next() {
            Some('%') => Token::Percent,
            Some('t') => Token::Time,
            Some('p') => Token::Pid,
            Some('l') => Token::Level,
            Some('T') => Token::Target,
            Some('m') => Token::Message,
            Some('c') => Token::Command,
            Some('P') => Token::ChildPid,
            Some('s') => Token::Status,
            Some(other) => {
                lit.push('%');
                lit.push(other);
                continue;
            }
            None => {
                lit.push('%');
                continue;
            }
        };
        if !lit.is_empty() {
            tokens.push(Token::Lit(std::mem::take(&mut lit)));
        }
        tokens.push(token);
    }
    if !lit.is_empty() {
        tokens.push(Token::Lit(lit));
    }
    tokens
}

struct MsgVisitor {
    msg: String,
    fields: HashMap<&'static str, String>,
}

impl MsgVisitor {
    fn new() -> Self {
        Self {
            msg: String::new(),
            fields: HashMap::new(),
        }
    }

    fn field(&self, name: &str) -> &str {
        self.fields.get(name).map(String::as_str).unwrap_or("")
    }
}

impl Visit for MsgVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            if !self.msg.is_empty() {
                self.msg.push(' ');
            }
            self.msg.push_str(value);
        } else {
            self.fields.insert(field.name(), value.to_string());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            if !self.msg.is_empty() {
                self.msg.push(' ');
            }
            self.msg.push_str(&format!("{value:?}"));
        } else {
            self.fields.insert(field.name(), format!("{value:?}"));
        }
    }
}

fn format_time() -> String {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    let fmt = format_description!("[year]/[month]/[day] [hour]:[minute]:[second]");
    now.format(&fmt)
        .unwrap_or_else(|_| String::from("0000/00/00 00:00:00"))
}

impl<S, N> FormatEvent<S, N> for ExecFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let mut visitor = MsgVisitor::new();
        event.record(&mut visitor);
        let meta = event.metadata();

        let Some(tokens) = &self.tokens else {
            let msg = if visitor.msg.is_empty() {
                meta.target()
            } else {
                &visitor.msg
            };
            let wrapped = Self::wrap(msg, Self::columns());
            for (i, line) in wrapped.lines().enumerate() {
                if i > 0 {
                    writer.write_char('\n')?;
                }
                writer.write_str(line)?;
            }
            return writer.write_char('\n');
        };

        let mut out = String::new();
        for tok in tokens {
            match tok {
                Token::Lit(s) => out.push_str(s),
                Token::Percent => out.push('%'),
                Token::Time => out.push_str(&format_time()),
                Token::Pid => out.push_str(&std::process::id().to_string()),
                Token::Level => out.push_str(meta.level().as_str()),
                Token::Target => out.push_str(meta.target()),
                Token::Message => out.push_str(&visitor.msg),
                Token::Command => out.push_str(visitor.field("command")),
                Token::ChildPid => out.push_str(visitor.field("pid")),
                Token::Status => out.push_str(visitor.field("status")),
            }
        }
        writer.write_str(&out)?;
        writer.write_char('\n')
    }
}
