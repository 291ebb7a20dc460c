// crates/logging/src/lib.rs
//! Subscriber construction for procrun.
//!
//! Call sites log through plain `tracing` macros using the targets named by
//! [`InfoFlag::target`] and [`DebugFlag::target`]; this crate only decides
//! where those events end up.

mod flags;
mod formatter;
mod json_format;
mod sink;
mod subscriber;
mod util;

pub use flags::{
    DebugFlag, InfoFlag, LogFormat, StderrMode, SubscriberConfig, SubscriberConfigBuilder,
};
pub use formatter::ExecFormatter;
pub use json_format::JsonFormatter;
pub use subscriber::{IDENTIFIER, init, subscriber};
pub use util::{escape_bytes, human_bytes, parse_escapes};
