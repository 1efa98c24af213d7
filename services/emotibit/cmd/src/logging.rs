//! Console log format: `[timestamp] [component] [level] message`.

use std::fmt;
use std::io::IsTerminal;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::{format::Writer, FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

const RESET: &str = "\x1b[0m";
const CYAN: &str = "\x1b[36m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[93m";
const RED: &str = "\x1b[91m";
const GRAY: &str = "\x1b[90m";

const COMPONENT_WIDTH: usize = 20;
const LEVEL_WIDTH: usize = 9;

/// Log with a `component` field
#[macro_export]
macro_rules! component_info {
    ($component:expr, $($arg:tt)*) => {
        tracing::info!(component = $component, $($arg)*)
    };
}

/// Warn with a `component` field
#[macro_export]
macro_rules! component_warn {
    ($component:expr, $($arg:tt)*) => {
        tracing::warn!(component = $component, $($arg)*)
    };
}

/// Debug with a `component` field
#[macro_export]
macro_rules! component_debug {
    ($component:expr, $($arg:tt)*) => {
        tracing::debug!(component = $component, $($arg)*)
    };
}

/// Event formatter naming the component each line comes from
pub struct LinkLogFormatter {
    service_name: String,
    color: bool,
}

impl LinkLogFormatter {
    /// Formatter for `service_name` writing to stderr; colours when stderr is a terminal
    pub fn new(service_name: impl Into<String>) -> Self {
        Self::for_stream(service_name, std::io::stderr().is_terminal())
    }

    fn for_stream(service_name: impl Into<String>, is_terminal: bool) -> Self {
        let dumb = std::env::var("TERM").is_ok_and(|term| term == "dumb");
        Self {
            service_name: service_name.into(),
            color: is_terminal && !dumb,
        }
    }

    fn component_column(&self, component: Option<&str>) -> String {
        let name = match component {
            Some(component) => format!("{}-{}", self.service_name, component),
            None => self.service_name.clone(),
        };
        if name.chars().count() > COMPONENT_WIDTH {
            let cut: String = name.chars().take(COMPONENT_WIDTH - 1).collect();
            format!("{}…", cut)
        } else {
            format!("{:<width$}", name, width = COMPONENT_WIDTH)
        }
    }

    fn level_column(level: &Level) -> String {
        let label = match *level {
            Level::ERROR => "✗ ERROR",
            Level::WARN => "⚠ WARN",
            Level::INFO => "ℹ INFO",
            Level::DEBUG => "◦ DEBUG",
            Level::TRACE => "◦ TRACE",
        };
        format!("{:<width$}", label, width = LEVEL_WIDTH)
    }

    fn paint(&self, code: &'static str) -> &'static str {
        if self.color {
            code
        } else {
            ""
        }
    }

    fn level_color(&self, level: &Level) -> &'static str {
        self.paint(match *level {
            Level::ERROR => RED,
            Level::WARN => YELLOW,
            Level::INFO => GREEN,
            Level::DEBUG | Level::TRACE => GRAY,
        })
    }
}

impl<S, N> FormatEvent<S, N> for LinkLogFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(&self, _ctx: &FmtContext<'_, S, N>, mut writer: Writer<'_>, event: &Event<'_>) -> fmt::Result {
        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
        let level = event.metadata().level();

        let mut fields = EventFields::default();
        event.record(&mut fields);

        write!(
            writer,
            "{}[{}] [{}] [{}{}{}] ",
            self.paint(CYAN),
            timestamp,
            self.component_column(fields.component.as_deref()),
            self.level_color(level),
            Self::level_column(level),
            self.paint(RESET),
        )?;
        writeln!(writer, "{}{}", fields.message, self.paint(RESET))
    }
}

/// Pulls `message` and `component` out of an event
#[derive(Default)]
struct EventFields {
    message: String,
    component: Option<String>,
}

impl Visit for EventFields {
    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "message" => self.message = value.to_string(),
            "component" => self.component = Some(value.to_string()),
            _ => {}
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        let text = format!("{:?}", value);
        let text = text
            .strip_prefix('"')
            .and_then(|t| t.strip_suffix('"'))
            .map(str::to_string)
            .unwrap_or_else(|| text.clone());
        match field.name() {
            "message" => self.message = text,
            "component" => self.component = Some(text),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_column_width() {
        let formatter = LinkLogFormatter {
            service_name: "emotibit".to_string(),
            color: false,
        };
        let column = formatter.component_column(Some("discovery"));
        assert!(column.starts_with("emotibit-discovery"));
        assert_eq!(column.chars().count(), COMPONENT_WIDTH);

        let long = formatter.component_column(Some("a-very-long-component"));
        assert_eq!(long.chars().count(), COMPONENT_WIDTH);
        assert!(long.ends_with('…'));

        assert_eq!(formatter.component_column(None).trim_end(), "emotibit");
    }

    #[test]
    fn test_color_follows_output_stream() {
        assert!(!LinkLogFormatter::for_stream("emotibit", false).color);
        if !std::io::stderr().is_terminal() {
            assert!(!LinkLogFormatter::new("emotibit").color);
        }
    }

    #[test]
    fn test_no_color_codes_when_disabled() {
        let formatter = LinkLogFormatter {
            service_name: "emotibit".to_string(),
            color: false,
        };
        assert_eq!(formatter.level_color(&Level::WARN), "");
        assert!(LinkLogFormatter::level_column(&Level::INFO).starts_with("ℹ INFO"));
    }
}
