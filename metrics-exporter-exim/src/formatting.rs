//! Helpers for rendering metrics in the Prometheus [exposition format].
//!
//! [exposition format]: https://github.com/prometheus/docs/blob/main/content/docs/instrumenting/exposition_formats.md#text-format-details

use crate::common::LabelSet;

/// Writes a `# HELP` line.
pub fn write_help_line(buffer: &mut String, name: &str, suffix: Option<&'static str>, desc: &str) {
    buffer.push_str("# HELP ");
    add_metric_name(buffer, name, suffix);
    buffer.push(' ');
    buffer.push_str(&sanitize_description(desc));
    buffer.push('\n');
}

/// Writes a `# TYPE` line.
pub fn write_type_line(
    buffer: &mut String,
    name: &str,
    suffix: Option<&'static str>,
    metric_type: &str,
) {
    buffer.push_str("# TYPE ");
    add_metric_name(buffer, name, suffix);
    buffer.push(' ');
    buffer.push_str(metric_type);
    buffer.push('\n');
}

/// Writes a single sample line.
///
/// When `suffix` is given it is appended to `name` unless the name already ends with it, which is
/// how counters pick up their `_total` suffix.
pub fn write_metric_line<T>(
    buffer: &mut String,
    name: &str,
    suffix: Option<&'static str>,
    labels: &LabelSet,
    value: T,
) where
    T: std::fmt::Display,
{
    add_metric_name(buffer, name, suffix);

    if !labels.is_empty() {
        buffer.push('{');
        for (i, label) in labels.to_strings().enumerate() {
            if i > 0 {
                buffer.push(',');
            }
            buffer.push_str(&label);
        }
        buffer.push('}');
    }

    buffer.push(' ');
    buffer.push_str(&value.to_string());
    buffer.push('\n');
}

fn add_metric_name(buffer: &mut String, name: &str, suffix: Option<&'static str>) {
    let start = buffer.len();
    buffer.push_str(name);
    if let Some(suffix) = suffix {
        if !buffer[start..].ends_with(suffix) {
            buffer.push('_');
            buffer.push_str(suffix);
        }
    }
}

/// Sanitizes a metric name to be valid under the Prometheus [data model].
///
/// [data model]: https://prometheus.io/docs/concepts/data_model/#metric-names-and-labels
pub fn sanitize_metric_name(name: &str) -> String {
    replace_invalid(name, is_name_char)
}

/// Sanitizes a label key. Same rules as metric names, minus colons.
pub fn sanitize_label_key(key: &str) -> String {
    replace_invalid(key, is_key_char)
}

fn replace_invalid(input: &str, valid: fn(char, bool) -> bool) -> String {
    input.chars().enumerate().map(|(i, c)| if valid(c, i == 0) { c } else { '_' }).collect()
}

fn is_name_char(c: char, first: bool) -> bool {
    c == ':' || is_key_char(c, first)
}

fn is_key_char(c: char, first: bool) -> bool {
    c == '_' || c.is_ascii_alphabetic() || (!first && c.is_ascii_digit())
}

/// Escapes a label value.
///
/// Values come straight out of report cells, so nothing in them is treated as already escaped.
pub fn sanitize_label_value(value: &str) -> String {
    escape(value, true)
}

/// Escapes a metric description. Double quotes are legal in `# HELP` text.
pub fn sanitize_description(value: &str) -> String {
    escape(value, false)
}

fn escape(value: &str, quotes: bool) -> String {
    let mut sanitized = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => sanitized.push_str("\\\\"),
            '\n' => sanitized.push_str("\\n"),
            '"' if quotes => sanitized.push_str("\\\""),
            c => sanitized.push(c),
        }
    }
    sanitized
}
