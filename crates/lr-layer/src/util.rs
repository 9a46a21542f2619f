//! Small formatting helpers shared by layer diagnostics.

use std::fmt::Display;

/// Joins `values` into a readable list such as `2D, 3D or 4D`.
///
/// Every value is wrapped in `prefix`/`suffix`. The last two values are
/// joined by `conjunction`, preceded by `separator` only when
/// `serial_separator` is set (the "Oxford comma").
pub fn format_with_conjunction<T: Display>(
    values: &[T],
    separator: &str,
    prefix: &str,
    suffix: &str,
    conjunction: &str,
    serial_separator: bool,
) -> String {
    let Some((last, rest)) = values.split_last() else {
        return String::new();
    };
    let mut out = String::new();
    if let Some((second_last, head)) = rest.split_last() {
        for value in head {
            out.push_str(&format!("{prefix}{value}{suffix}{separator}"));
        }
        out.push_str(&format!("{prefix}{second_last}{suffix}"));
        if serial_separator {
            out.push_str(separator);
        }
        out.push_str(conjunction);
    }
    out.push_str(&format!("{prefix}{last}{suffix}"));
    out
}
