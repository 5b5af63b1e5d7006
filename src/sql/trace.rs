//! Human-readable statement traces for diagnostics.
//!
//! The rendered text is for log lines only and is never sent to the database.

use crate::models::{PlaceholderStyle, Value};

/// Substitute positional markers with literal renderings of `args`.
///
/// `?` markers are replaced left to right; substitution stops once the
/// arguments run out. `$n` markers are replaced by `args[n - 1]` when present.
pub fn format_trace(sql: &str, args: &[Value], style: PlaceholderStyle) -> String {
    if args.is_empty() {
        return sql.to_string();
    }
    match style {
        PlaceholderStyle::Question => substitute_question(sql, args),
        PlaceholderStyle::Numbered => substitute_numbered(sql, args),
    }
}

fn substitute_question(sql: &str, args: &[Value]) -> String {
    let mut out = String::with_capacity(sql.len() + args.len() * 8);
    let mut remaining = args.iter();
    for ch in sql.chars() {
        if ch == '?' {
            if let Some(arg) = remaining.next() {
                out.push_str(&arg.to_sql_literal());
                continue;
            }
        }
        out.push(ch);
    }
    out
}

fn substitute_numbered(sql: &str, args: &[Value]) -> String {
    let mut out = String::with_capacity(sql.len() + args.len() * 8);
    let mut chars = sql.char_indices().peekable();
    while let Some((start, ch)) = chars.next() {
        if ch != '$' {
            out.push(ch);
            continue;
        }
        let mut end = start + 1;
        while let Some(&(idx, c)) = chars.peek() {
            if !c.is_ascii_digit() {
                break;
            }
            end = idx + c.len_utf8();
            chars.next();
        }
        let marker = &sql[start..end];
        let arg = marker[1..]
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|i| args.get(i));
        match arg {
            Some(value) => out.push_str(&value.to_sql_literal()),
            None => out.push_str(marker),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_question_markers_replaced_in_order() {
        let trace = format_trace(
            "INSERT INTO emp_test (emp_id, name) VALUES (?, ?)",
            &[Value::Int(1013), Value::from("JDBCUtil")],
            PlaceholderStyle::Question,
        );
        assert_eq!(
            trace,
            "INSERT INTO emp_test (emp_id, name) VALUES (1013, 'JDBCUtil')"
        );
    }

    #[test]
    fn test_question_substitution_stops_when_args_run_out() {
        let trace = format_trace("a = ? AND b = ?", &[Value::Int(1)], PlaceholderStyle::Question);
        assert_eq!(trace, "a = 1 AND b = ?");
    }

    #[test]
    fn test_numbered_markers() {
        let trace = format_trace(
            "UPDATE t SET a = $1 WHERE id = $2 AND x = $10",
            &[Value::Null, Value::Int(7)],
            PlaceholderStyle::Numbered,
        );
        assert_eq!(trace, "UPDATE t SET a = NULL WHERE id = 7 AND x = $10");
    }

    #[test]
    fn test_no_args_returns_sql_unchanged() {
        assert_eq!(
            format_trace("SELECT ? FROM t", &[], PlaceholderStyle::Question),
            "SELECT ? FROM t"
        );
    }
}
