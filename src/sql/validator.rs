//! Clause validation for SELECT requests.
//!
//! Two rules are enforced before any SQL text is assembled:
//! - HAVING requires GROUP BY
//! - LIMIT is `count` or `offset,count` (ASCII digits only, surrounding blanks allowed)
//!
//! Each number must also fit in a `u64`; the PostgreSQL rewrite needs both parts.

use crate::error::ValidationError;
use regex::Regex;
use std::sync::LazyLock;

static LIMIT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[[:space:]]*[[:digit:]]+[[:space:]]*(,[[:space:]]*[[:digit:]]+[[:space:]]*)?$")
        .expect("valid LIMIT regex")
});

/// Check whether a LIMIT string matches the accepted grammar.
pub fn is_valid_limit(limit: &str) -> bool {
    LIMIT_PATTERN.is_match(limit)
}

/// Validate the optional clause combination of a SELECT.
///
/// Empty strings mean "clause absent".
///
/// # Examples
///
/// ```
/// use table_gateway::sql::validator::validate;
///
/// assert!(validate("", "", "5,10").is_ok());
/// assert!(validate("", "count(*) > 1", "").is_err());
/// assert!(validate("", "", "abc").is_err());
/// ```
pub fn validate(group_by: &str, having: &str, limit: &str) -> Result<(), ValidationError> {
    if !having.is_empty() && group_by.is_empty() {
        return Err(ValidationError::InvalidClauseCombination {
            having: having.to_string(),
        });
    }
    if !limit.is_empty() && parse_limit(limit).is_none() {
        return Err(ValidationError::InvalidLimitSyntax {
            limit: limit.to_string(),
        });
    }
    Ok(())
}

/// Split a validated LIMIT string into `(offset, count)`.
///
/// Returns `None` when the string does not match the grammar or a number
/// overflows.
pub fn parse_limit(limit: &str) -> Option<(Option<u64>, u64)> {
    if !is_valid_limit(limit) {
        return None;
    }
    match limit.split_once(',') {
        Some((offset, count)) => Some((
            Some(offset.trim().parse().ok()?),
            count.trim().parse().ok()?,
        )),
        None => Some((None, limit.trim().parse().ok()?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_having_without_group_by_rejected() {
        let err = validate("", "X", "").unwrap_err();
        assert!(matches!(
            err,
            ValidationError::InvalidClauseCombination { .. }
        ));
    }

    #[test]
    fn test_having_with_group_by_accepted() {
        assert!(validate("job", "count(*) > 1", "").is_ok());
    }

    #[test]
    fn test_limit_grammar() {
        for ok in ["5", "5,10", " 5 , 10 ", "0", "007"] {
            assert!(is_valid_limit(ok), "expected {:?} to be accepted", ok);
        }
        for bad in ["abc", "5,", ",5", "5 10", "-1", "5,10,15", "1.5", " "] {
            assert!(!is_valid_limit(bad), "expected {:?} to be rejected", bad);
        }
    }

    #[test]
    fn test_invalid_limit_rejected() {
        assert!(validate("", "", "5,10").is_ok());
        let err = validate("", "", "abc").unwrap_err();
        assert_eq!(
            err,
            ValidationError::InvalidLimitSyntax {
                limit: "abc".to_string()
            }
        );
    }

    #[test]
    fn test_combination_checked_before_limit() {
        let err = validate("", "X", "abc").unwrap_err();
        assert!(matches!(
            err,
            ValidationError::InvalidClauseCombination { .. }
        ));
    }

    #[test]
    fn test_parse_limit() {
        assert_eq!(parse_limit("10"), Some((None, 10)));
        assert_eq!(parse_limit(" 5 , 10 "), Some((Some(5), 10)));
        assert_eq!(parse_limit("x"), None);
        assert_eq!(parse_limit("99999999999999999999999,10"), None);
    }

    #[test]
    fn test_non_ascii_digits_and_blanks_rejected() {
        for bad in ["\u{665},\u{661}\u{660}", "\u{3000}5", "5\u{a0}", "\u{ff15}"] {
            assert!(!is_valid_limit(bad), "expected {:?} to be rejected", bad);
            assert!(validate("", "", bad).is_err());
        }
        assert!(is_valid_limit("\t5,\n10\r"));
    }

    #[test]
    fn test_overflowing_limit_rejected() {
        let limit = "99999999999999999999999,10";
        assert!(is_valid_limit(limit));
        assert_eq!(
            validate("", "", limit).unwrap_err(),
            ValidationError::InvalidLimitSyntax {
                limit: limit.to_string()
            }
        );
        assert!(validate("", "", "18446744073709551615").is_ok());
    }
}
