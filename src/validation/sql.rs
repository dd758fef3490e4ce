//! SQL read-only check
//!
//! Order of checks:
//! 1. Leading verb must be one of [`ALLOWED_QUERY_STARTS`]
//! 2. At most one `;`, and only as the final character
//! 3. No [`DANGEROUS_KEYWORDS`] anywhere in the raw text
//! 4. If the text contains comment markers, repeat 3 on the comment-stripped text

use super::ValidationResult;

/// Leading verbs accepted in read-only mode
pub const ALLOWED_QUERY_STARTS: &[&str] = &["SELECT", "SHOW", "DESCRIBE", "EXPLAIN", "WITH"];

/// Keywords rejected anywhere in the statement, checked in this order
pub const DANGEROUS_KEYWORDS: &[&str] = &[
    // DML
    "INSERT",
    "UPDATE",
    "DELETE",
    "MERGE",
    "REPLACE",
    // DDL
    "DROP",
    "CREATE",
    "ALTER",
    "TRUNCATE",
    "RENAME",
    "COMMENT",
    // DCL
    "GRANT",
    "REVOKE",
    // Procedures
    "EXEC",
    "EXECUTE",
    "CALL",
    // Transactions
    "BEGIN",
    "COMMIT",
    "ROLLBACK",
    "SAVEPOINT",
    "LOCK",
    "UNLOCK",
    // Session state
    "SET",
    "PREPARE",
    "DEALLOCATE",
    // MySQL file access
    "INTO OUTFILE",
    "INTO DUMPFILE",
    "LOAD DATA",
    "LOAD XML",
    // PostgreSQL maintenance
    "COPY",
    "VACUUM",
    "REINDEX",
    "CLUSTER",
];

const START_ERROR: &str =
    "Only SELECT, SHOW, DESCRIBE, EXPLAIN, and WITH queries are allowed (read-only mode)";
const MULTI_STATEMENT_ERROR: &str = "Multiple statements are not allowed (read-only mode)";

/// Validate that `query` is a single read-only statement
#[must_use]
pub fn validate_query(query: &str) -> ValidationResult {
    let trimmed = query.trim();
    let normalized = trimmed.to_uppercase();

    if !ALLOWED_QUERY_STARTS.iter().any(|verb| normalized.starts_with(verb)) {
        return ValidationResult::rejected(START_ERROR);
    }

    let semicolons = query.matches(';').count();
    if semicolons > 1 || (semicolons == 1 && !trimmed.ends_with(';')) {
        return ValidationResult::rejected(MULTI_STATEMENT_ERROR);
    }

    if let Some(keyword) = find_dangerous_keyword(query) {
        return keyword_rejection(keyword);
    }

    if has_comments(query) {
        if let Some(keyword) = find_dangerous_keyword(&strip_comments(query)) {
            return keyword_rejection(keyword);
        }
    }

    ValidationResult::ok()
}

fn keyword_rejection(keyword: &str) -> ValidationResult {
    ValidationResult::rejected(format!(
        "Dangerous keyword detected: {keyword}. Only read-only queries are allowed."
    ))
}

/// First blacklisted keyword present as a whole word, in list order
fn find_dangerous_keyword(text: &str) -> Option<&'static str> {
    // ASCII uppercasing keeps byte offsets aligned with the original
    let haystack = text.to_ascii_uppercase();
    DANGEROUS_KEYWORDS.iter().copied().find(|keyword| contains_word(&haystack, keyword))
}

/// `needle` occurs in `haystack` with non-word characters (or text edges) on both sides
fn contains_word(haystack: &str, needle: &str) -> bool {
    let bytes = haystack.as_bytes();
    haystack.match_indices(needle).any(|(start, _)| {
        let end = start + needle.len();
        let before_ok = start == 0 || !is_word_byte(bytes[start - 1]);
        let after_ok = end == bytes.len() || !is_word_byte(bytes[end]);
        before_ok && after_ok
    })
}

const fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn has_comments(query: &str) -> bool {
    query.contains("/*") || query.contains("--") || query.contains('#')
}

/// Strip `--`, `#` and `/* */` comments, replacing each with a single space
fn strip_comments(sql: &str) -> String {
    let mut result = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '-' if chars.peek() == Some(&'-') => {
                skip_line(&mut chars);
                result.push(' ');
            }
            '#' => {
                skip_line(&mut chars);
                result.push(' ');
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = ' ';
                for ch in chars.by_ref() {
                    if prev == '*' && ch == '/' {
                        break;
                    }
                    prev = ch;
                }
                result.push(' ');
            }
            _ => result.push(ch),
        }
    }

    result
}

/// Consume up to (not including) the next newline
fn skip_line(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) {
    while let Some(&next) = chars.peek() {
        if next == '\n' {
            break;
        }
        chars.next();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rejection(query: &str) -> String {
        let result = validate_query(query);
        assert!(!result.valid, "expected rejection for {query:?}");
        result.error.unwrap()
    }

    #[test]
    fn test_select_allowed() {
        assert!(validate_query("SELECT * FROM users").valid);
        assert!(validate_query("  select id from users  ").valid);
        assert!(validate_query("SELECT 1;").valid);
    }

    #[test]
    fn test_other_read_verbs_allowed() {
        assert!(validate_query("SHOW TABLES").valid);
        assert!(validate_query("DESCRIBE users").valid);
        assert!(validate_query("EXPLAIN SELECT * FROM users").valid);
        assert!(validate_query("WITH x AS (SELECT 1) SELECT * FROM x").valid);
    }

    #[test]
    fn test_non_read_start_rejected() {
        assert_eq!(rejection("DELETE FROM users"), START_ERROR);
        assert_eq!(rejection("PRAGMA table_info(users)"), START_ERROR);
        assert_eq!(rejection(""), START_ERROR);
    }

    #[test]
    fn test_multiple_statements_rejected() {
        assert_eq!(rejection("SELECT 1; DROP TABLE users"), MULTI_STATEMENT_ERROR);
        assert_eq!(rejection("SELECT 1;;"), MULTI_STATEMENT_ERROR);
        assert_eq!(rejection("SELECT ';' FROM t"), MULTI_STATEMENT_ERROR);
    }

    #[test]
    fn test_trailing_whitespace_after_semicolon() {
        assert!(validate_query("SELECT 1;  \n").valid);
    }

    #[test]
    fn test_dangerous_keyword_in_cte() {
        assert_eq!(
            rejection("WITH x AS (DELETE FROM t RETURNING *) SELECT * FROM x"),
            "Dangerous keyword detected: DELETE. Only read-only queries are allowed."
        );
    }

    #[test]
    fn test_keyword_list_order_wins() {
        // UPDATE precedes SET in the list
        assert!(rejection("SELECT 1 FROM t WHERE x = 'SET UPDATE'").contains("UPDATE"));
    }

    #[test]
    fn test_word_boundaries() {
        assert!(validate_query("SELECT inserted_at, updated_by FROM audit").valid);
        assert!(validate_query("SELECT settings FROM prefs").valid);
        assert!(validate_query("SELECT created FROM t").valid);
    }

    #[test]
    fn test_keyword_case_insensitive() {
        assert!(rejection("select * from t where exists (select 1) or drop").contains("DROP"));
    }

    #[test]
    fn test_keyword_inside_comment_rejected() {
        assert!(rejection("SELECT 1 -- DROP TABLE users").contains("DROP"));
        assert!(rejection("SELECT 1 /* truncate */").contains("TRUNCATE"));
        assert!(rejection("SELECT 1 # vacuum").contains("VACUUM"));
    }

    #[test]
    fn test_comment_split_keyword_caught_by_rescan() {
        assert_eq!(
            rejection("SELECT * FROM t INTO/* x */OUTFILE '/tmp/out'"),
            "Dangerous keyword detected: INTO OUTFILE. Only read-only queries are allowed."
        );
    }

    #[test]
    fn test_quoted_keyword_rejected() {
        assert!(rejection("SELECT 'please delete me' AS note").contains("DELETE"));
    }

    #[test]
    fn test_strip_comments() {
        assert_eq!(strip_comments("a -- b\nc"), "a  \nc");
        assert_eq!(strip_comments("a /* b */ c"), "a   c");
        assert_eq!(strip_comments("a # b"), "a  ");
    }
}
