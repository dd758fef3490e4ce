//! Read-only check for Redis-style cache commands

use super::ValidationResult;

/// Verbs that only read data or server state
///
/// `KEYS` is absent on purpose: use `SCAN`.
#[rustfmt::skip]
pub const ALLOWED_COMMANDS: &[&str] = &[
    // Strings
    "GET", "MGET", "STRLEN", "GETRANGE",
    // Hashes
    "HGET", "HMGET", "HGETALL", "HKEYS", "HVALS", "HLEN", "HEXISTS", "HSCAN",
    // Lists
    "LRANGE", "LLEN", "LINDEX", "LPOS",
    // Sets
    "SMEMBERS", "SCARD", "SISMEMBER", "SRANDMEMBER", "SUNION", "SINTER", "SDIFF", "SSCAN",
    // Sorted sets
    "ZRANGE", "ZCARD", "ZSCORE", "ZRANK", "ZREVRANK", "ZCOUNT", "ZSCAN", "ZRANGEBYSCORE",
    "ZRANGEBYLEX",
    // Keys
    "TYPE", "TTL", "PTTL", "EXISTS", "SCAN", "RANDOMKEY", "OBJECT", "DUMP",
    // Server
    "INFO", "DBSIZE", "CONFIG", "CLIENT", "SLOWLOG", "MEMORY", "TIME", "COMMAND",
    // Streams
    "XINFO", "XLEN", "XRANGE", "XREVRANGE", "XREAD",
    // Connection
    "PING", "ECHO",
];

/// Commands that need a read-only subcommand, with the subcommands allowed for each
pub const NAMESPACED_COMMANDS: &[(&str, &[&str])] = &[
    ("CONFIG", &["GET"]),
    ("CLIENT", &["LIST", "GETNAME", "ID", "INFO"]),
    ("SLOWLOG", &["GET", "LEN"]),
    ("OBJECT", &["ENCODING", "REFCOUNT", "IDLETIME", "HELP", "FREQ"]),
    ("MEMORY", &["USAGE", "DOCTOR", "STATS", "HELP"]),
    ("COMMAND", &["COUNT", "DOCS", "GETKEYS", "INFO", "LIST"]),
    ("XINFO", &["STREAM", "GROUPS", "CONSUMERS", "HELP"]),
];

/// Validate a cache command and its arguments
///
/// Matching is case-insensitive on both the command and the subcommand.
#[must_use]
pub fn validate_cache_command<S: AsRef<str>>(cmd: &str, args: &[S]) -> ValidationResult {
    let upper = cmd.to_uppercase();

    if !ALLOWED_COMMANDS.contains(&upper.as_str()) {
        return ValidationResult::rejected(format!(
            "Command \"{cmd}\" is not allowed (read-only mode). Only read operations are permitted."
        ));
    }

    let Some(allowed) = allowed_subcommands(&upper) else {
        return ValidationResult::ok();
    };

    let Some(sub) = args.first().map(|arg| -> &str { arg.as_ref() }) else {
        return ValidationResult::rejected(format!(
            "\"{cmd}\" requires a subcommand (read-only mode). Allowed: {upper} {}",
            allowed.join("|")
        ));
    };

    if allowed.contains(&sub.to_uppercase().as_str()) {
        ValidationResult::ok()
    } else {
        ValidationResult::rejected(format!(
            "\"{cmd} {sub}\" is not allowed (read-only mode). Allowed: {upper} {}",
            allowed.join("|")
        ))
    }
}

fn allowed_subcommands(upper: &str) -> Option<&'static [&'static str]> {
    NAMESPACED_COMMANDS.iter().find(|(name, _)| *name == upper).map(|(_, subs)| *subs)
}

#[cfg(test)]
mod tests {
    use super::*;

    const NO_ARGS: &[&str] = &[];

    #[test]
    fn test_read_commands_allowed() {
        for (cmd, args) in [
            ("GET", vec!["mykey"]),
            ("MGET", vec!["k1", "k2"]),
            ("HGETALL", vec!["h"]),
            ("LRANGE", vec!["l", "0", "-1"]),
            ("ZRANGE", vec!["z", "0", "-1"]),
            ("SCAN", vec!["0"]),
            ("XRANGE", vec!["s", "-", "+"]),
            ("PING", vec![]),
            ("DBSIZE", vec![]),
        ] {
            assert!(validate_cache_command(cmd, &args).valid, "{cmd} should be allowed");
        }
    }

    #[test]
    fn test_case_insensitive() {
        assert!(validate_cache_command("get", &["k"]).valid);
        assert!(validate_cache_command("Get", &["k"]).valid);
        assert!(validate_cache_command("config", &["get"]).valid);
        assert!(validate_cache_command("CONFIG", &["Get"]).valid);
    }

    #[test]
    fn test_write_commands_rejected() {
        for cmd in ["SET", "DEL", "FLUSHALL", "FLUSHDB", "HSET", "LPUSH", "EVAL", "SHUTDOWN"] {
            let result = validate_cache_command(cmd, &["x"]);
            assert!(!result.valid, "{cmd} should be rejected");
            assert_eq!(
                result.error.unwrap(),
                format!(
                    "Command \"{cmd}\" is not allowed (read-only mode). Only read operations are permitted."
                )
            );
        }
    }

    #[test]
    fn test_keys_excluded() {
        assert!(!validate_cache_command("KEYS", &["*"]).valid);
    }

    #[test]
    fn test_bare_namespaced_command_requires_subcommand() {
        let result = validate_cache_command("CONFIG", NO_ARGS);
        assert!(!result.valid);
        assert!(result.error.unwrap().contains("requires a subcommand"));

        for (name, _) in NAMESPACED_COMMANDS {
            let result = validate_cache_command(name, NO_ARGS);
            assert!(result.error.unwrap().contains("requires a subcommand"), "{name}");
        }
    }

    #[test]
    fn test_disallowed_subcommand_names_allowed_set() {
        let result = validate_cache_command("CONFIG", &["SET", "x", "y"]);
        assert!(!result.valid);
        assert_eq!(
            result.error.unwrap(),
            "\"CONFIG SET\" is not allowed (read-only mode). Allowed: CONFIG GET"
        );

        let result = validate_cache_command("client", &["kill"]);
        assert_eq!(
            result.error.unwrap(),
            "\"client kill\" is not allowed (read-only mode). Allowed: CLIENT LIST|GETNAME|ID|INFO"
        );
    }

    #[test]
    fn test_slowlog_reset_rejected() {
        assert!(validate_cache_command("SLOWLOG", &["GET"]).valid);
        assert!(!validate_cache_command("SLOWLOG", &["RESET"]).valid);
    }

    #[test]
    fn test_allowed_subcommands() {
        assert!(validate_cache_command("CONFIG", &["GET"]).valid);
        assert!(validate_cache_command("OBJECT", &["ENCODING", "k"]).valid);
        assert!(validate_cache_command("MEMORY", &["USAGE", "k"]).valid);
        assert!(validate_cache_command("COMMAND", &["DOCS"]).valid);
        assert!(validate_cache_command("XINFO", &["GROUPS", "s"]).valid);
    }
}
