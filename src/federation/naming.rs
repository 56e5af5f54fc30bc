//! Alias prefixes and collision-free public tool names

/// Prefix used when a connection name sanitizes to nothing
pub const FALLBACK_PREFIX: &str = "mcp";

/// Seed used when a colliding name is empty after dot replacement
const FALLBACK_SEED: &str = "tool";

/// Derive the alias prefix for a connection name.
///
/// Lowercased and trimmed; ASCII letters, digits, `_` and `-` are kept and
/// everything else becomes `_`. Leading and trailing `.`, `_`, `-` are
/// stripped.
#[must_use]
pub fn alias_prefix(connection_name: &str) -> String {
    let replaced: String = connection_name
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();

    let trimmed = replaced.trim_matches(|c| matches!(c, '.' | '_' | '-'));
    if trimmed.is_empty() {
        FALLBACK_PREFIX.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Public name of a connection tool before collision resolution
#[must_use]
pub fn alias_name(prefix: &str, original_name: &str) -> String {
    format!("{prefix}.{original_name}")
}

/// Resolve `proposed` against the names already taken.
///
/// Returns `proposed` unchanged when free. Otherwise dots become
/// underscores and `_2`, `_3`, ... are probed until a free name is found.
pub fn resolve_collision(proposed: &str, is_taken: impl Fn(&str) -> bool) -> String {
    if !is_taken(proposed) {
        return proposed.to_string();
    }

    let mut seed = proposed.replace('.', "_");
    if seed.is_empty() {
        seed = FALLBACK_SEED.to_string();
    }

    let mut n: usize = 2;
    loop {
        let candidate = format!("{seed}_{n}");
        if !is_taken(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

/// Description shown to callers for a connection tool.
///
/// The connection name is always visible; a blank description falls back
/// to the backend-local tool name.
#[must_use]
pub fn tagged_description(connection_name: &str, description: &str, original_name: &str) -> String {
    if description.trim().is_empty() {
        format!("[{connection_name}] {original_name}")
    } else {
        format!("[{connection_name}] {description}")
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn prefix_lowercases_and_replaces() {
        assert_eq!(alias_prefix("Remote SSE"), "remote_sse");
        assert_eq!(alias_prefix("  GitHub Tools  "), "github_tools");
        assert_eq!(alias_prefix("my-server_01"), "my-server_01");
    }

    #[test]
    fn prefix_trims_separator_runs() {
        assert_eq!(alias_prefix("hello world!!"), "hello_world");
        assert_eq!(alias_prefix("--weird.name--"), "weird_name");
        assert_eq!(alias_prefix("__x__"), "x");
    }

    #[test]
    fn prefix_falls_back_when_nothing_survives() {
        assert_eq!(alias_prefix(""), FALLBACK_PREFIX);
        assert_eq!(alias_prefix("   "), FALLBACK_PREFIX);
        assert_eq!(alias_prefix("!!!"), FALLBACK_PREFIX);
        assert_eq!(alias_prefix("日本"), FALLBACK_PREFIX);
    }

    #[test]
    fn alias_joins_with_dot() {
        assert_eq!(alias_name("remote_sse", "search"), "remote_sse.search");
    }

    #[test]
    fn free_name_is_kept() {
        let taken: HashSet<String> = HashSet::new();
        assert_eq!(resolve_collision("a.b", |n| taken.contains(n)), "a.b");
    }

    #[test]
    fn collision_probes_numbered_suffixes() {
        // GIVEN: the alias and its first suffix are taken
        let taken: HashSet<String> = ["hello_world.ping", "hello_world_ping_2"]
            .into_iter()
            .map(String::from)
            .collect();

        // WHEN: resolving the alias again
        let name = resolve_collision("hello_world.ping", |n| taken.contains(n));

        // THEN: next free suffix, dots replaced
        assert_eq!(name, "hello_world_ping_3");
    }

    #[test]
    fn empty_colliding_name_uses_fallback_seed() {
        let taken: HashSet<String> = [String::new()].into_iter().collect();
        assert_eq!(resolve_collision("", |n| taken.contains(n)), "tool_2");
    }

    #[test]
    fn description_carries_connection_tag() {
        assert_eq!(tagged_description("Remote SSE", "Search the web", "search"), "[Remote SSE] Search the web");
        assert_eq!(tagged_description("Remote SSE", "  ", "search"), "[Remote SSE] search");
    }
}
