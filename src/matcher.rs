//! Matchers backing [`crate::permission::PermissionRule`] specifiers.
//!
//! The reference crate has no glob dependency in its stack (it hand-rolls its
//! SSE line splitting in `utils`), so name/path globbing here is a small
//! hand-rolled matcher rather than a new dependency. Domain and
//! command-prefix matching are plain string operations per `spec.md` §4.4.

/// Shell-style glob match supporting `*` (any run of characters, including
/// none) and `?` (exactly one character). No character classes or brace
/// expansion, since `spec.md` only requires "shell-style" globs for tool
/// names and paths, which in practice are single-segment patterns like
/// `bash` or `mcp__*` or `/etc/*`.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    glob_match_inner(&p, &t)
}

fn glob_match_inner(p: &[char], t: &[char]) -> bool {
    // Classic DP-free recursive matcher with a single backtrack point for `*`.
    let (mut pi, mut ti) = (0, 0);
    let (mut star_p, mut star_t) = (None, 0);

    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star_p = Some(pi);
            star_t = ti;
            pi += 1;
        } else if let Some(sp) = star_p {
            pi = sp + 1;
            star_t += 1;
            ti = star_t;
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

/// Applied to `url`/`uri`-shaped input fields. Matches on hostname equality
/// or suffix (e.g. pattern `example.com` matches host `api.example.com`).
pub fn domain_match(pattern: &str, url: &str) -> bool {
    let host = extract_host(url);
    let host = match host {
        Some(h) => h,
        None => return false,
    };
    let pattern = pattern.trim_start_matches("*.");
    host == pattern || host.ends_with(&format!(".{pattern}"))
}

fn extract_host(url: &str) -> Option<String> {
    let without_scheme = url.split_once("://").map(|(_, rest)| rest).unwrap_or(url);
    let host_and_rest = without_scheme
        .split(['/', '?', '#'])
        .next()
        .unwrap_or(without_scheme);
    let host = host_and_rest.rsplit('@').next().unwrap_or(host_and_rest);
    let host = host.split(':').next().unwrap_or(host);
    if host.is_empty() {
        None
    } else {
        Some(host.to_lowercase())
    }
}

/// Applied to `command`/`cmd`/`script`/`code`-shaped input fields. A rule
/// matches if the command, once trimmed, starts with the prefix, or contains
/// the prefix as a standalone word (so `rm` matches `sudo rm -rf /tmp`).
pub fn command_prefix_match(prefix: &str, command: &str) -> bool {
    let trimmed = command.trim();
    if trimmed.starts_with(prefix) {
        return true;
    }
    trimmed
        .split_whitespace()
        .any(|word| word == prefix || word.starts_with(prefix))
}

/// Field names in a tool's JSON input object that are treated as path-like,
/// used by `PathGlob` rules.
pub const PATH_FIELDS: &[&str] = &["path", "file_path", "file"];

/// Field names treated as URL-like, used by `Domain` rules.
pub const URL_FIELDS: &[&str] = &["url", "uri"];

/// Field names treated as shell-command-like, used by `CommandPrefix` rules.
pub const COMMAND_FIELDS: &[&str] = &["command", "cmd", "script", "code"];

/// Extracts the first present string field among `fields` from a tool input
/// object.
pub fn extract_field<'a>(input: &'a serde_json::Value, fields: &[&str]) -> Option<&'a str> {
    let obj = input.as_object()?;
    fields.iter().find_map(|f| obj.get(*f)?.as_str())
}
