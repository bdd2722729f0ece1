//! Sidecar-file plumbing for [`crate::PersistentShell`]: building the
//! wrapper script run by each invocation, and reading back the exit code,
//! `pwd`, and environment sidecars it leaves behind.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Single-quotes `s` for safe embedding in a POSIX shell script, escaping any
/// embedded single quotes with the standard `'\''` idiom.
pub fn quote_single(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

/// Assembles the script a fresh shell invocation runs: source the rc file
/// and prior session state, `cd` into the tracked directory, run the user's
/// command verbatim, then write exit code / cwd to sidecar files and
/// rewrite the session-state script itself with the post-command
/// environment before exiting with the user command's own status.
pub fn build_wrapper_script(
    rc_file: Option<&Path>,
    state_script: &Path,
    cwd: &Path,
    command: &str,
    cwd_sidecar: &Path,
    exit_sidecar: &Path,
) -> String {
    let mut script = String::new();
    if let Some(rc) = rc_file {
        script.push_str(&format!(
            "[ -f {0} ] && . {0} >/dev/null 2>&1\n",
            quote_single(&rc.display().to_string())
        ));
    }
    script.push_str(&format!(
        "[ -f {0} ] && . {0}\n",
        quote_single(&state_script.display().to_string())
    ));
    script.push_str(&format!("cd {} 2>/dev/null\n", quote_single(&cwd.display().to_string())));
    script.push_str(command);
    script.push_str("\n__msa_status=$?\n");
    script.push_str(&format!(
        "pwd > {} 2>/dev/null\n",
        quote_single(&cwd_sidecar.display().to_string())
    ));
    script.push_str(&format!(
        "printf '%s' \"$__msa_status\" > {}\n",
        quote_single(&exit_sidecar.display().to_string())
    ));
    script.push_str(&format!(
        "env | while IFS='=' read -r key value; do\n\
         \x20\x20escaped_value=$(printf '%s\\n' \"$value\" | sed \"s/'/'\\\\\\\\''/g\")\n\
         \x20\x20echo \"export $key='$escaped_value'\"\n\
         done > {} 2>/dev/null || true\n",
        quote_single(&state_script.display().to_string())
    ));
    script.push_str("exit \"$__msa_status\"\n");
    script
}

pub fn read_exit_code(path: &Path) -> Option<i32> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

pub fn read_cwd(path: &Path) -> Option<PathBuf> {
    let content = std::fs::read_to_string(path).ok()?;
    let trimmed = content.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(PathBuf::from(trimmed))
    }
}

/// Re-parses the session-state script after a command has rewritten it,
/// recovering the parent's in-memory view of the session's environment.
/// The script itself is already in `export KEY='value'` form (written by
/// the shell, not by us) — this mirrors how the parent restores its own
/// view rather than round-tripping through a separate sidecar file.
pub fn read_env_from_state_script(path: &Path) -> Option<HashMap<String, String>> {
    let content = std::fs::read_to_string(path).ok()?;
    let mut map = HashMap::new();
    for line in content.lines() {
        let line = line.trim();
        let Some(rest) = line.strip_prefix("export ") else {
            continue;
        };
        if let Some((key, value)) = rest.split_once('=') {
            let value = value.trim().trim_matches('\'').replace("'\\''", "'");
            map.insert(key.trim().to_string(), value);
        }
    }
    Some(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_single_escapes_embedded_quotes() {
        assert_eq!(quote_single("it's fine"), "'it'\\''s fine'");
    }

    #[test]
    fn env_round_trips_through_state_script_export_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.sh");
        std::fs::write(
            &path,
            "export FOO='bar'\nexport BAZ='qux with spaces'\nexport QUOTED='it'\\''s ok'\n",
        )
        .unwrap();
        let map = read_env_from_state_script(&path).unwrap();
        assert_eq!(map.get("FOO"), Some(&"bar".to_string()));
        assert_eq!(map.get("BAZ"), Some(&"qux with spaces".to_string()));
        assert_eq!(map.get("QUOTED"), Some(&"it's ok".to_string()));
    }

    #[test]
    fn read_cwd_trims_trailing_newline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cwd");
        std::fs::write(&path, b"/tmp/somewhere\n").unwrap();
        assert_eq!(read_cwd(&path), Some(PathBuf::from("/tmp/somewhere")));
    }
}
