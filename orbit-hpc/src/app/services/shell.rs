// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

/// Very small, safe-ish shell escaper for paths and command lines.
pub fn sh_escape(p: &str) -> String {
    let mut out = String::from("'");
    out.push_str(&p.replace('\'', r"'\''"));
    out.push('\'');
    out
}

/// Double-quotes a value for an `#SBATCH`/`#PBS` directive line. The
/// schedulers parse those lines themselves and only understand `"`.
pub fn directive_quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', r"\\").replace('"', r#"\""#))
}

/// Wraps `submit` in a loop that waits up to ~10s for `script_path` to show
/// up on the remote side of the shared filesystem.
pub fn wait_for_file_then(script_path: &str, submit: &str) -> String {
    let quoted = sh_escape(script_path);
    format!(
        "for _ in $(seq 1 20); do test -e {quoted} && break; sleep 0.5; done; {submit}"
    )
}
