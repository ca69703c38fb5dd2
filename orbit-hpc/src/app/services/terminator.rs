// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use rand::Rng;

const TERMINATOR_PREFIX: &str = "ORBIT-HPC-DONE-";

/// Fresh marker appended by the job wrapper once a file is fully written.
pub fn generate_terminator() -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..16)
        .map(|_| {
            let idx = rng.random_range(0..26);
            (b'a' + idx) as char
        })
        .collect();
    format!("{TERMINATOR_PREFIX}{suffix}")
}

/// Content of a file written by the wrapper, without the terminator line.
/// `None` while the file is still incomplete.
pub fn strip_terminator<'a>(contents: &'a str, terminator: &str) -> Option<&'a str> {
    let trimmed = contents.trim_end_matches(['\n', '\r']);
    let body = trimmed.strip_suffix(terminator)?;
    Some(body.trim_end_matches(['\n', '\r']))
}

/// Exit code from a complete result file.
pub fn parse_result_file(contents: &str, terminator: &str) -> Option<i32> {
    strip_terminator(contents, terminator)?
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())?
        .parse::<i32>()
        .ok()
}
