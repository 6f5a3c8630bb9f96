//! Helpers for assembling command lines and win32 strings.
//!
//! They are pure so they are compiled and tested on every platform,
//! though only the windows backend relies on the wide string ones.
#![cfg_attr(not(windows), allow(dead_code))]

use std::ffi::OsString;

use crate::error::Error;

/// Joins arguments by a single space.
///
/// It's only used for diagnostics, nothing ever parses the result.
pub(crate) fn command_line(argv: &[OsString]) -> String {
    argv.iter()
        .map(|arg| arg.to_string_lossy())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Builds a command line which `CommandLineToArgvW` and MSVCRT split back into `argv`.
pub(crate) fn windows_command_line<S: AsRef<str>>(argv: &[S]) -> String {
    let mut line = String::new();
    for (i, arg) in argv.iter().enumerate() {
        if i > 0 {
            line.push(' ');
        }

        append_quoted(arg.as_ref(), &mut line);
    }

    line
}

// Follows the rules of "Everyone quotes command line arguments the wrong way".
fn append_quoted(arg: &str, line: &mut String) {
    let needs_quotes = arg.is_empty()
        || arg
            .chars()
            .any(|c| matches!(c, ' ' | '\t' | '\n' | '\x0b' | '"'));
    if !needs_quotes {
        line.push_str(arg);
        return;
    }

    line.push('"');

    let mut backslashes = 0;
    for c in arg.chars() {
        match c {
            '\\' => backslashes += 1,
            '"' => {
                // escape all collected backslashes and the quote itself
                line.extend(std::iter::repeat('\\').take(backslashes * 2 + 1));
                line.push('"');
                backslashes = 0;
            }
            c => {
                line.extend(std::iter::repeat('\\').take(backslashes));
                line.push(c);
                backslashes = 0;
            }
        }
    }

    // backslashes before the closing quote must be doubled
    line.extend(std::iter::repeat('\\').take(backslashes * 2));
    line.push('"');
}

/// Converts a string to a NUL terminated UTF-16 string.
pub(crate) fn to_wide_nul(s: &str) -> Result<Vec<u16>, Error> {
    if s.contains('\0') {
        return Err(Error::invalid(format!("{:?} contains a nul byte", s)));
    }

    let mut wide: Vec<u16> = s.encode_utf16().collect();
    wide.push(0);
    Ok(wide)
}

/// Builds a `CREATE_UNICODE_ENVIRONMENT` block.
///
/// Names are compared case insensitively, a later variable replaces an earlier one,
/// and the block is sorted as `CreateProcessW` expects.
pub(crate) fn environment_block<K, V>(env: &[(K, V)]) -> Result<Vec<u16>, Error>
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut vars: Vec<(&str, &str)> = Vec::with_capacity(env.len());
    for (key, value) in env {
        let (key, value) = (key.as_ref(), value.as_ref());
        if key.is_empty() || key.contains(|c| c == '=' || c == '\0') || value.contains('\0') {
            return Err(Error::invalid(format!(
                "environment variable {:?} can't be passed",
                key
            )));
        }

        vars.retain(|(name, _)| !name.eq_ignore_ascii_case(key));
        vars.push((key, value));
    }

    vars.sort_by_cached_key(|(name, _)| name.to_uppercase());

    let mut block = Vec::new();
    for (key, value) in vars {
        block.extend(key.encode_utf16());
        block.extend("=".encode_utf16());
        block.extend(value.encode_utf16());
        block.push(0);
    }

    if block.is_empty() {
        // an empty block still needs two terminating NULs
        block.push(0);
    }

    block.push(0);

    Ok(block)
}
