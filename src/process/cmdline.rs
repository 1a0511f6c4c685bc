//! Windows command-line assembly
//!
//! CreateProcess takes a single string that the child splits back into
//! arguments with the `CommandLineToArgvW` rules, so each argument is
//! quoted such that splitting reproduces it exactly.

use std::iter;

/// Quote one argument, appending it to `out`
fn push_quoted(arg: &str, out: &mut String) {
    let needs_quotes = arg.is_empty() || arg.contains([' ', '\t', '\n', '\x0b', '"']);
    if !needs_quotes {
        out.push_str(arg);
        return;
    }

    out.push('"');
    let mut backslashes = 0usize;
    for c in arg.chars() {
        match c {
            '\\' => backslashes += 1,
            '"' => {
                // escape the run of backslashes, then the quote itself
                out.extend(iter::repeat('\\').take(backslashes * 2 + 1));
                out.push('"');
                backslashes = 0;
            }
            _ => {
                out.extend(iter::repeat('\\').take(backslashes));
                out.push(c);
                backslashes = 0;
            }
        }
    }
    // backslashes before the closing quote must be doubled
    out.extend(iter::repeat('\\').take(backslashes * 2));
    out.push('"');
}

/// Join `argv` into a command line
pub(crate) fn join(argv: &[&str]) -> String {
    let mut line = String::new();
    for (i, arg) in argv.iter().enumerate() {
        if i > 0 {
            line.push(' ');
        }
        push_quoted(arg, &mut line);
    }
    line
}

/// NUL-terminated UTF-16 form expected by `CreateProcessW`
#[cfg_attr(not(windows), allow(dead_code))]
pub(crate) fn to_wide(argv: &[&str]) -> Vec<u16> {
    join(argv).encode_utf16().chain(iter::once(0)).collect()
}
