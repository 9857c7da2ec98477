//! Conventional command-line assembly.
//!
//! Windows process creation takes a single command-line string, not an
//! argv. Quoting follows the conventional rules the game executable's
//! runtime unparses with: arguments containing space, tab, or a double
//! quote are wrapped in quotes; backslashes immediately preceding a quote
//! are doubled; the quote itself is backslash-escaped. The helper is pure
//! so the exact line can be logged and unit-tested on every platform.

use std::path::Path;

/// Quote one argument for a Windows command line.
pub fn quote_arg(arg: &str) -> String {
    if arg.is_empty() {
        return "\"\"".to_string();
    }
    if !arg.chars().any(|c| c == ' ' || c == '\t' || c == '"') {
        return arg.to_string();
    }

    let mut out = String::with_capacity(arg.len() + 2);
    out.push('"');
    let mut pending_backslashes = 0usize;
    for c in arg.chars() {
        match c {
            '\\' => pending_backslashes += 1,
            '"' => {
                // Backslashes before a quote must be doubled, then the
                // quote itself escaped.
                out.extend(std::iter::repeat('\\').take(pending_backslashes * 2));
                pending_backslashes = 0;
                out.push_str("\\\"");
            }
            other => {
                out.extend(std::iter::repeat('\\').take(pending_backslashes));
                pending_backslashes = 0;
                out.push(other);
            }
        }
    }
    // Trailing backslashes would otherwise escape the closing quote.
    out.extend(std::iter::repeat('\\').take(pending_backslashes * 2));
    out.push('"');
    out
}

/// Full command line for an executable and its argument vector.
pub fn command_line(executable: &Path, args: &[String]) -> String {
    let mut parts = Vec::with_capacity(args.len() + 1);
    parts.push(quote_arg(&executable.display().to_string()));
    parts.extend(args.iter().map(|a| quote_arg(a)));
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn plain_args_pass_through() {
        assert_eq!(quote_arg("-dedicated"), "-dedicated");
        assert_eq!(quote_arg("127.0.0.1:1134"), "127.0.0.1:1134");
    }

    #[test]
    fn empty_arg_becomes_empty_quotes() {
        assert_eq!(quote_arg(""), "\"\"");
    }

    #[test]
    fn spaces_force_quoting() {
        assert_eq!(quote_arg("game;KONGOR mode"), "\"game;KONGOR mode\"");
        assert_eq!(quote_arg("a\tb"), "\"a\tb\"");
    }

    #[test]
    fn embedded_quotes_are_escaped() {
        assert_eq!(quote_arg("say \"hi\""), "\"say \\\"hi\\\"\"");
    }

    #[test]
    fn backslashes_before_quotes_double() {
        // C:\dir\"x → "C:\dir\\\"x"
        assert_eq!(quote_arg(r#"C:\dir\"x"#), "\"C:\\dir\\\\\\\"x\"");
        // Plain backslashes stay single.
        assert_eq!(quote_arg(r"C:\Program Files\hon"), "\"C:\\Program Files\\hon\"");
    }

    #[test]
    fn trailing_backslashes_double_before_closing_quote() {
        assert_eq!(quote_arg(r"path with\ "), "\"path with\\ \"");
        assert_eq!(quote_arg(r"endshere\"), r"endshere\");
        assert_eq!(quote_arg(r"has space\"), "\"has space\\\\\"");
    }

    #[test]
    fn full_command_line_joins_quoted_parts() {
        let line = command_line(
            &PathBuf::from(r"C:\Games\HoN\hon_x64.exe"),
            &["-dedicated".to_string(), "-mod".to_string(), "game;KONGOR".to_string()],
        );
        assert_eq!(line, r"C:\Games\HoN\hon_x64.exe -dedicated -mod game;KONGOR");
    }
}
