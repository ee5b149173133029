//! Command-line join/split.
//!
//! `StartProcess` carries the child command line as a single string, so the
//! adapter joins its argv and the agent splits it back. The quoting rules
//! are deliberately small: arguments are separated by whitespace, double
//! quotes group, and `\"` escapes a quote inside a quoted region.

/// Join argv into a single command-line string.
pub fn join_cmdline<I, S>(args: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = String::new();
    for arg in args {
        let arg = arg.as_ref();
        if !out.is_empty() {
            out.push(' ');
        }
        if arg.is_empty() || arg.contains(|c: char| c.is_whitespace() || c == '"') {
            out.push('"');
            for ch in arg.chars() {
                if ch == '"' {
                    out.push('\\');
                }
                out.push(ch);
            }
            out.push('"');
        } else {
            out.push_str(arg);
        }
    }
    out
}

/// Split a command-line string back into argv.
pub fn split_cmdline(cmdline: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_arg = false;
    let mut in_quotes = false;
    let mut chars = cmdline.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '\\' if in_quotes && chars.peek() == Some(&'"') => {
                current.push(chars.next().unwrap());
            }
            '"' => {
                in_quotes = !in_quotes;
                in_arg = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if in_arg {
                    args.push(std::mem::take(&mut current));
                    in_arg = false;
                }
            }
            c => {
                current.push(c);
                in_arg = true;
            }
        }
    }
    if in_arg {
        args.push(current);
    }
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_args() {
        assert_eq!(join_cmdline(["ls", "-la"]), "ls -la");
        assert_eq!(split_cmdline("ls -la"), vec!["ls", "-la"]);
    }

    #[test]
    fn spaces_are_quoted() {
        let joined = join_cmdline(["echo", "hello world"]);
        assert_eq!(joined, "echo \"hello world\"");
        assert_eq!(split_cmdline(&joined), vec!["echo", "hello world"]);
    }

    #[test]
    fn quotes_survive_round_trip() {
        let args = ["sh", "-c", "echo \"a b\""];
        let joined = join_cmdline(args);
        assert_eq!(split_cmdline(&joined), args.to_vec());
    }

    #[test]
    fn empty_arg_survives() {
        let joined = join_cmdline(["prog", ""]);
        assert_eq!(split_cmdline(&joined), vec!["prog", ""]);
    }

    #[test]
    fn collapsed_whitespace() {
        assert_eq!(split_cmdline("  a   b  "), vec!["a", "b"]);
        assert!(split_cmdline("   ").is_empty());
    }
}
