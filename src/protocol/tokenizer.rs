//! Request line tokenizer

use crate::error::Error;

/// Most arguments accepted on one line.
pub const MAX_ARGUMENTS: usize = 16;

/// A tokenized request line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub command: String,
    pub args: Vec<String>,
}

/// Tokenizer failure, tagged with the command name when one was read.
#[derive(Debug)]
pub struct TokenizeError {
    pub command: String,
    pub error: Error,
}

impl TokenizeError {
    fn new(command: &str, msg: impl Into<String>) -> Self {
        Self {
            command: command.to_string(),
            error: Error::argument(msg),
        }
    }
}

/// Split a request line into command name and arguments.
///
/// The name must start with a letter and continue with letters, digits or
/// `_`. Arguments are bare words or double-quoted strings in which `\`
/// escapes the next character.
pub fn tokenize(line: &str) -> Result<Request, TokenizeError> {
    let line = line.trim_end_matches(['\n', '\r']);
    let mut chars = line.char_indices().peekable();

    while chars.next_if(|(_, c)| c.is_whitespace()).is_some() {}

    let Some(&(start, first)) = chars.peek() else {
        return Err(TokenizeError::new("", "No command given"));
    };
    if !first.is_ascii_alphabetic() {
        return Err(TokenizeError::new("", "Letter expected"));
    }
    let mut end = start;
    while let Some((i, c)) = chars.next_if(|(_, c)| c.is_ascii_alphanumeric() || *c == '_') {
        end = i + c.len_utf8();
    }
    let command = &line[start..end];
    if chars.peek().is_some_and(|(_, c)| !c.is_whitespace()) {
        return Err(TokenizeError::new(command, "Invalid word character"));
    }

    let mut args = Vec::new();
    loop {
        while chars.next_if(|(_, c)| c.is_whitespace()).is_some() {}
        let Some(&(_, c)) = chars.peek() else {
            break;
        };

        let arg = if c == '"' {
            chars.next();
            let mut arg = String::new();
            let mut closed = false;
            while let Some((_, c)) = chars.next() {
                match c {
                    '\\' => match chars.next() {
                        Some((_, escaped)) => arg.push(escaped),
                        None => break,
                    },
                    '"' => {
                        closed = true;
                        break;
                    }
                    _ => arg.push(c),
                }
            }
            if !closed {
                return Err(TokenizeError::new(command, "Missing closing '\"'"));
            }
            if chars.peek().is_some_and(|(_, c)| !c.is_whitespace()) {
                return Err(TokenizeError::new(
                    command,
                    "Space expected after closing '\"'",
                ));
            }
            arg
        } else {
            let mut arg = String::new();
            while let Some((_, c)) = chars.next_if(|(_, c)| !c.is_whitespace()) {
                if c == '"' {
                    return Err(TokenizeError::new(command, "Invalid unquoted character"));
                }
                arg.push(c);
            }
            arg
        };

        if args.len() == MAX_ARGUMENTS {
            return Err(TokenizeError::new(command, "Too many arguments"));
        }
        args.push(arg);
    }

    Ok(Request {
        command: command.to_string(),
        args,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(line: &str) -> Request {
        tokenize(line).unwrap()
    }

    fn err(line: &str) -> (String, String) {
        let e = tokenize(line).unwrap_err();
        (e.command, e.error.to_string())
    }

    #[test]
    fn test_bare_and_quoted() {
        let request = ok("rate \"uri = 'a b.mp3'\" -3\n");
        assert_eq!(request.command, "rate");
        assert_eq!(request.args, vec!["uri = 'a b.mp3'", "-3"]);

        let request = ok("  list_artist   1  ");
        assert_eq!(request.command, "list_artist");
        assert_eq!(request.args, vec!["1"]);
    }

    #[test]
    fn test_escapes() {
        let request = ok(r#"addtag "title = \"x\"" "back\\slash""#);
        assert_eq!(request.args, vec![r#"title = "x""#, r"back\slash"]);
    }

    #[test]
    fn test_empty_quoted_argument() {
        let request = ok(r#"password """#);
        assert_eq!(request.args, vec![""]);
    }

    #[test]
    fn test_no_command() {
        assert_eq!(err(""), (String::new(), "No command given".to_string()));
        assert_eq!(err("   \r\n").1, "No command given");
        assert_eq!(err("1love").1, "Letter expected");
    }

    #[test]
    fn test_trailing_garbage() {
        assert_eq!(
            err(r#"list "a"b"#),
            ("list".to_string(), "Space expected after closing '\"'".to_string())
        );
        assert_eq!(err(r#"list "unterminated"#).1, "Missing closing '\"'");
        assert_eq!(err(r#"list ab"c"#).1, "Invalid unquoted character");
        assert_eq!(err("list! x").1, "Invalid word character");
    }

    #[test]
    fn test_argument_limit() {
        let line = format!("list {}", vec!["x"; MAX_ARGUMENTS].join(" "));
        assert_eq!(ok(&line).args.len(), MAX_ARGUMENTS);

        let line = format!("list {}", vec!["x"; MAX_ARGUMENTS + 1].join(" "));
        assert_eq!(err(&line).1, "Too many arguments");
    }
}
