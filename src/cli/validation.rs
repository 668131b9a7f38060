use mirrorfs::error::{MirrorError, Result};

/// Reject paths the cache cannot address.
pub fn validate_virtual_path(path: &str) -> Result<()> {
    if !path.starts_with('/') {
        return Err(MirrorError::Config(format!(
            "Paths must be absolute (start with '/'): {}",
            path
        )));
    }

    for byte in path.bytes() {
        if byte < 32 || byte == 127 {
            return Err(MirrorError::Config(
                "Path contains control characters".to_string(),
            ));
        }
    }

    if path.split('/').any(|segment| segment == "..") {
        return Err(MirrorError::Config(format!(
            "Path cannot contain '..': {}",
            path
        )));
    }

    Ok(())
}

/// Split a shell line into words. Double quotes group words and a
/// backslash escapes the next character.
pub fn split_shell_line(line: &str) -> Result<Vec<String>> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut in_quotes = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                let escaped = chars.next().ok_or_else(|| {
                    MirrorError::Config("Line ends with a dangling '\\'".to_string())
                })?;
                current.push(escaped);
                in_word = true;
            }
            '"' => {
                in_quotes = !in_quotes;
                in_word = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            c => {
                current.push(c);
                in_word = true;
            }
        }
    }

    if in_quotes {
        return Err(MirrorError::Config("Unterminated quote".to_string()));
    }
    if in_word {
        words.push(current);
    }
    Ok(words)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_virtual_path() {
        assert!(validate_virtual_path("/lpar1/u/a.txt").is_ok());
        assert!(validate_virtual_path("/").is_ok());
        assert!(validate_virtual_path("lpar1/u").is_err());
        assert!(validate_virtual_path("/lpar1/../etc").is_err());
        assert!(validate_virtual_path("/lpar1/a\tb").is_err());
    }

    #[test]
    fn test_split_plain_words() {
        assert_eq!(
            split_shell_line("  cp /a/b.txt   /a/c ").unwrap(),
            vec!["cp", "/a/b.txt", "/a/c"]
        );
        assert!(split_shell_line("   ").unwrap().is_empty());
    }

    #[test]
    fn test_split_quotes_and_escapes() {
        assert_eq!(
            split_shell_line(r#"cat "/lpar1/u/a (1).txt""#).unwrap(),
            vec!["cat", "/lpar1/u/a (1).txt"]
        );
        assert_eq!(
            split_shell_line(r"cat /lpar1/a\ b").unwrap(),
            vec!["cat", "/lpar1/a b"]
        );
        assert_eq!(split_shell_line(r#"put "" x"#).unwrap(), vec!["put", "", "x"]);
    }

    #[test]
    fn test_split_errors() {
        assert!(split_shell_line(r#"cat "/open"#).is_err());
        assert!(split_shell_line("cat \\").is_err());
    }
}
