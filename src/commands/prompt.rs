use async_trait::async_trait;
use mirrorfs::error::{MirrorError, Result};
use mirrorfs::host::{ConflictChoice, DiffRequest, HostShell};
use similar::{ChangeTag, TextDiff};
use std::io::Write;

use crate::cli::ConflictPolicy;

/// Read one line from stdin without blocking the runtime. `None` at end of input.
pub async fn read_stdin_line() -> Result<Option<String>> {
    tokio::task::spawn_blocking(|| -> Result<Option<String>> {
        let mut input = String::new();
        let read = std::io::stdin()
            .read_line(&mut input)
            .map_err(|e| MirrorError::Config(format!("Failed to read input: {}", e)))?;
        Ok(if read == 0 { None } else { Some(input) })
    })
    .await
    .map_err(|e| MirrorError::Config(format!("Input task failed: {}", e)))?
}

pub fn format_diff(old_content: &str, new_content: &str) -> String {
    let diff = TextDiff::from_lines(old_content, new_content);
    let mut result = String::new();
    for (idx, group) in diff.grouped_ops(3).iter().enumerate() {
        if idx > 0 {
            result.push_str("...\n");
        }
        for op in group {
            for change in diff.iter_changes(op) {
                let sign = match change.tag() {
                    ChangeTag::Delete => '-',
                    ChangeTag::Insert => '+',
                    ChangeTag::Equal => ' ',
                };
                result.push(sign);
                result.push_str(change.value());
                if change.missing_newline() {
                    result.push('\n');
                }
            }
        }
    }
    result
}

/// Host shell for the terminal: conflicts are resolved per the chosen
/// policy, comparisons are printed as line diffs.
pub struct CliHost {
    policy: ConflictPolicy,
}

impl CliHost {
    pub fn new(policy: ConflictPolicy) -> Self {
        CliHost { policy }
    }

    async fn ask(&self, file_name: &str) -> Option<ConflictChoice> {
        println!(
            "There is a newer version of {} on the remote system. [c]ompare / [o]verwrite / [N]one (N): ",
            file_name
        );
        let _ = std::io::stdout().flush();

        let input = match read_stdin_line().await {
            Ok(Some(input)) => input,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!("{}", e);
                return None;
            }
        };
        match input.trim().to_lowercase().as_str() {
            "c" | "compare" => Some(ConflictChoice::Compare),
            "o" | "overwrite" => Some(ConflictChoice::Overwrite),
            _ => None,
        }
    }
}

#[async_trait]
impl HostShell for CliHost {
    async fn prompt_conflict(&self, file_name: &str) -> Option<ConflictChoice> {
        match self.policy {
            ConflictPolicy::Prompt => self.ask(file_name).await,
            ConflictPolicy::Compare => Some(ConflictChoice::Compare),
            ConflictPolicy::Overwrite => Some(ConflictChoice::Overwrite),
            ConflictPolicy::Cancel => {
                println!("Save of {} cancelled: the remote copy changed", file_name);
                None
            }
        }
    }

    async fn open_diff(&self, request: DiffRequest) {
        println!("{}", request.title);
        println!("--- {}", request.remote_path);
        println!("+++ {}", request.local_path);
        let remote = String::from_utf8_lossy(&request.remote);
        let local = String::from_utf8_lossy(&request.local);
        print!("{}", format_diff(&remote, &local));
        println!(
            "Resolve with 'apply {}' (keep local), 'adopt {}' (keep remote) or 'dismiss {}'",
            request.local_path, request.local_path, request.local_path
        );
    }

    async fn close_diff(&self, remote_path: &str) {
        tracing::debug!("Comparison {} closed", remote_path);
    }

    fn status_message(&self, message: &str) {
        println!("{}", message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_diff_marks_changes() {
        let diff = format_diff("a\nb\nc\n", "a\nB\nc\n");
        assert_eq!(diff, " a\n-b\n+B\n c\n");
    }

    #[test]
    fn test_format_diff_without_trailing_newline() {
        let diff = format_diff("old", "new");
        assert_eq!(diff, "-old\n+new\n");
    }

    #[tokio::test]
    async fn test_fixed_policies_do_not_prompt() {
        assert_eq!(
            CliHost::new(ConflictPolicy::Compare).prompt_conflict("a").await,
            Some(ConflictChoice::Compare)
        );
        assert_eq!(
            CliHost::new(ConflictPolicy::Overwrite).prompt_conflict("a").await,
            Some(ConflictChoice::Overwrite)
        );
        assert_eq!(
            CliHost::new(ConflictPolicy::Cancel).prompt_conflict("a").await,
            None
        );
    }
}
