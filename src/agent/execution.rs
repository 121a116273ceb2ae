//! Code execution seam
//!
//! The session never runs code itself. It extracts fenced code fragments
//! from a speaker's message and hands each one, together with the sandboxed
//! working directory, to a [`CodeExecutor`] supplied by the caller.

use std::path::Path;

use async_trait::async_trait;

/// A fenced code block found in a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeFragment {
    /// Info string of the fence (`python`, `bash`, ...); `text` when absent
    pub language: String,
    pub code: String,
}

/// What the execution collaborator reports back
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl ExecutionOutput {
    /// Render the output as transcript text
    pub fn to_message(&self) -> String {
        format!(
            "Exit code: {}\nStdout:\n{}\nStderr:\n{}{}",
            self.exit_code,
            self.stdout,
            self.stderr,
            if self.timed_out {
                "\n(Execution timed out)"
            } else {
                ""
            }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutionError {
    #[error("language {0} is not supported by the executor")]
    UnsupportedLanguage(String),

    #[error("execution failed: {0}")]
    Failed(String),
}

/// External capability that runs a code fragment inside `workdir`
#[async_trait]
pub trait CodeExecutor: Send + Sync {
    async fn execute(
        &self,
        fragment: &CodeFragment,
        workdir: &Path,
    ) -> Result<ExecutionOutput, ExecutionError>;
}

/// Extract fenced code blocks (```lang ... ```) in order of appearance
///
/// Unterminated fences and blocks containing only whitespace are skipped.
pub fn extract_code_fragments(content: &str) -> Vec<CodeFragment> {
    let mut fragments = Vec::new();
    let mut open: Option<(String, Vec<&str>)> = None;

    for line in content.lines() {
        let trimmed = line.trim_start();
        match open.take() {
            None => {
                if let Some(info) = trimmed.strip_prefix("```") {
                    let language = info.split_whitespace().next().unwrap_or("");
                    let language = if language.is_empty() { "text" } else { language };
                    open = Some((language.to_ascii_lowercase(), Vec::new()));
                }
            }
            Some((language, mut body)) => {
                if trimmed.starts_with("```") && trimmed.trim_end() == "```" {
                    let code = body.join("\n");
                    if !code.trim().is_empty() {
                        fragments.push(CodeFragment { language, code });
                    }
                } else {
                    body.push(line);
                    open = Some((language, body));
                }
            }
        }
    }

    fragments
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_blocks_in_order() {
        let content = "Here is the fix:\n\
                       ```python\n\
                       print(\"hi\")\n\
                       ```\n\
                       Then run:\n\
                       ```bash\n\
                       ls -la\n\
                       echo done\n\
                       ```\n";

        let fragments = extract_code_fragments(content);
        assert_eq!(fragments.len(), 2);
        assert_eq!(fragments[0].language, "python");
        assert_eq!(fragments[0].code, "print(\"hi\")");
        assert_eq!(fragments[1].language, "bash");
        assert_eq!(fragments[1].code, "ls -la\necho done");
    }

    #[test]
    fn test_untagged_empty_and_unterminated_blocks() {
        let content = "```\nplain\n```\n```sh\n   \n```\n```python\nnever closed";
        let fragments = extract_code_fragments(content);
        assert_eq!(
            fragments,
            vec![CodeFragment {
                language: "text".into(),
                code: "plain".into()
            }]
        );
    }

    #[test]
    fn test_no_fences() {
        assert!(extract_code_fragments("Looks good to me. TERMINATE").is_empty());
    }

    #[test]
    fn test_output_formatting() {
        let output = ExecutionOutput {
            exit_code: 1,
            stdout: String::new(),
            stderr: "boom".into(),
            timed_out: true,
        };
        let text = output.to_message();
        assert!(text.starts_with("Exit code: 1"));
        assert!(text.contains("Stderr:\nboom"));
        assert!(text.ends_with("(Execution timed out)"));
    }
}
