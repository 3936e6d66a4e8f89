//! SD-010: Transport: local bash execution for script recipes and installs.

pub mod local;

/// Captured result of a finished script.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// `Err("exit code N: <stderr>")` unless the script succeeded.
    pub fn check(self) -> Result<ExecOutput, String> {
        if self.success() {
            Ok(self)
        } else {
            Err(format!("exit code {}: {}", self.exit_code, self.stderr.trim()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(exit_code: i32, stderr: &str) -> ExecOutput {
        ExecOutput {
            exit_code,
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }

    #[test]
    fn test_sd010_check_success() {
        assert!(output(0, "").check().is_ok());
    }

    #[test]
    fn test_sd010_check_failure_carries_stderr() {
        let err = output(127, "npm: command not found\n").check().unwrap_err();
        assert_eq!(err, "exit code 127: npm: command not found");
    }

    #[test]
    fn test_sd010_signal_is_failure() {
        assert!(!output(-1, "killed").success());
    }
}
