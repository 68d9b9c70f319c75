/// Error taxonomy for the runtime. Every variant renders with a fixed
/// prefix so run logs stay grep-able.
#[derive(thiserror::Error, Debug)]
pub enum PsError {
    #[error("ParseError: line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("SchemaError: {0}")]
    Schema(String),

    #[error("PolicyViolation: {0}")]
    Policy(String),

    #[error("BudgetExceeded: {0}")]
    Budget(String),

    #[error("LoopDetected: {0}")]
    Loop(String),

    #[error("ToolError: {0}")]
    Tool(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Guard failed: {0}")]
    Guard(String),

    #[error("LLMError: {0}")]
    Llm(String),

    #[error("RuntimeError: {0}")]
    Runtime(String),
}

impl PsError {
    pub fn parse(line: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            line,
            message: message.into(),
        }
    }

    /// True for errors that terminate the whole run rather than the
    /// current statement.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Budget(_) | Self::Loop(_) | Self::Parse { .. })
    }
}

pub type PsResult<T> = Result<T, PsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_parse() {
        let err = PsError::parse(12, "unexpected token `}`");
        assert_eq!(err.to_string(), "ParseError: line 12: unexpected token `}`");
    }

    #[test]
    fn test_display_schema() {
        let err = PsError::Schema("READ_FILE requires `path`".into());
        assert_eq!(err.to_string(), "SchemaError: READ_FILE requires `path`");
    }

    #[test]
    fn test_display_policy() {
        let err = PsError::Policy("tool 'WRITE_FILE' not allowed".into());
        assert_eq!(
            err.to_string(),
            "PolicyViolation: tool 'WRITE_FILE' not allowed"
        );
    }

    #[test]
    fn test_display_budget() {
        let err = PsError::Budget("maxSteps".into());
        assert_eq!(err.to_string(), "BudgetExceeded: maxSteps");
    }

    #[test]
    fn test_display_guard() {
        let err = PsError::Guard("x < 2".into());
        assert_eq!(err.to_string(), "Guard failed: x < 2");
    }

    #[test]
    fn test_display_timeout() {
        let err = PsError::Timeout("operation exceeded 500ms".into());
        assert_eq!(err.to_string(), "Timeout: operation exceeded 500ms");
    }

    #[test]
    fn test_fatal_classification() {
        assert!(PsError::Budget("maxTokens".into()).is_fatal());
        assert!(PsError::Loop("exact_repeat".into()).is_fatal());
        assert!(!PsError::Tool("File not found: x".into()).is_fatal());
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<PsError>();
    }
}
