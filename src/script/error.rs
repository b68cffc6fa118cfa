use thiserror::Error;

/// Failure of a script evaluation, as seen from outside the interpreter.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    /// The program could not be parsed.
    #[error("{0}")]
    Syntax(String),

    /// The program threw (or a built-in threw on its behalf).
    #[error("{0}")]
    Runtime(String),

    /// The deadline passed or the evaluation was aborted.
    #[error("execution timed out")]
    Timeout,
}
