use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BoardroomError {
    #[error("Prompt is required")]
    EmptyPrompt,

    #[error("Cancelled")]
    Cancelled,

    #[error("Step {step} failed: {reason}")]
    StepFailed { step: String, reason: String },
}

pub type BoardroomResult<T> = Result<T, BoardroomError>;
