use thiserror::Error;

use crate::media::MediaRole;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum PlanError {
    #[error("mandatory {role} input is missing")]
    MissingInput { role: MediaRole },
    #[error("caption {index} has invalid timing: start {start}s, end {end}s (end must be after start)")]
    InvalidCaptionTiming { index: usize, start: f64, end: f64 },
    #[error("style {style:?} has an invalid {field} {value:?}")]
    InvalidStyleColor {
        style: String,
        field: &'static str,
        value: String,
    },
    #[error("filter graph references undefined pad [{label}]")]
    DanglingPad { label: String },
    #[error("filter graph defines pad [{label}] more than once")]
    DuplicatePad { label: String },
    #[error("stream reference to input {index} but plan only has {inputs} inputs")]
    InputOutOfRange { index: usize, inputs: usize },
}

pub type PlanResult<T> = std::result::Result<T, PlanError>;
