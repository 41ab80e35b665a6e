use brir_align::AlignError;
use std::{borrow::Cow, error::Error, fmt::Display};

#[derive(Debug)]
pub enum CalibrateError {
    IOError(std::io::Error),
    HoundError(hound::Error),
    RonError(ron::Error),
    RonParseError(ron::de::SpannedError),
    AlignError(AlignError),
    /// inputs that do not fit together
    Mismatch(String),
    JoinError,
}

impl Display for CalibrateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg: Cow<str> = match self {
            Self::IOError(e) => format!("I/O error: {}", e).into(),
            Self::HoundError(e) => format!("WAV error: {}", e).into(),
            Self::RonError(e) => format!("could not write RON: {}", e).into(),
            Self::RonParseError(e) => format!("could not parse RON: {}", e).into(),
            Self::AlignError(e) => format!("calibration failed: {}", e).into(),
            Self::Mismatch(msg) => msg.into(),
            Self::JoinError => "a calibration thread panicked".into(),
        };
        write!(f, "{}", msg)
    }
}

impl Error for CalibrateError {}

impl From<std::io::Error> for CalibrateError {
    fn from(value: std::io::Error) -> Self {
        Self::IOError(value)
    }
}

impl From<hound::Error> for CalibrateError {
    fn from(value: hound::Error) -> Self {
        Self::HoundError(value)
    }
}

impl From<ron::Error> for CalibrateError {
    fn from(value: ron::Error) -> Self {
        Self::RonError(value)
    }
}

impl From<ron::de::SpannedError> for CalibrateError {
    fn from(value: ron::de::SpannedError) -> Self {
        Self::RonParseError(value)
    }
}

impl From<AlignError> for CalibrateError {
    fn from(value: AlignError) -> Self {
        Self::AlignError(value)
    }
}
