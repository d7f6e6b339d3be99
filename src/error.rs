use thiserror::Error;

#[derive(Debug, Error)]
pub enum AlignmentError {
    #[error("I/O error while {context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("JSON parse error while {context}: {source}")]
    Json {
        context: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("unable to find the {window} window")]
    NoMatch { window: &'static str },
    #[error("not enough data to {context}: {message}")]
    InsufficientData {
        context: &'static str,
        message: String,
    },
    #[error("maximum deviation from slope is {max_deviation}, current slope is {slope}")]
    SlopeOutOfRange { slope: f64, max_deviation: f64 },
    #[error("could not convert {count} times past start of session (session starts at event {start_index})")]
    Unaligned { count: usize, start_index: usize },
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
}

impl AlignmentError {
    pub(crate) fn io(context: &'static str, source: std::io::Error) -> Self {
        Self::Io { context, source }
    }

    pub(crate) fn json(context: &'static str, source: serde_json::Error) -> Self {
        Self::Json { context, source }
    }

    pub(crate) fn insufficient(context: &'static str, message: impl Into<String>) -> Self {
        Self::InsufficientData {
            context,
            message: message.into(),
        }
    }

    pub(crate) fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// True for failures that leave other recordings or labels usable.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::NoMatch { .. } | Self::InsufficientData { .. })
    }
}
