use tessel_gfx::GfxError;

use crate::command_buffer::RgRecordingState;

/// frame graph 对外报告的所有错误
#[derive(Debug, thiserror::Error)]
pub enum RgError {
    #[error("invalid or expired {kind} handle: {id}")]
    InvalidHandle { kind: &'static str, id: String },

    #[error("task {0} does not exist in this recording")]
    UnknownTask(String),

    #[error("task {0} belongs to another recording")]
    ForeignTask(String),

    #[error("unknown submission batch \"{0}\"")]
    UnknownBatch(String),

    #[error("submission batch \"{0}\" already exists")]
    DuplicateBatch(String),

    #[error("submission batch \"{0}\" was already submitted")]
    BatchSubmitted(String),

    #[error("task \"{task}\" writes \"{resource}\", which is immutable in this recording")]
    WriteToImmutable { task: String, resource: String },

    #[error("render pass \"{pass}\": {reason}")]
    AttachmentMismatch { pass: String, reason: String },

    #[error("draw task \"{task}\" is incompatible with render pass \"{pass}\": {reason}")]
    IncompatibleDrawTask { task: String, pass: String, reason: String },

    #[error("task \"{task}\": {reason}")]
    BindingMismatch { task: String, reason: String },

    #[error("cyclic dependency involving task \"{0}\"")]
    CyclicDependency(String),

    #[error("recording \"{name}\" is {found:?}, expected {expected:?}")]
    InvalidState {
        name: String,
        expected: RgRecordingState,
        found: RgRecordingState,
    },

    #[error("capacity exceeded: {what} (limit {limit})")]
    CapacityExceeded { what: &'static str, limit: usize },

    #[error("invalid settings: {0}")]
    Settings(String),

    #[error("failed to parse settings: {0}")]
    SettingsParse(#[from] toml::de::Error),

    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Gfx(#[from] GfxError),
}

impl RgError {
    #[inline]
    pub(crate) fn invalid_handle(kind: &'static str, id: impl std::fmt::Debug) -> Self {
        Self::InvalidHandle {
            kind,
            id: format!("{:?}", id),
        }
    }
}

pub type RgResult<T> = Result<T, RgError>;
