use thiserror::Error;

/// Errors raised by entity-level validation that does not depend on storage
/// or scheduling (parsing a cron string, rejecting an out-of-range level,
/// looking up a switch option by name).
#[derive(Error, Debug)]
pub enum Error {
    /// A cron expression did not split into exactly five fields, or one of
    /// its fields fell outside the range for that position.
    #[error("invalid cron expression: {0}")]
    InvalidCron(String),

    /// A switch value string did not match any known [`Option`](crate::device::switch::SwitchOption).
    #[error("unknown switch option: {0}")]
    UnknownSwitchOption(String),

    /// A level value fell outside its device's configured `[minimum, maximum]`.
    #[error("level value {value} outside allowed range [{min}, {max}]")]
    LevelOutOfRange { value: f64, min: f64, max: f64 },

    /// A typed settings lookup (`get::<T>`) could not parse the stored string.
    #[error("setting {key:?} could not be parsed as the requested type")]
    SettingTypeMismatch { key: String },

    /// A JSON value did not have the shape expected for this operation.
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

/// Convenience alias, mirrored by every other Micasa crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;
