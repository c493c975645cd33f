use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] micasa_core::Error),

    #[error(transparent)]
    Store(#[from] micasa_store::Error),

    #[error("unknown device selector: {0}")]
    UnknownDevice(String),

    #[error("unknown plugin: {0}")]
    UnknownPlugin(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
