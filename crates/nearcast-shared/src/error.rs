use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RoomCodeError {
    #[error("room code must be exactly 3 digits")]
    InvalidCode,
}

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("settings file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("settings serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("no settings directory available on this platform")]
    NoSettingsDir,
}
