use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("can interface {name:?} unavailable: {reason}")]
    Interface { name: String, reason: String },
    #[error("motor group lists differ in length: {types} types, {send_ids} send ids, {recv_ids} recv ids")]
    GroupMismatch {
        types: usize,
        send_ids: usize,
        recv_ids: usize,
    },
    #[error("no {0} motors registered")]
    NotRegistered(&'static str),
    #[error("expected {expected} commands for registered motors, got {got}")]
    CommandCount { expected: usize, got: usize },
    #[error("motor 0x{0:02X} did not respond")]
    NoResponse(u32),
    #[error("motors on {0} are not enabled")]
    NotEnabled(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("failed to install signal handler: {0}")]
    Signal(#[from] ctrlc::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
