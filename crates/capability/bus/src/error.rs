use contract::ErrorKind;

/// 总线错误。
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("encode error: {0}")]
    Encode(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("invalid topic: {0}")]
    InvalidTopic(String),
    #[error("request timeout: {0}")]
    Timeout(String),
    #[error("bus closed")]
    Closed,
    /// 应答方返回的错误（`<kind>: <text>`）。
    #[error("{0}")]
    Remote(String),
}

impl BusError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BusError::Encode(_) | BusError::Decode(_) => ErrorKind::Decode,
            BusError::InvalidTopic(_) => ErrorKind::Config,
            BusError::Timeout(_) => ErrorKind::Timeout,
            BusError::Closed => ErrorKind::Transport,
            BusError::Remote(text) => ErrorKind::split(text).0,
        }
    }
}

impl From<contract::ContractError> for BusError {
    fn from(err: contract::ContractError) -> Self {
        match err {
            contract::ContractError::Remote(text) => BusError::Remote(text),
            contract::ContractError::Encode(text) => BusError::Encode(text),
            contract::ContractError::Decode(text) => BusError::Decode(text),
        }
    }
}
