use mc_bus::BusError;
use mc_config::ConfigError;
use mc_crypto::CryptoError;
use mc_script::ScriptError;
use mc_system_jobs::SystemJobsError;

/// 启动阶段错误；二进制打印后以退出码 1 结束。
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Script(#[from] ScriptError),
    #[error(transparent)]
    Bus(#[from] BusError),
    #[error(transparent)]
    SystemJobs(#[from] SystemJobsError),
    #[error("unsupported bus type `{0}`")]
    UnsupportedBus(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
}
