use thiserror::Error;

#[derive(Debug, Error)]
pub enum FitError {
    #[error("Parse error: {0}")]
    Parse(String),

    /// Target data file is missing expected fields or records.
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("Simulation error: {0}")]
    Simulation(String),

    #[error("Simulation timed out after {0} seconds")]
    SimulationTimeout(u64),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, FitError>;
