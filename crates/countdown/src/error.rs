use thiserror::Error;

#[derive(Debug, Error)]
pub enum CountdownError {
    #[error("countdown tick interval must be non-zero")]
    ZeroTickInterval,
    #[error("countdown generation {generation} ticked past zero")]
    TickUnderflow { generation: u64 },
}
