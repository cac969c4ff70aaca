//! Caller-facing error kinds. Backend and compiler plumbing uses
//! `anyhow::Result`; these wrap it where a typed kind matters to the caller.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("unsupported document version {found:?} (expected {expected:?})")]
    SchemaVersionMismatch { found: String, expected: &'static str },
    #[error("document has {count} render passes, expected 1..={max}")]
    PassCountOutOfRange { count: usize, max: usize },
    #[error("render pass {pass} references unknown {what} asset id {id:?}")]
    UnknownAssetId { pass: usize, what: &'static str, id: String },
    #[error("render pass {pass} uses channel {channel}, only 0..=3 exist")]
    ChannelOutOfRange { pass: usize, channel: u8 },
    #[error("failed to allocate pass resources: {0:#}")]
    Resources(anyhow::Error),
}

#[derive(Debug, Error)]
pub enum PassError {
    #[error("no pass with id {0}")]
    NoSuchPass(usize),
    #[error("all buffer slots are in use")]
    NoFreeBufferSlot,
    #[error("the cubemap slot is already in use")]
    CubemapSlotInUse,
    #[error("an effect can hold at most {max} passes")]
    TooManyPasses { max: usize },
    #[error("channel {0} does not exist")]
    NoSuchChannel(usize),
    #[error("graphics backend failure: {0:#}")]
    Backend(anyhow::Error),
}

impl From<anyhow::Error> for PassError {
    fn from(e: anyhow::Error) -> Self {
        PassError::Backend(e)
    }
}
