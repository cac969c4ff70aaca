pub mod asset_id;
pub mod backend;
pub mod compiler;
pub mod config;
pub mod document;
pub mod error;
pub mod keyboard;
pub mod pass;
pub mod pipeline;
pub mod player;
pub mod pool;
pub mod sound;

pub use backend::GraphicsBackend;
pub use backend::headless::HeadlessBackend;
pub use compiler::naga_glsl::NagaGlslCompiler;
pub use config::EngineConfig;
pub use document::EffectDocument;
pub use pipeline::{FrameInputs, Pipeline};
pub use player::EffectPlayer;
