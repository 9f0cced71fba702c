pub mod turn;

pub use turn::{PipelineConfig, PipelineEvent, TurnPipeline, TurnState};
