//! Inference module
//!
//! - `window`: window origins and clipping for a scene
//! - `sliding`: zero-pad, predict, crop and average over the whole scene
//! - `scorer`: pixel threshold and scene-level anomaly score
//! - `handle`: a model loaded once and shared by every request

pub mod handle;
pub mod scorer;
pub mod sliding;
pub mod window;

pub use handle::{FullPredictionResponse, HealthResponse, ModelHandle};
pub use scorer::{ChangeScorer, ScenePredictionResponse, SceneStatus};
pub use sliding::{ChangeMap, SlidingWindowInferencer};
pub use window::{Window, WindowPlan};
