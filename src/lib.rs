// Multi-agent bot simulation on a hex-tiled sphere: navigation, faction
// strategy, steering and collision for many agents at interactive rates.

pub mod engine;

pub use engine::*;
