// Engine module - the simulation core and its services
// Leaf-first: sphere math and world contract, then navigation, collision,
// steering and physics, then bots, coordinators and the frame loop.

pub mod bot;
pub mod components;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod hexsphere;
pub mod input;
pub mod navigation;
pub mod physics;
pub mod simulation;
pub mod spatial;
pub mod sphere;
pub mod steering;
pub mod systems;
pub mod world;

// Re-export commonly used items
pub use components::*;
pub use config::SimConfig;
pub use error::{SimError, SimResult};
pub use simulation::{AgentView, FrameReport, PlayerSnapshot, Simulation};
pub use sphere::SphericalPos;
pub use world::{ClusterId, Faction, SurfaceWorld, TerritoryState, TileId};
