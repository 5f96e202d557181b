// Headless demo: three factions of bots fight over a generated sphere.
// Usage: hexfront [bots-per-faction] [seconds] [seed]
// Run with RUST_LOG=info (or debug/trace) to watch the simulation.

use rand::SeedableRng;
use rand::rngs::StdRng;
use std::process::ExitCode;

use hexfront::engine::hexsphere::{HexSphere, HexSphereParams};
use hexfront::{AiState, ClusterId, Faction, SimConfig, SimResult, Simulation, SurfaceWorld};

const FRAME_DT: f32 = 1.0 / 60.0;
/// Capture tics a capturing bot contributes per second.
const CAPTURE_RATE: f32 = 4.0;

fn arg_or<T: std::str::FromStr>(args: &[String], index: usize, default: T) -> T {
    args.get(index).and_then(|a| a.parse().ok()).unwrap_or(default)
}

fn run(per_faction: usize, seconds: f32, seed: u64) -> SimResult<()> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut surface = HexSphere::generate(HexSphereParams::default(), &mut rng)?;
    let mut sim = Simulation::new(&surface, SimConfig::default(), seed)?;
    sim.populate(per_faction);

    let frames = (seconds / FRAME_DT).ceil() as u64;
    let mut capture_budget = [0.0f32; 3];
    let mut collisions = 0usize;
    let mut assignments = 0usize;
    let mut abandoned = 0usize;
    let mut last_report = std::time::Instant::now();

    for frame in 0..frames {
        let report = sim.step(&surface, FRAME_DT);
        collisions += report.collisions.len();
        assignments += report.assignments;
        abandoned += report.abandoned.len();

        // Stand-in for the territory collaborator: capturing bots accrue tics.
        for view in sim.render_views() {
            if view.is_dead || view.ai_state != Some(AiState::Capturing) {
                continue;
            }
            let objective = sim.brain(view.id).and_then(|b| b.objective);
            let (Some(faction), Some(objective)) = (view.faction, objective) else {
                continue;
            };
            let budget = &mut capture_budget[faction.index()];
            *budget += CAPTURE_RATE * FRAME_DT;
            if *budget >= 1.0 {
                surface.accrue_capture(objective.cluster, faction, *budget as u32);
                *budget = budget.fract();
            }
        }

        if (frame + 1) % 60 == 0 {
            let views = sim.render_views();
            let mut states = [0usize; 4];
            for v in &views {
                if let Some(s) = v.ai_state {
                    states[s.index()] += 1;
                }
            }
            let owned: Vec<usize> = Faction::ALL
                .iter()
                .map(|f| {
                    (0..surface.cluster_count())
                        .filter(|c| surface.territory(ClusterId(*c as u32)).owner == Some(*f))
                        .count()
                })
                .collect();
            log::info!(
                "t={:>5.1}s | idle {} moving {} capturing {} wandering {} | zones rust {} cobalt {} viridian {} | {:.1} ms/s",
                (frame + 1) as f32 * FRAME_DT,
                states[0],
                states[1],
                states[2],
                states[3],
                owned[0],
                owned[1],
                owned[2],
                last_report.elapsed().as_secs_f32() * 1000.0
            );
            last_report = std::time::Instant::now();
        }
    }

    log::info!(
        "done: {} frames, {} assignments, {} abandoned objectives, {} collision events",
        frames,
        assignments,
        abandoned,
        collisions
    );
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();
    let per_faction = arg_or(&args, 1, 30usize);
    let seconds = arg_or(&args, 2, 30.0f32);
    let seed = arg_or(&args, 3, 7u64);

    match run(per_faction, seconds, seed) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("simulation failed: {e}");
            ExitCode::FAILURE
        }
    }
}
