//! Zuma headless simulator
//!
//! Plays a level without a renderer: a shooter in the middle of the
//! playfield fires at the leading ball on a fixed cadence, and every level
//! event is logged. Useful for checking tuning files and seeds.

#[cfg(not(target_arch = "wasm32"))]
use std::path::PathBuf;
#[cfg(not(target_arch = "wasm32"))]
use std::sync::Arc;

#[cfg(not(target_arch = "wasm32"))]
use clap::Parser;
#[cfg(not(target_arch = "wasm32"))]
use glam::Vec2;

#[cfg(not(target_arch = "wasm32"))]
use zuma_core::consts::{PATH_STEP, SIM_DT};
#[cfg(not(target_arch = "wasm32"))]
use zuma_core::sim::{ChainEvent, ControlPoint, Level, LevelEvent, LevelStatus, Path};
#[cfg(not(target_arch = "wasm32"))]
use zuma_core::Tuning;

#[cfg(not(target_arch = "wasm32"))]
#[derive(Debug, Parser)]
#[command(name = "zuma-sim", version, about = "Run a Zuma level headless")]
struct Args {
    /// RNG seed for ball generation and tools
    #[arg(long, default_value_t = 1)]
    seed: u64,

    /// Number of simulation ticks to run
    #[arg(long, default_value_t = 3600)]
    ticks: u32,

    /// JSON tuning file (defaults are used when omitted)
    #[arg(long)]
    tuning: Option<PathBuf>,

    /// Fire a shot every N ticks
    #[arg(long, default_value_t = 30)]
    fire_every: u32,
}

/// Spiral-ish demo track with one stretch running under terrain
#[cfg(not(target_arch = "wasm32"))]
fn demo_path() -> Vec<ControlPoint> {
    vec![
        ControlPoint::new(Vec2::new(40.0, 400.0)),
        ControlPoint::new(Vec2::new(200.0, 420.0)),
        ControlPoint::new(Vec2::new(420.0, 380.0)),
        ControlPoint::masked(Vec2::new(560.0, 260.0)),
        ControlPoint::new(Vec2::new(460.0, 140.0)),
        ControlPoint::new(Vec2::new(240.0, 120.0)),
        ControlPoint::new(Vec2::new(120.0, 200.0)),
        ControlPoint::new(Vec2::new(300.0, 260.0)),
    ]
}

#[cfg(not(target_arch = "wasm32"))]
fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let tuning = match &args.tuning {
        Some(path) => Tuning::load(path)?,
        None => Tuning::default(),
    };
    let shooter = Vec2::new(tuning.playfield_width, tuning.playfield_height) / 2.0;

    let path = Arc::new(Path::build(&demo_path(), PATH_STEP)?);
    log::info!("Zuma sim starting: seed {}, path length {:.0}", args.seed, path.length());

    let mut level = Level::new(vec![path], tuning, args.seed);
    level.restart();

    let fire_every = args.fire_every.max(1);
    let mut shots = 0u32;
    let mut combos = 0u32;

    for tick in 0..args.ticks {
        if tick % fire_every == 0 {
            if let Some(target) = level.chains().iter().find_map(|c| c.last()) {
                // Fire the aimed ball's color so shots actually make runs
                let dir = target.pos - shooter;
                let color = level
                    .aim(shooter, dir)
                    .and_then(|hit| level.chain(hit.chain).ball(hit.id))
                    .map(|b| b.color);
                if let Some(color) = color.or_else(|| level.random_usable_color()) {
                    level.fire(shooter, dir, color);
                    shots += 1;
                }
            }
        }

        for event in level.tick(SIM_DT) {
            match &event {
                LevelEvent::Chain {
                    event: ChainEvent::Combo(info),
                    ..
                } => {
                    combos += 1;
                    log::info!("Combo: {} {:?} balls", info.ball_count, info.color);
                }
                LevelEvent::ScoreAdded { points, sequence } => {
                    log::info!("+{} points (sequence {})", points, sequence);
                }
                LevelEvent::ToolAssigned { tool, .. } => log::info!("Tool spawned: {:?}", tool),
                _ => log::debug!("{:?}", event),
            }
        }

        if level.status() != LevelStatus::Playing {
            break;
        }
    }

    println!("status:    {:?}", level.status());
    println!("time:      {:.2}s", level.time());
    println!("score:     {}", level.score());
    println!("shots:     {}", shots);
    println!("combos:    {}", combos);
    println!("destroyed: {}", level.destroyed_count());
    println!("remaining: {}", level.total_balls());
    Ok(())
}

#[cfg(target_arch = "wasm32")]
fn main() {
    // Headless simulator is native only
}
