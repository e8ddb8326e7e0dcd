use plotters::prelude::*;
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};

use crate::control_system::topology::SegmentRole;
use crate::shared_data::{Approach, LightState};

const IMAGE_SIZE: i32 = 600;
const CENTER: i32 = IMAGE_SIZE / 2;
const JUNCTION_HALF: i32 = 30;
const ROAD_HALF: i32 = 20;

#[derive(Debug, Clone)]
pub struct SceneVehicle {
    pub approach: Option<Approach>,
    pub role: SegmentRole,
    /// Meters from the junction edge, along the vehicle's segment.
    pub offset_m: f64,
    pub is_priority: bool,
}

#[derive(Debug, Clone)]
pub struct SceneSignal {
    pub approach: Approach,
    pub state: LightState,
}

/// Everything needed to draw one frame of the junction.
#[derive(Debug, Clone)]
pub struct Scene {
    pub step: u64,
    pub time_s: f64,
    pub label: String,
    pub max_length_m: f64,
    pub signals: Vec<SceneSignal>,
    pub vehicles: Vec<SceneVehicle>,
}

/// Writes a PNG snapshot of the junction every `every_steps` steps.
#[derive(Debug, Clone)]
pub struct FrameRecorder {
    dir: PathBuf,
    every_steps: u64,
}

impl FrameRecorder {
    pub fn new(dir: &Path, every_steps: u64) -> std::io::Result<Self> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            every_steps: every_steps.max(1),
        })
    }

    pub fn should_render(&self, step: u64) -> bool {
        step % self.every_steps == 0
    }

    pub fn render(&self, scene: &Scene) -> Result<PathBuf, Box<dyn Error>> {
        let path = self.dir.join(format!("frame_{:06}.png", scene.step));
        let backend = BitMapBackend::new(&path, (IMAGE_SIZE as u32, IMAGE_SIZE as u32));
        let root = backend.into_drawing_area();
        root.fill(&WHITE)?;

        let asphalt = RGBColor(90, 90, 90);
        root.draw(&Rectangle::new(
            [(CENTER - ROAD_HALF, 0), (CENTER + ROAD_HALF, IMAGE_SIZE)],
            asphalt.filled(),
        ))?;
        root.draw(&Rectangle::new(
            [(0, CENTER - ROAD_HALF), (IMAGE_SIZE, CENTER + ROAD_HALF)],
            asphalt.filled(),
        ))?;
        root.draw(&Rectangle::new(
            [
                (CENTER - JUNCTION_HALF, CENTER - JUNCTION_HALF),
                (CENTER + JUNCTION_HALF, CENTER + JUNCTION_HALF),
            ],
            RGBColor(60, 60, 60).filled(),
        ))?;

        for signal in &scene.signals {
            let color = match signal.state {
                LightState::Green => GREEN,
                LightState::Yellow => YELLOW,
                LightState::Red => RED,
            };
            root.draw(&Circle::new(signal_position(signal.approach), 7, color.filled()))?;
        }

        let scale = (CENTER - JUNCTION_HALF - 10) as f64 / scene.max_length_m.max(1.0);
        for vehicle in &scene.vehicles {
            let Some(point) = vehicle_position(vehicle, scale) else {
                continue;
            };
            let color = if vehicle.is_priority { RED } else { CYAN };
            let radius = if vehicle.is_priority { 6 } else { 4 };
            root.draw(&Circle::new(point, radius, color.filled()))?;
        }

        root.draw(&Text::new(
            scene.label.clone(),
            (10, 10),
            ("sans-serif", 16).into_font(),
        ))?;
        root.present()?;
        drop(root);
        Ok(path)
    }
}

fn signal_position(approach: Approach) -> (i32, i32) {
    let d = JUNCTION_HALF + 8;
    let lane = ROAD_HALF / 2;
    match approach {
        Approach::North => (CENTER - lane, CENTER - d),
        Approach::South => (CENTER + lane, CENTER + d),
        Approach::East => (CENTER + d, CENTER - lane),
        Approach::West => (CENTER - d, CENTER + lane),
    }
}

/// Incoming traffic keeps to one side of the road, outgoing to the other.
fn vehicle_position(vehicle: &SceneVehicle, scale: f64) -> Option<(i32, i32)> {
    if vehicle.role == SegmentRole::Internal {
        return Some((CENTER, CENTER));
    }
    let approach = vehicle.approach?;
    let along = JUNCTION_HALF + (vehicle.offset_m * scale).round() as i32;
    let lane = match vehicle.role {
        SegmentRole::Incoming => ROAD_HALF / 2,
        _ => -ROAD_HALF / 2,
    };
    Some(match approach {
        Approach::North => (CENTER - lane, CENTER - along),
        Approach::South => (CENTER + lane, CENTER + along),
        Approach::East => (CENTER + along, CENTER - lane),
        Approach::West => (CENTER - along, CENTER + lane),
    })
}
