use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::Result;
use crossbeam_channel::{Receiver, RecvTimeoutError, unbounded};
use nalgebra::Vector3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{info, warn};

use aerial_dense::densifier::DensifierSettings;
use aerial_dense::frame::image::Rgba;
use aerial_dense::frame::{CameraId, Frame, FrameId, PinholeCamera, RgbaImage, SurfaceAssumption};
use aerial_dense::geometry::{Plane, SE3};
use aerial_dense::io::DiskExporter;
use aerial_dense::ortho::{LAYER_VALID, surface_from_points};
use aerial_dense::stage::{
    ChannelSink, DensificationStage, RectificationSettings, RectificationStage, Stage, StageSettings,
};
use aerial_dense::system::{StageOutput, StageRunner};

const N_FRAMES_PER_UAV: u64 = 12;
const ALTITUDE: f64 = 80.0;
const IMAGE_WIDTH: u32 = 320;
const IMAGE_HEIGHT: u32 = 240;
const FOCAL: f64 = 300.0;
/// Distance between consecutive exposures along a flight line, meters.
const FRAME_SPACING: f64 = 8.0;
/// Surface resolution, meters per cell.
const GSD: f64 = 0.5;
/// How long to wait for more output once the producer is done.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let stage_settings = match args.next() {
        Some(path) => StageSettings::from_yaml_file(&path)?,
        None => StageSettings::default(),
    };
    let densifier_settings = match args.next() {
        Some(path) => DensifierSettings::from_yaml_file(&path)?,
        None => DensifierSettings::default(),
    };

    // Densification: frames -> depth maps
    let (dense_tx, dense_rx) = unbounded();
    let rate_hz = stage_settings.rate_hz;
    let save = stage_settings.save.any();
    let mut densification = DensificationStage::new(
        stage_settings,
        &densifier_settings,
        Box::new(ChannelSink::new(dense_tx)),
    )?;
    if save {
        densification = densification.with_save_sink(Box::new(DiskExporter::new()));
        densification.init_stage_callback(Path::new("output"))?;
    }
    let mut densification = StageRunner::spawn(Box::new(densification), rate_hz)?;

    // Rectification: frames with surface -> orthophotos
    let (ortho_tx, ortho_rx) = unbounded();
    let rect_settings = RectificationSettings::default();
    let rect_rate = rect_settings.rate_hz;
    let rectification = RectificationStage::new(rect_settings, Box::new(ChannelSink::new(ortho_tx)))?;
    let mut rectification = StageRunner::spawn(Box::new(rectification), rect_rate)?;

    // Two UAVs on parallel flight lines, exposures interleaved.
    let mut rng = StdRng::seed_from_u64(42);
    let t_start = Instant::now();
    for i in 0..N_FRAMES_PER_UAV {
        for (uav, line_y) in [(0u32, 0.0), (1u32, 40.0)] {
            let frame = simulate_frame(&mut rng, uav, i, line_y)?;
            densification.add_frame(frame);
        }
    }
    info!(
        "Simulated {} frames in {} ms",
        2 * N_FRAMES_PER_UAV,
        t_start.elapsed().as_millis()
    );

    let n_dense = forward_dense_outputs(&dense_rx, &rectification)?;
    let n_ortho = report_orthophotos(&ortho_rx);

    densification.shutdown();
    rectification.shutdown();
    info!(
        "Done: {} depth maps, {} orthophotos ({} densification cycles)",
        n_dense,
        n_ortho,
        densification.state().busy_cycles()
    );
    Ok(())
}

/// Ground texture: checkerboard over a smooth color gradient.
fn ground_color(x: f64, y: f64) -> Rgba<u8> {
    let checker = ((x / 5.0).floor() as i64 + (y / 5.0).floor() as i64).rem_euclid(2) == 0;
    let r = (128.0 + 100.0 * (x / 60.0).sin()) as u8;
    let g = (128.0 + 100.0 * (y / 45.0).cos()) as u8;
    let b = if checker { 200 } else { 60 };
    Rgba([r, g, b, 255])
}

/// Render a nadir view of the textured ground plane and sample sparse points from it.
fn simulate_frame(rng: &mut StdRng, uav: u32, index: u64, line_y: f64) -> Result<Frame> {
    let center = Vector3::new(
        index as f64 * FRAME_SPACING + rng.gen_range(-0.5..0.5),
        line_y + rng.gen_range(-0.5..0.5),
        ALTITUDE + rng.gen_range(-1.0..1.0),
    );
    let camera = PinholeCamera::new(
        FOCAL,
        FOCAL,
        IMAGE_WIDTH as f64 / 2.0,
        IMAGE_HEIGHT as f64 / 2.0,
        IMAGE_WIDTH,
        IMAGE_HEIGHT,
        SE3::nadir(center),
    )?;

    let ground = Plane::horizontal(0.0);
    let image = RgbaImage::from_fn(IMAGE_WIDTH, IMAGE_HEIGHT, |u, v| {
        let ray = camera.pixel_ray(u as f64, v as f64);
        match ground.intersect_ray(&center, &ray) {
            Some(hit) => ground_color(hit.x, hit.y),
            None => Rgba([0, 0, 0, 255]),
        }
    });

    let sparse_points = (0..150)
        .filter_map(|_| {
            let u = rng.gen_range(0.0..IMAGE_WIDTH as f64);
            let v = rng.gen_range(0.0..IMAGE_HEIGHT as f64);
            let ray = camera.pixel_ray(u, v);
            let hit = ground.intersect_ray(&center, &ray)?;
            Some(hit + Vector3::new(0.0, 0.0, rng.gen_range(-0.2..0.2)))
        })
        .collect();

    let id = FrameId(uav as u64 * 1000 + index);
    let timestamp_ns = (index + 1) * 100_000_000;
    Ok(Frame::new(id, CameraId(uav), timestamp_ns, image, camera)?.with_sparse_points(sparse_points))
}

/// Turn every published depth map into a surface and hand the frame to rectification.
fn forward_dense_outputs(dense_rx: &Receiver<StageOutput>, rectification: &StageRunner) -> Result<usize> {
    let mut n_dense = 0;
    loop {
        match dense_rx.recv_timeout(DRAIN_TIMEOUT) {
            Ok(StageOutput::Dense(output)) => {
                let mut frame = output.frame;
                let Some(depthmap) = frame.depthmap.as_ref() else {
                    continue;
                };
                n_dense += 1;
                info!(
                    "Depth map for {} ({}): {:.1}% valid, median {:.2} m",
                    frame.id,
                    frame.camera_id,
                    depthmap.coverage() * 100.0,
                    depthmap.median_depth().unwrap_or(f32::NAN)
                );
                let surface = surface_from_points(&depthmap.to_world_points(), GSD)?;
                frame = frame.with_surface(surface, SurfaceAssumption::Elevation);
                rectification.add_frame(frame);
            }
            Ok(other) => {
                info!("Frame {} passed through without depth", other.frame().id);
            }
            Err(RecvTimeoutError::Timeout) => break,
            Err(RecvTimeoutError::Disconnected) => {
                warn!("Densification output channel closed");
                break;
            }
        }
    }
    Ok(n_dense)
}

fn report_orthophotos(ortho_rx: &Receiver<StageOutput>) -> usize {
    let mut n_ortho = 0;
    while let Ok(output) = ortho_rx.recv_timeout(DRAIN_TIMEOUT) {
        if let StageOutput::Ortho { frame, grid } = output {
            n_ortho += 1;
            let (rows, cols) = grid.size();
            let valid = grid
                .mask(LAYER_VALID)
                .map(|m| m.iter().filter(|&&v| v).count())
                .unwrap_or(0);
            info!(
                "Orthophoto for {}: {}x{} cells at {} m, {} valid",
                frame.id,
                rows,
                cols,
                grid.resolution(),
                valid
            );
        }
    }
    n_ortho
}
