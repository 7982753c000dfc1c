use std::sync::Arc;
use std::time::Instant;

use risa_core::{ConfigReader, Result, ScanGeometry};
use risa_device::{DeviceRegistry, Image, MemoryPool};
use risa_pipeline::{DeviceFanout, Pipeline, Routing, SourceStage};
use risa_recon::{
    Attenuation, Backprojection, CalibrationAverages, DetectorInterpolation, DeviceToHost,
    Filter, HostToDevice, Masking, OfflineSaver, Reordering,
};

/// Build the full reconstruction chain behind `source`, run it and wait
/// for the sentinel.
///
/// The chain is fixed:
/// source → h2d → reordering → attenuation → detectorinterpolation →
/// filter → backprojection → masking → d2h → saver.
pub fn run<S>(cfg: &ConfigReader, source: S, raw_pool: Arc<MemoryPool<u16>>) -> Result<()>
where
    S: SourceStage<Output = Image<u16>>,
{
    let started = Instant::now();
    let geometry = ScanGeometry::from_config(cfg)?;
    let registry = DeviceRegistry::probe(cfg)?;
    let queue_limit: usize = cfg.get_or("queue_limit", 0)?;
    let pixels: usize = cfg.get("number_of_pixels")?;

    let float_pool = MemoryPool::<f32>::new();
    let averages = Arc::new(CalibrationAverages::load(cfg, &geometry)?);

    let h2d = DeviceFanout::new(
        HostToDevice::new(cfg, &registry, Arc::clone(&raw_pool), geometry.sinogram_elements())?,
        &registry,
        Routing::RoundRobin,
        queue_limit,
    )?;
    let reordering = DeviceFanout::new(
        Reordering::new(cfg, &registry, Arc::clone(&raw_pool))?,
        &registry,
        Routing::ByDevice,
        queue_limit,
    )?;
    let attenuation = DeviceFanout::new(
        Attenuation::new(cfg, &registry, Arc::clone(&float_pool), Arc::clone(&averages))?,
        &registry,
        Routing::ByDevice,
        queue_limit,
    )?;
    let interpolation = DeviceFanout::new(
        DetectorInterpolation::new(cfg, &registry, Arc::clone(&float_pool), &averages)?,
        &registry,
        Routing::ByDevice,
        queue_limit,
    )?;
    let filter = DeviceFanout::new(
        Filter::new(cfg, &registry, Arc::clone(&float_pool))?,
        &registry,
        Routing::ByDevice,
        queue_limit,
    )?;
    let backprojection = DeviceFanout::new(
        Backprojection::new(cfg, &registry, Arc::clone(&float_pool))?,
        &registry,
        Routing::ByDevice,
        queue_limit,
    )?;
    let masking = DeviceFanout::new(Masking::new(cfg)?, &registry, Routing::ByDevice, queue_limit)?;
    let d2h = DeviceFanout::new(
        DeviceToHost::new(cfg, Arc::clone(&float_pool), pixels * pixels)?,
        &registry,
        Routing::ByDevice,
        queue_limit,
    )?;

    let saver = OfflineSaver::new(cfg)?;
    let stats = saver.stats();

    let mut pipeline = Pipeline::new();
    let source_out = pipeline.add_source("source", source);
    let (h2d_in, h2d_out) = pipeline.add_stage("h2d", h2d, queue_limit);
    let (reorder_in, reorder_out) = pipeline.add_stage("reordering", reordering, queue_limit);
    let (att_in, att_out) = pipeline.add_stage("attenuation", attenuation, queue_limit);
    let (int_in, int_out) = pipeline.add_stage("interpolation", interpolation, queue_limit);
    let (filter_in, filter_out) = pipeline.add_stage("filter", filter, queue_limit);
    let (bp_in, bp_out) = pipeline.add_stage("backprojection", backprojection, queue_limit);
    let (mask_in, mask_out) = pipeline.add_stage("masking", masking, queue_limit);
    let (d2h_in, d2h_out) = pipeline.add_stage("d2h", d2h, queue_limit);
    let sink_in = pipeline.add_sink("saver", saver);

    pipeline.connect(&source_out, &h2d_in);
    pipeline.connect(&h2d_out, &reorder_in);
    pipeline.connect(&reorder_out, &att_in);
    pipeline.connect(&att_out, &int_in);
    pipeline.connect(&int_out, &filter_in);
    pipeline.connect(&filter_out, &bp_in);
    pipeline.connect(&bp_out, &mask_in);
    pipeline.connect(&mask_out, &d2h_in);
    pipeline.connect(&d2h_out, &sink_in);

    pipeline.start()?;
    tracing::info!("initialisation finished");
    pipeline.wait()?;

    tracing::info!(
        frames = stats.frames(),
        highest_index = stats.highest_index(),
        wall_s = started.elapsed().as_secs_f64(),
        "run complete"
    );
    Ok(())
}
