use anyhow::{anyhow, Context, Result};

use cpal::traits::*;
use cpal::SampleFormat;

use crate::engine::Renderer;

/// Opens the default output device and returns it with a config at the highest
/// supported sample rate.
pub fn default_output() -> Result<(cpal::Device, cpal::StreamConfig, SampleFormat)> {
    let host = cpal::default_host();

    let device = host
        .default_output_device()
        .ok_or_else(|| anyhow!("no output device available"))?;

    let mut supported_configs_range = device
        .supported_output_configs()
        .context("error while querying configs")?;

    let supported_config = supported_configs_range
        .next()
        .ok_or_else(|| anyhow!("no supported output config"))?
        .with_max_sample_rate();

    let sample_format = supported_config.sample_format();
    Ok((device, supported_config.into(), sample_format))
}

pub fn start(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: SampleFormat,
    renderer: Renderer,
) -> Result<cpal::Stream> {
    match sample_format {
        SampleFormat::F32 => run::<f32>(device, config, renderer),
        SampleFormat::I16 => run::<i16>(device, config, renderer),
        SampleFormat::U16 => run::<u16>(device, config, renderer),
    }
}

fn run<T>(device: &cpal::Device, config: &cpal::StreamConfig, mut renderer: Renderer) -> Result<cpal::Stream>
where
    T: cpal::Sample,
{
    let channels = config.channels as usize;
    if channels == 0 || channels > 2 {
        return Err(anyhow!("can't output to {} channels", channels));
    }
    let err_fn = |err| log::error!("an error occurred on stream: {}", err);

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            renderer.pump_commands();

            for frame in data.chunks_mut(channels) {
                let (l, r) = renderer.step_frame();
                if channels == 1 {
                    frame[0] = cpal::Sample::from(&((l + r) / 2.0));
                } else {
                    frame[0] = cpal::Sample::from(&l);
                    frame[1] = cpal::Sample::from(&r);
                }
            }
        },
        err_fn,
    )?;
    stream.play()?;

    log::info!(
        "audio running at {} Hz, {} channel(s)",
        config.sample_rate.0,
        channels
    );
    Ok(stream)
}
