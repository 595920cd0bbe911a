//! Info command - show device capabilities and configuration

use anyhow::Result;
use camcast_core::device::PIX_FMT_H264;

use super::{open_capture, ConfigSource};

/// Show device capabilities and the effective configuration
pub async fn info(source: &ConfigSource) -> Result<()> {
    let config = source.load()?;

    println!("camcast - Device Information\n");

    println!("Configuration:");
    println!("  File:        {}", source.path().display());
    println!("  Device:      {}", config.device.display());
    println!("  Resolution:  {}x{}", config.width, config.height);
    println!(
        "  Frame rate:  {} ({} fps)",
        config.frame_interval,
        config.fps()
    );
    println!("  Bitrate:     {} kbps", config.bitrate / 1000);
    println!("  GOP size:    {} frames", config.gop_size);
    println!("  Profile:     {}", config.profile);
    println!("  Rotation:    {} degrees", config.rotation);
    println!("  Buffers:     {}", config.buffer_count);

    println!();

    let (capture, report) = match open_capture(config) {
        Ok(opened) => opened,
        Err(e) => {
            println!("Device: not available");
            println!("  {}", e);
            if let Some(hint) = e
                .downcast_ref::<camcast_core::CaptureError>()
                .and_then(|e| e.user_hint())
            {
                println!("  Hint: {}", hint);
            }
            return Ok(());
        }
    };

    let caps = &report.capability;
    println!("Device:");
    println!("  Driver:      {} {}", caps.driver, caps.version_string());
    println!("  Card:        {}", caps.card);
    println!("  Bus:         {}", caps.bus_info);
    println!(
        "  Capture:     {}",
        if caps.is_video_capture() { "yes" } else { "no" }
    );
    println!(
        "  Streaming:   {}",
        if caps.has_streaming() { "yes" } else { "no" }
    );

    println!();

    let format = &report.format;
    println!("Applied format:");
    println!("  Resolution:  {}x{}", format.width, format.height);
    println!(
        "  Pixel fmt:   {}",
        if format.fourcc == PIX_FMT_H264 {
            "H264"
        } else {
            "other"
        }
    );
    println!("  Max frame:   {} bytes", format.size_image);
    println!("  Buffers:     {} granted", report.buffers);

    if !report.warnings.is_empty() {
        println!();
        println!("Controls not applied:");
        for warning in &report.warnings {
            println!("  - {}", warning);
        }
    }

    drop(capture);
    Ok(())
}
