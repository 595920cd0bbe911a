//! Params command - extract SPS/PPS for session descriptions

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use camcast_core::{ParameterSets, StreamController};
use clap::Args;
use serde::Serialize;

use super::{open_capture, ConfigSource};

/// RTP payload type used in the printed fmtp line
const PAYLOAD_TYPE: u8 = 96;

/// Arguments for the params command
#[derive(Args)]
pub struct ParamsArgs {
    /// Print JSON instead of text
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct ParamsOutput {
    sps: String,
    pps: String,
    profile_level_id: Option<String>,
    sprop_parameter_sets: String,
    fmtp: String,
}

impl ParamsOutput {
    fn new(sets: &ParameterSets) -> Self {
        let sprop = format!("{},{}", STANDARD.encode(&sets.sps), STANDARD.encode(&sets.pps));
        let profile_level_id = sets.profile_level_id();

        let mut fmtp = format!("a=fmtp:{} packetization-mode=1", PAYLOAD_TYPE);
        if let Some(id) = &profile_level_id {
            fmtp.push_str(&format!(";profile-level-id={}", id));
        }
        fmtp.push_str(&format!(";sprop-parameter-sets={}", sprop));

        Self {
            sps: hex(&sets.sps),
            pps: hex(&sets.pps),
            profile_level_id,
            sprop_parameter_sets: sprop,
            fmtp,
        }
    }
}

fn hex(data: &[u8]) -> String {
    data.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Extract and print the encoder's parameter sets
pub async fn params(source: &ConfigSource, args: ParamsArgs) -> Result<()> {
    let config = source.load()?;

    let sets = tokio::task::spawn_blocking(move || -> Result<ParameterSets> {
        let (capture, _report) = open_capture(config)?;
        let mut controller = StreamController::new(capture);
        if let Some(sets) = controller.prepare()? {
            return Ok(sets);
        }
        Ok(controller.parameter_sets()?)
    })
    .await
    .context("Extraction task panicked")??;

    let output = ParamsOutput::new(&sets);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("SPS ({} bytes): {}", sets.sps.len(), output.sps);
    println!("PPS ({} bytes): {}", sets.pps.len(), output.pps);
    if let Some(id) = &output.profile_level_id {
        println!("profile-level-id: {}", id);
    }
    println!("sprop-parameter-sets: {}", output.sprop_parameter_sets);
    println!();
    println!("{}", output.fmtp);

    Ok(())
}
