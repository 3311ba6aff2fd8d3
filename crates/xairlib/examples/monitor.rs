//! Monitor fleet membership and meter traffic.
//!
//! Runs a fleet manager for 60 seconds. Every mixer that joins gets meter
//! stream 2 (inputs) enabled, and its frames are summarised as they
//! arrive. Membership changes are printed as they happen.
//!
//! # Usage
//!
//! ```sh
//! cargo run -p xairlib --example monitor
//! ```

use std::collections::HashMap;
use std::time::Duration;

use xairlib::{DeviceIdentity, FleetManagerBuilder, OscArg, Subscription};

/// Meter stream with one level per input channel.
const INPUT_METERS: u32 = 2;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (fleet, handle) = FleetManagerBuilder::new()
        .broadcast_period(Duration::from_secs(5))
        .spawn()
        .await?;
    let mut changes = fleet.subscribe().await?;

    println!("Watching for mixers for 60 seconds...\n");

    let mut frames: HashMap<DeviceIdentity, Subscription<xairlib::OscMessage>> = HashMap::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(60);
    let mut poll = tokio::time::interval(Duration::from_millis(500));

    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => break,

            members = changes.recv() => {
                let Some(members) = members else { break };
                frames.retain(|identity, _| members.contains(identity));

                println!("Fleet now has {} mixer(s):", members.len());
                for identity in &members {
                    println!("  {}", identity);
                    if frames.contains_key(identity) {
                        continue;
                    }
                    let client = fleet.get_client(identity).await?;
                    client.enable_meter(INPUT_METERS, None)?;
                    frames.insert(identity.clone(), client.subscribe(true).await?);
                }
                println!();
            }

            _ = poll.tick() => {
                for (identity, sub) in frames.iter_mut() {
                    let mut latest = None;
                    while let Some(message) = sub.try_recv() {
                        if xairlib::osc::meters::is_meter_address(&message.address) {
                            latest = Some(message);
                        }
                    }
                    if let Some(frame) = latest {
                        let peak = frame.args.iter().filter_map(OscArg::as_int).max().unwrap_or(i32::MIN);
                        println!(
                            "{:<24} {} samples, peak {:.1} dB",
                            identity.name,
                            frame.args.len(),
                            peak as f64 / 256.0
                        );
                    }
                }
            }
        }
    }

    drop(frames);
    handle.shutdown().await;
    println!("Done.");
    Ok(())
}
