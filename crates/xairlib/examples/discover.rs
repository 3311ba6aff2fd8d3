//! X-Air LAN discovery example.
//!
//! Broadcasts `/xinfo` once, lists every mixer that answers, then asks the
//! first one for its configured name.
//!
//! # Requirements
//!
//! - An X-Air or MR mixer on the same LAN
//! - UDP port 10024 reachable (not blocked by firewall)
//!
//! # Usage
//!
//! ```sh
//! cargo run -p xairlib --example discover
//! ```

use std::time::Duration;

use xairlib::{ClientOptions, DeviceSupervisor, discovery};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    println!("Searching for X-Air mixers on the LAN (2 seconds)...\n");

    let mixers = discovery::discover(Duration::from_secs(2)).await?;

    if mixers.is_empty() {
        println!("No mixers found on the network.");
        println!("\nTroubleshooting:");
        println!("  - Verify the mixer is powered on and connected to the LAN");
        println!("  - Check that UDP port 10024 is not blocked by a firewall");
        println!("  - Ensure your computer is on the same subnet as the mixer");
        return Ok(());
    }

    println!("Found {} mixer(s):\n", mixers.len());
    for (i, mixer) in mixers.iter().enumerate() {
        println!("  [{}] {} '{}'", i + 1, mixer.model, mixer.name);
        println!("      Address:  {}", mixer.socket_addr());
        println!("      Firmware: {}", mixer.version);
        println!();
    }

    let identity = mixers[0].clone();
    println!("Connecting to {}...", identity);
    let mut supervisor = DeviceSupervisor::start(identity, &ClientOptions::default()).await?;

    if let Some(mixer) = supervisor.client() {
        match mixer.get("/lr/config/name").await {
            Ok(reply) => println!("Main bus name: {}", reply),
            Err(e) => println!("Main bus name unavailable: {}", e),
        }
    }

    supervisor.cancel().await;
    println!("Done.");
    Ok(())
}
