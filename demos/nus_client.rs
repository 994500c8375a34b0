//! Connect to the first Nordic UART Service peripheral in range and print
//! what it sends.
//!
//! Run with: cargo run --example nus_client

use nus_central::{CentralClient, ClientConfig, HostRadio, LogIndicator, Result};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("nus_central=debug".parse().unwrap()),
        )
        .init();

    let config = ClientConfig::default();
    println!("Looking for service {}...", config.target_service);
    println!("Press Ctrl+C to stop.\n");

    let (radio, events, driver) = HostRadio::open(&config).await?;
    let driver = tokio::spawn(driver.run());

    let client = CentralClient::new(config, radio, LogIndicator::new())?;
    let handle = client.handle();
    let mut notifications = client.subscribe_notifications();
    let mut phases = client.subscribe_phases();
    let client = tokio::spawn(client.run(events));

    loop {
        tokio::select! {
            Ok(notification) = notifications.recv() => {
                let at = notification.received_at.format("%H:%M:%S");
                match notification.payload.as_text() {
                    Some(text) => println!("[{}] {}", at, text),
                    None => println!("[{}] {} (not UTF-8)", at, notification.payload),
                }
            }
            Ok(change) = phases.recv() => {
                println!("{} -> {}", change.from, change.to);
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\nShutting down...");
                break;
            }
        }
    }

    handle.shutdown()?;
    let machine = client.await.expect("client task panicked");
    println!("Stopped in phase {}", machine.phase());

    // Dropping the radio closes the command queue and lets the driver finish.
    drop(machine);
    driver.await.expect("driver task panicked")?;

    Ok(())
}
