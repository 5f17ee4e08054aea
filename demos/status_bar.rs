use std::time::Duration;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    time::interval,
};
use tracing::{error, info, warn};
use ftms_treadmill::{BtleplugTransport, PollLoop, Result, SessionConfig, TreadmillSession};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    info!("🏃 FTMS status bar v{}", ftms_treadmill::VERSION);
    info!("Keys: p = pause/resume, + = faster, - = slower, s = stop, q = quit");

    let transport = match BtleplugTransport::new().await {
        Ok(transport) => transport,
        Err(e) => {
            error!("❌ No Bluetooth adapter: {}", e);
            return Err(e);
        }
    };

    let (session, controller) = TreadmillSession::new(transport, SessionConfig::default());
    let poll = PollLoop::new(session).spawn();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut refresh = interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            _ = refresh.tick() => {
                let status = controller.status().await;
                println!("[#{}] {}", status.color.hex(), status.text);
            }
            line = lines.next_line() => {
                let Ok(Some(line)) = line else { break };
                match line.trim() {
                    "p" => match controller.toggle_pause().await {
                        Some(command) => info!("➡️  {}", command),
                        None => warn!("No reading yet, nothing to toggle"),
                    },
                    "+" => {
                        if controller.speed_up().await.is_none() {
                            warn!("No reading yet, cannot change speed");
                        }
                    }
                    "-" => {
                        if controller.speed_down().await.is_none() {
                            warn!("No reading yet, cannot change speed");
                        }
                    }
                    "s" => info!("🛑 {}", controller.stop().await),
                    "q" => break,
                    other => warn!("Unknown key '{}'", other),
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    info!("Shutting down...");
    controller.shutdown().await;

    match poll.await {
        Ok(result) => result?,
        Err(e) => error!("❌ Poll loop panicked: {}", e),
    }

    info!("👋 Disconnected");
    Ok(())
}
