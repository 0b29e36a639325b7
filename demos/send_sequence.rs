// Publish a step-sequence document to a running rover
// Usage: cargo run --example send_sequence -- [--file maneuver.json] [--address 192.168.0.123]
use clap::Parser;
use serde_json::{Value, json};
use tracing::{info, warn};

use rover_maneuver_runtime::config::TOPIC_CMD_SEQUENCE;
use rover_maneuver_runtime::parser;

#[derive(Debug, Parser)]
struct Cli {
    /// JSON document to send (a short demo maneuver when omitted)
    #[arg(long)]
    file: Option<std::path::PathBuf>,

    /// Rover address added as `ip_destino`
    #[arg(long)]
    address: Option<String>,

    #[arg(long, default_value = TOPIC_CMD_SEQUENCE)]
    topic: String,

    /// Send even if the document does not validate locally
    #[arg(long)]
    force: bool,
}

fn demo_document() -> Value {
    json!({
        "Carro_1": {
            "Paso_1": {
                "Movimiento": {"distancia_mm": 200, "velocidad_mm_s": 50, "radio_mm": "inf"},
                "Brazo": {"angulo0_grados": 0, "angulo1_grados": 90, "angulo2_grados": 30, "t_ser": 1.5}
            },
            "Paso_2": {
                "Movimiento": {"distancia_mm": 100, "velocidad_mm_s": 50, "radio_mm": -90}
            },
            "Paso_3": {
                "Movimiento": {"distancia_mm": -150, "velocidad_mm_s": 50, "radio_mm": 45,
                               "vel_grados_s": 45}
            }
        }
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_env_filter("info").init();
    let cli = Cli::parse();

    let mut document = match &cli.file {
        Some(path) => serde_json::from_slice(&std::fs::read(path)?)?,
        None => demo_document(),
    };
    if let (Some(address), Some(root)) = (&cli.address, document.as_object_mut()) {
        root.insert("ip_destino".to_string(), json!(address));
    }

    match parser::parse(&document) {
        Ok(commands) => {
            for cmd in &commands {
                info!(
                    "{}: {:?} {:?} {} ({:.1}s), turn {:?} {}°",
                    cmd.label(),
                    cmd.kind,
                    cmd.direction,
                    cmd.distance_abs,
                    cmd.straight_duration_s(),
                    cmd.turn_direction,
                    cmd.turn_angle_abs
                );
            }
        }
        Err(e) if cli.force => warn!("Sending invalid document anyway: {}", e),
        Err(e) => return Err(e.into()),
    }

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;
    let publisher = session.declare_publisher(cli.topic.clone()).await?;

    publisher.put(document.to_string()).await?;
    info!("Sent document to {}", cli.topic);

    session.close().await?;
    Ok(())
}
