use mercury2mqtt::{mqtt::{publish_uptime, MqttManager}, Config, MercuryManager};
use std::{env, time::Duration};
use log::{error, info};


#[tokio::main]
async fn main() -> std::io::Result<()> {
    // Initialize logging
    let default_filter =  std::env::var("M2M_LOG_LEVEL").unwrap_or("info".to_string());
    env_logger::init_from_env(env_logger::Env::new().default_filter_or(default_filter));

    let explicit = env::args().nth(1);
    let config = match Config::load(explicit.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            error!("{}", e);
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()));
        }
    };
    info!("Configured {} buses with {} meters", config.buses.len(), config.meter_count());

    // we need a channel for the meters to send metering data to the handler
    let (mut mqtt, tx) = MqttManager::new(&config.mqtt)?;
    let mut mqtt_thread = tokio::spawn(async move {
        mqtt.start_thread().await;
    });

    /* Periodic uptime publishing */
    let uptime_sender = tx.clone();
    let uptime_thread = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(10));
        loop {
            interval.tick().await;
            publish_uptime(&uptime_sender).await;
        }
    });

    let mut mercury = MercuryManager::new(tx, &config.buses);
    mercury.start().await;

    info!("All modules started, now waiting for a signal to exit");
    tokio::select! {
        r = tokio::signal::ctrl_c() => {
            if let Err(e) = r {
                error!("Cannot listen for the shutdown signal: {}", e);
            }
            info!("Shutting down");
        }
        _ = &mut mqtt_thread => {
            error!("MQTT handling stopped, shutting down");
        }
    }

    mercury.stop().await;
    uptime_thread.abort();
    drop(mercury);
    let _ = tokio::time::timeout(Duration::from_secs(2), mqtt_thread).await;
    Ok(())
}
