use lazy_static::lazy_static;
use tokio::sync::RwLock;
use std::io::Error;
use crate::config::MqttConfig;
use crate::models::{DeviceProtocol, MeterStatus};
use crate::get_unix_ts;
use log::{debug, error, info};
use tokio::sync::mpsc::{Receiver, Sender};
use serde::{Serialize, Deserialize};
use serde_json;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::time::{Duration, Instant};
use uuid::Uuid;


#[derive(Clone)]
pub struct AppStatus {
    pub start_time: Instant,
}

impl AppStatus {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

/// One poll cycle worth of readings of a single meter
#[derive(Serialize, Deserialize)]
pub struct MeteringData {
    pub id: String,
    pub meter_name: String,
    pub protocol: DeviceProtocol,
    pub transmission_time: u64,
    pub metered_time: u64,
    pub metered_values: serde_json::Map<String, serde_json::Value>
}

impl MeteringData {
    pub fn new(protocol: DeviceProtocol, meter_name: &str) -> Self {
        let now = get_unix_ts();
        return MeteringData {
            id: Uuid::new_v4().to_string(),
            meter_name: meter_name.to_string(),
            protocol,
            transmission_time: now,
            metered_time: now,
            metered_values: serde_json::Map::new()
        };
    }
}

pub struct PublishData {
    pub topic: String,
    pub payload: String,
    pub qos: u8,
    pub retain: bool,
}

pub enum Transmission {
    Metering(MeteringData),
    Status(MeterStatus),
    Publish(PublishData)
}

pub struct MqttManager {
    rx: Receiver<Transmission>,
    exit_thread: bool,
    client: AsyncClient,
    base_topic: String,
}

lazy_static! {
    pub static ref APP_STATUS: RwLock<AppStatus> = RwLock::new(AppStatus::new());
}

pub fn raw_topic(base: &str) -> String {
    format!("{}/raw", base)
}

pub fn device_topic(base: &str, protocol: &DeviceProtocol, meter_name: &str) -> String {
    format!("{}/devs/{}/{}", base, protocol.to_string(), meter_name)
}

pub fn status_topic(base: &str, meter_name: &str) -> String {
    format!("{}/{}/status", base, meter_name)
}

fn to_qos(qos: u8) -> QoS {
    match qos {
        0 => QoS::AtMostOnce,
        1 => QoS::AtLeastOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtMostOnce,
    }
}

impl MqttManager {
    pub fn new(config: &MqttConfig) -> Result<(Self, Sender<Transmission>), Error> {
        let (mtx,mrx) = tokio::sync::mpsc::channel(100);

        info!("MQTT connection to {}:{} starting up", config.host, config.port);
        let mut mqttoptions   = MqttOptions::new(config.client_name.clone(), config.host.clone(), config.port);
        mqttoptions.set_keep_alive(Duration::from_secs(5));
        if !config.user.is_empty() {
            mqttoptions.set_credentials(config.user.clone(), config.pass.clone());
        }

        let (client, mut eventloop) = AsyncClient::new(mqttoptions, 10);

        // The eventloop has to be polled for anything to leave the client
        tokio::spawn( async move {
            info!("MQTT Eventloop started");
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("Connected to the MQTT broker");
                    },
                    Ok(_) => {},
                    Err(e) => {
                        error!("Error in MQTT {:?}, reconnecting ", e);
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        return Ok((MqttManager {
            client: client,
            rx: mrx,
            exit_thread: false,
            base_topic: config.base_topic.clone(),
        }, mtx));
    }

    async fn publish(&self, topic: String, qos: QoS, retain: bool, payload: String) {
        match self.client.publish(topic.clone(), qos, retain, payload).await {
            Err(e) => { error!("Error publishing to {}: {}", topic, e); },
            Ok(_) => { debug!("Published {} successfully", topic); }
        }
    }

    pub async fn start_thread(&mut self) {

        // Handle all the incomming metering stuff
        while !self.exit_thread {
            let option = self.rx.recv().await;

            let transmission = match option {
                Some(t) => t,
                None => {
                    debug!("Reading returned none, we exit now");
                    self.exit_thread = true;
                    continue;
                }
            };

            match transmission {
                Transmission::Metering(data) => {
                                info!("Metering data received: {}", data.id);
                                match serde_json::to_string(&data) {
                                    Ok(payload) => self.publish(raw_topic(&self.base_topic), QoS::AtLeastOnce, false, payload).await,
                                    Err(e) => error!("Cannot serialize metering data {}: {}", data.id, e),
                                }

                                match serde_json::to_string(&data.metered_values) {
                                    Ok(payload) => {
                                        let topic = device_topic(&self.base_topic, &data.protocol, &data.meter_name);
                                        self.publish(topic, QoS::AtLeastOnce, false, payload).await;
                                    },
                                    Err(e) => error!("Cannot serialize values of {}: {}", data.meter_name, e),
                                }
                            },
                Transmission::Status(status) => {
                                match serde_json::to_string(&status) {
                                    Ok(payload) => {
                                        let topic = status_topic(&self.base_topic, &status.meter_name);
                                        self.publish(topic, QoS::AtLeastOnce, true, payload).await;
                                    },
                                    Err(e) => error!("Cannot serialize status of {}: {}", status.meter_name, e),
                                }
                            },
                Transmission::Publish(publish_data) => {
                                let topic = format!("{}/{}", self.base_topic, publish_data.topic);
                                self.publish(topic, to_qos(publish_data.qos), publish_data.retain, publish_data.payload).await;
                            },
            };
        }

        info!("MQTT thread exit");
        let _ = self.client.disconnect().await;
    }
}

pub async fn get_app_status() -> AppStatus {
    APP_STATUS.read().await.clone()
}

pub async fn publish_uptime(mqtt_sender: &Sender<Transmission>) {
    let app_status = get_app_status().await;

    let uptime_publish = PublishData {
        topic: "mgt/uptime".to_string(),
        payload: app_status.uptime_seconds().to_string(),
        qos: 1,
        retain: true,
    };
    let _ = mqtt_sender.send(Transmission::Publish(uptime_publish)).await;
}

pub async fn publish_protocol_count(mqtt_sender: &Sender<Transmission>, protocol: &str, count: u32) {
    let count_publish = PublishData {
        topic: format!("mgt/{}/count", protocol),
        payload: count.to_string(),
        qos: 1,
        retain: true,
    };
    let _ = mqtt_sender.send(Transmission::Publish(count_publish)).await;
}
