//! Low-level MQTTS wire client (§4.1): TLS connection with certificate
//! verification disabled (Bambu printers use self-signed certs — the
//! access code is the real trust boundary), subscribe to the report
//! topic, and a raw JSON publish/receive surface. Report/command framing
//! above this layer works in `serde_json::Value`, matching the
//! deep-merge/raw-master architecture the state pipeline is built on.

use std::sync::Arc;
use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS, TlsConfiguration, Transport};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::tls;

#[derive(Debug, Clone)]
pub struct MqttWireConfig {
    pub serial: String,
    pub host: String,
    pub access_code: String,
}

pub enum WireEvent {
    Connected,
    Disconnected,
    Message(Value),
}

pub struct MqttWireClient {
    client: AsyncClient,
    eventloop: EventLoop,
    config: MqttWireConfig,
}

impl MqttWireClient {
    /// Open the TCP+TLS connection and poll until ConnAck or failure.
    pub async fn connect(config: MqttWireConfig) -> anyhow::Result<Self> {
        let mut opts = MqttOptions::new(format!("bambu-sentinel-{}", config.serial), config.host.clone(), 8883);
        opts.set_keep_alive(Duration::from_secs(10));
        opts.set_credentials("bblp", &config.access_code);
        opts.set_max_packet_size(64 * 1024, 64 * 1024);
        opts.set_transport(Transport::tls_with_config(Self::tls_config()?));

        let (client, mut eventloop) = AsyncClient::new(opts, 100);

        let mut connected = false;
        for _ in 0..30 {
            match tokio::time::timeout(Duration::from_secs(1), eventloop.poll()).await {
                Ok(Ok(Event::Incoming(Packet::ConnAck(_)))) => {
                    connected = true;
                    break;
                }
                Ok(Ok(_)) => continue,
                Ok(Err(e)) => return Err(anyhow::anyhow!("mqtt connect error: {e}")),
                Err(_) => continue,
            }
        }
        if !connected {
            return Err(anyhow::anyhow!("timed out waiting for ConnAck"));
        }

        let topic = format!("device/{}/report", config.serial);
        client.subscribe(&topic, QoS::AtLeastOnce).await?;

        Ok(Self { client, eventloop, config })
    }

    fn tls_config() -> anyhow::Result<TlsConfiguration> {
        Ok(TlsConfiguration::Rustls(Arc::new(tls::client_config())))
    }

    pub async fn publish(&self, payload: &Value) -> anyhow::Result<()> {
        let topic = format!("device/{}/request", self.config.serial);
        let body = serde_json::to_vec(payload)?;
        debug!(topic = %topic, "publishing mqtt command");
        self.client.publish(&topic, QoS::AtLeastOnce, false, body).await?;
        Ok(())
    }

    /// A cheap, independently-publishable handle: `AsyncClient` clones
    /// share the same connection, so callers can keep publishing commands
    /// while `run` drives the event loop elsewhere.
    pub fn handle(&self) -> MqttHandle {
        MqttHandle { client: self.client.clone(), serial: self.config.serial.clone() }
    }

    /// Drive the event loop, forwarding decoded report payloads and
    /// connect/disconnect transitions through `tx` until the loop errors.
    pub async fn run(mut self, tx: mpsc::Sender<WireEvent>) -> anyhow::Result<()> {
        let _ = tx.send(WireEvent::Connected).await;
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    match serde_json::from_slice::<Value>(&publish.payload) {
                        Ok(value) => {
                            let _ = tx.send(WireEvent::Message(value)).await;
                        }
                        Err(e) => warn!("non-JSON mqtt payload: {e}"),
                    }
                }
                Ok(Event::Incoming(Packet::PingResp)) | Ok(Event::Outgoing(_)) => {}
                Ok(_) => {}
                Err(e) => {
                    let _ = tx.send(WireEvent::Disconnected).await;
                    return Err(anyhow::anyhow!("mqtt event loop error: {e}"));
                }
            }
        }
    }
}

#[derive(Clone)]
pub struct MqttHandle {
    client: AsyncClient,
    serial: String,
}

impl MqttHandle {
    pub async fn publish(&self, payload: &Value) -> anyhow::Result<()> {
        let topic = format!("device/{}/request", self.serial);
        let body = serde_json::to_vec(payload)?;
        self.client.publish(&topic, QoS::AtLeastOnce, false, body).await?;
        Ok(())
    }
}
