//! Low-level transport clients (§4.1): MQTTS telemetry/command channel,
//! implicit-FTPS file channel, and the proprietary camera JPEG stream.
//! Everything above this layer talks `DomainError`/`serde_json::Value`;
//! these modules are the only place raw protocol types are visible.

pub mod camera;
pub mod ftps;
pub mod mqtt;
pub mod tls;

pub use camera::CameraWireClient;
pub use ftps::FtpsWireClient;
pub use mqtt::{MqttHandle, MqttWireClient, MqttWireConfig, WireEvent};
