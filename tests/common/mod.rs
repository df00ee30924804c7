//! Shared test utilities

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use heatpilot::hub::{RpcRequest, RpcResponse, RpcTransport};
use heatpilot::{Config, ConfigStore, Error, GatewayAdapter, HubClient};
use serde_json::{Value, json};
use tokio::sync::Mutex;

pub const USER: &str = "admin";
pub const PASSWORD: &str = "secret";
pub const VALVE_TYPE: &str = "HmIP-eTRV";

/// In-memory hub answering the JSON-RPC methods the controller uses
#[derive(Default)]
pub struct MockHub {
    state: Mutex<HubState>,
}

#[derive(Default)]
struct HubState {
    next_token: u32,
    valid_token: Option<String>,
    sessions_never_stick: bool,
    reject_logins: bool,
    network_failures: u32,
    devices: Vec<(String, Value)>,
    rooms: Vec<(String, String, Vec<String>)>,
    broken_rooms: bool,
    /// (address, value key) -> value; missing means RPC error
    values: HashMap<(String, String), Value>,
    calls: Vec<RpcRequest>,
}

impl MockHub {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Add a valve with its first channel in `room` and an opening in percent
    pub async fn add_valve(&self, id: u64, address: &str, room: Option<&str>, level: Option<f64>) {
        self.add_device(id, "HmIP-eTRV-2", address).await;
        let mut s = self.state.lock().await;
        if let Some(room) = room {
            let channel = (id + 1).to_string();
            if let Some(r) = s.rooms.iter_mut().find(|r| r.1 == room) {
                r.2.push(channel);
            } else {
                let room_id = (9000 + s.rooms.len()).to_string();
                s.rooms.push((room_id, room.to_string(), vec![channel]));
            }
        }
        if let Some(level) = level {
            s.values
                .insert((address.to_string(), "LEVEL".into()), json!(level / 100.0));
        }
    }

    pub async fn add_device(&self, id: u64, device_type: &str, address: &str) {
        self.state.lock().await.devices.push((
            id.to_string(),
            json!({ "type": device_type, "address": address, "interface": "HmIP-RF" }),
        ));
    }

    pub async fn add_weather_station(&self, id: u64, address: &str, temp: f64, wind: f64, sun: f64) {
        self.add_device(id, "HmIP-SWO-B", address).await;
        let mut s = self.state.lock().await;
        for (key, value) in [
            ("ACTUAL_TEMPERATURE", temp),
            ("WIND_SPEED", wind),
            ("ILLUMINATION", sun),
        ] {
            s.values.insert((address.to_string(), key.into()), json!(value));
        }
    }

    /// Set a valve opening in percent; `None` makes the hub refuse the lookup
    pub async fn set_level(&self, address: &str, level: Option<f64>) {
        let mut s = self.state.lock().await;
        let key = (address.to_string(), "LEVEL".to_string());
        match level {
            Some(level) => s.values.insert(key, json!(level / 100.0)),
            None => s.values.remove(&key),
        };
    }

    /// Forget the issued token, as the hub does after its session timeout
    pub async fn expire_session(&self) {
        self.state.lock().await.valid_token = None;
    }

    /// Make every issued token expire immediately
    pub async fn set_sessions_never_stick(&self, on: bool) {
        self.state.lock().await.sessions_never_stick = on;
    }

    pub async fn set_reject_logins(&self, on: bool) {
        self.state.lock().await.reject_logins = on;
    }

    pub async fn set_broken_rooms(&self, on: bool) {
        self.state.lock().await.broken_rooms = on;
    }

    /// Fail the next `n` requests as if the host were unreachable
    pub async fn fail_network(&self, n: u32) {
        self.state.lock().await.network_failures = n;
    }

    /// Number of requests made for `method`
    pub async fn count(&self, method: &str) -> usize {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter(|c| c.method == method)
            .count()
    }

    pub async fn methods(&self) -> Vec<String> {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .map(|c| c.method.clone())
            .collect()
    }

    pub async fn clear_calls(&self) {
        self.state.lock().await.calls.clear();
    }
}

#[async_trait]
impl RpcTransport for MockHub {
    async fn post(&self, _url: &str, request: &RpcRequest) -> heatpilot::Result<RpcResponse> {
        let mut s = self.state.lock().await;
        s.calls.push(request.clone());

        if s.network_failures > 0 {
            s.network_failures -= 1;
            return Err(Error::Network("connection refused".into()));
        }

        let p = &request.params;
        if request.method == "Session.login" {
            if s.reject_logins || p["username"] != USER || p["password"] != PASSWORD {
                return Ok(RpcResponse::err(501, "invalid username or password"));
            }
            s.next_token += 1;
            let token = format!("sid-{}", s.next_token);
            s.valid_token = (!s.sessions_never_stick).then(|| token.clone());
            return Ok(RpcResponse::ok(json!(token)));
        }

        let presented = p["_session_id_"].as_str().map(ToString::to_string);
        if presented.is_none() || presented != s.valid_token {
            return Ok(RpcResponse::err(400, "access denied (session expired)"));
        }

        let reply = match request.method.as_str() {
            "Session.logout" => {
                s.valid_token = None;
                RpcResponse::ok(json!(true))
            }
            "Device.listAll" => {
                RpcResponse::ok(json!(s.devices.iter().map(|d| d.0.clone()).collect::<Vec<_>>()))
            }
            "Device.get" => match s.devices.iter().find(|d| p["id"] == d.0.as_str()) {
                Some((_, details)) => RpcResponse::ok(details.clone()),
                None => RpcResponse::err(404, "unknown device"),
            },
            "Room.listAll" if s.broken_rooms => RpcResponse::err(500, "room service down"),
            "Room.listAll" => {
                RpcResponse::ok(json!(s.rooms.iter().map(|r| r.0.clone()).collect::<Vec<_>>()))
            }
            "Room.get" => match s.rooms.iter().find(|r| p["id"] == r.0.as_str()) {
                Some((_, name, channels)) => {
                    RpcResponse::ok(json!({ "name": name, "channelIds": channels }))
                }
                None => RpcResponse::err(404, "unknown room"),
            },
            "Interface.getValue" => {
                let address = p["address"]
                    .as_str()
                    .unwrap_or_default()
                    .trim_end_matches(":1")
                    .to_string();
                let key = p["valueKey"].as_str().unwrap_or_default().to_string();
                match s.values.get(&(address, key)) {
                    Some(v) => RpcResponse::ok(v.clone()),
                    None => RpcResponse::err(501, "device unreachable"),
                }
            }
            other => RpcResponse::err(501, &format!("unknown method {other}")),
        };
        Ok(reply)
    }
}

/// Client over the mock hub
#[must_use]
pub fn client(hub: &Arc<MockHub>) -> HubClient {
    HubClient::new(hub.clone(), Duration::from_secs(2))
}

/// Valid configuration pointing at the mock hub, storing data in `data_dir`
#[must_use]
pub fn config(data_dir: &std::path::Path) -> Config {
    let mut config = Config::default();
    config.hub.address = "ccu.test".into();
    config.hub.username = Some(USER.into());
    config.hub.password = Some(PASSWORD.into());
    config.hub.valve_device_type = VALVE_TYPE.into();
    config.data_dir = data_dir.to_path_buf();
    config
}

#[must_use]
pub fn store(config: Config) -> ConfigStore {
    ConfigStore::new(config)
}

/// Gateway recording every delivered setpoint
#[derive(Clone, Default)]
pub struct RecordingGateway {
    pub delivered: Arc<Mutex<Vec<f64>>>,
}

impl RecordingGateway {
    pub async fn delivered(&self) -> Vec<f64> {
        self.delivered.lock().await.clone()
    }
}

#[async_trait]
impl GatewayAdapter for RecordingGateway {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn deliver_setpoint(&self, setpoint: f64) -> heatpilot::Result<()> {
        self.delivered.lock().await.push(setpoint);
        Ok(())
    }
}
