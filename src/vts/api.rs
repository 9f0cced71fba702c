//! VTube Studio public API client.
//!
//! Minimal WebSocket wrapper: authenticate once per connection, then inject
//! tracking parameter values. Requests and responses use the envelope format
//! of the public API (`apiName`/`apiVersion`/`requestID`/`messageType`).

use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::VtsSettings;
use crate::{AituberError, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct VtsApi {
    settings: VtsSettings,
    ws: Option<WsStream>,
    token: Option<String>,
    last_attempt: Option<Instant>,
}

impl VtsApi {
    pub fn new(settings: VtsSettings) -> Self {
        Self {
            settings,
            ws: None,
            token: None,
            last_attempt: None,
        }
    }

    fn url(&self) -> String {
        format!("ws://{}:{}", self.settings.host, self.settings.port)
    }

    pub fn is_connected(&self) -> bool {
        self.ws.is_some()
    }

    /// Dial and authenticate. Reuses a previously granted token when the
    /// plugin reconnects.
    pub async fn connect(&mut self) -> Result<()> {
        let url = self.url();
        self.last_attempt = Some(Instant::now());

        let (ws, _) = connect_async(url.as_str())
            .await
            .map_err(|e| AituberError::AnimationSinkUnavailable(format!("{}: {}", url, e)))?;
        self.ws = Some(ws);

        self.authenticate().await?;
        info!("Connected to VTube Studio at {}", url);
        Ok(())
    }

    async fn authenticate(&mut self) -> Result<()> {
        if self.token.is_none() {
            let data = json!({
                "pluginName": self.settings.plugin_name,
                "pluginDeveloper": self.settings.plugin_developer,
            });
            let response = self.request("AuthenticationTokenRequest", data).await?;
            let token = response["authenticationToken"]
                .as_str()
                .ok_or_else(|| {
                    AituberError::AnimationSinkUnavailable(
                        "No authentication token in response".into(),
                    )
                })?
                .to_string();
            debug!("Received authentication token");
            self.token = Some(token);
        }

        let data = json!({
            "pluginName": self.settings.plugin_name,
            "pluginDeveloper": self.settings.plugin_developer,
            "authenticationToken": self.token,
        });
        let response = self.request("AuthenticationRequest", data).await?;

        if response["authenticated"].as_bool() != Some(true) {
            // Stored token may have been revoked, force a fresh one next time
            self.token = None;
            return Err(AituberError::AnimationSinkUnavailable(
                "Authentication rejected".into(),
            ));
        }

        debug!("Authenticated with VTube Studio");
        Ok(())
    }

    /// Send one request and wait for its response data
    async fn request(&mut self, message_type: &str, data: Value) -> Result<Value> {
        let request_id: String = Uuid::new_v4().simple().to_string()[..8].to_string();
        let payload = json!({
            "apiName": "VTubeStudioPublicAPI",
            "apiVersion": "1.0",
            "requestID": request_id,
            "messageType": message_type,
            "data": data,
        });

        let ws = self
            .ws
            .as_mut()
            .ok_or_else(|| AituberError::AnimationSinkUnavailable("Not connected".into()))?;

        if let Err(e) = ws.send(Message::Text(payload.to_string())).await {
            self.ws = None;
            return Err(AituberError::AnimationSinkUnavailable(e.to_string()));
        }

        loop {
            let ws = self
                .ws
                .as_mut()
                .ok_or_else(|| AituberError::AnimationSinkUnavailable("Not connected".into()))?;

            match ws.next().await {
                Some(Ok(Message::Text(raw))) => {
                    let parsed: Value = serde_json::from_str(&raw).map_err(|e| {
                        AituberError::AnimationSinkUnavailable(format!("Bad response: {}", e))
                    })?;

                    if parsed["messageType"] == "APIError" {
                        let message = parsed["data"]["message"]
                            .as_str()
                            .unwrap_or("unknown API error");
                        return Err(AituberError::AnimationSinkUnavailable(message.to_string()));
                    }
                    return Ok(parsed["data"].clone());
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    self.ws = None;
                    return Err(AituberError::AnimationSinkUnavailable(e.to_string()));
                }
                None => {
                    self.ws = None;
                    return Err(AituberError::AnimationSinkUnavailable(
                        "Connection closed".into(),
                    ));
                }
            }
        }
    }

    /// Inject one or more tracking parameter values
    pub async fn inject_parameters(&mut self, values: &[(String, f32)]) -> Result<()> {
        self.ensure_connected().await?;

        let parameter_values: Vec<Value> = values
            .iter()
            .map(|(id, value)| json!({ "id": id, "value": value }))
            .collect();

        let data = json!({
            "faceFound": false,
            "mode": "set",
            "parameterValues": parameter_values,
        });

        self.request("InjectParameterDataRequest", data).await?;
        Ok(())
    }

    /// Reconnect when needed, at most once per reconnect interval
    async fn ensure_connected(&mut self) -> Result<()> {
        if self.ws.is_some() {
            return Ok(());
        }

        let interval = Duration::from_secs_f64(self.settings.reconnect_interval_secs);
        if let Some(last) = self.last_attempt {
            if last.elapsed() < interval {
                return Err(AituberError::AnimationSinkUnavailable(
                    "Reconnect backoff".into(),
                ));
            }
        }

        warn!("VTube Studio connection lost, reconnecting");
        self.connect().await
    }
}
