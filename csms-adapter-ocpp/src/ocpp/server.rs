//! OCPP-J WebSocket server
//!
//! Stations connect to `ws://host/{tenant}/{chargeBoxIdentity}` with the
//! `ocpp1.6` (or `ocpp1.5`) subprotocol. An optional `?token=` query carries
//! the registration token of a station that is not known yet.
//!
//! Each connection runs in its own task and handles its frames one after
//! the other, so a station's messages are processed in arrival order.

use std::net::SocketAddr;

use csms_core::{OcppProtocol, OcppVersion};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{
    accept_hdr_async_with_config,
    tungstenite::{
        handshake::server::{ErrorResponse, Request, Response},
        http::{header, HeaderValue, StatusCode},
        protocol::WebSocketConfig,
        Message,
    },
};
use tracing::{debug, error, info, warn};

use super::messages::*;
use crate::config::ServerConfig;
use crate::engine::{OcppEngine, OcppHeaders};

/// Subprotocols in order of preference
const SUBPROTOCOLS: [(&str, OcppVersion); 2] =
    [("ocpp1.6", OcppVersion::V16), ("ocpp1.5", OcppVersion::V15)];

/// Where a connection comes from, taken from the handshake URL
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub tenant_id: String,
    pub charge_box_identity: String,
    pub token: Option<String>,
}

impl Route {
    /// Parse `/{tenant}/{chargeBoxIdentity}[?token=...]`.
    ///
    /// Any leading path segments are ignored.
    pub fn parse(path: &str, query: Option<&str>) -> Option<Self> {
        let mut segments = path.rsplit('/').filter(|s| !s.is_empty());
        let charge_box_identity = segments.next()?.to_string();
        let tenant_id = segments.next()?.to_string();

        let token = query.and_then(|query| {
            query
                .split('&')
                .filter_map(|pair| pair.split_once('='))
                .find(|(key, _)| *key == "token")
                .map(|(_, value)| value.to_string())
        });

        Some(Self {
            tenant_id,
            charge_box_identity,
            token,
        })
    }
}

/// Pick the first supported subprotocol offered by the station
pub fn select_subprotocol(offered: Option<&str>) -> Option<(&'static str, OcppVersion)> {
    let offered: Vec<&str> = offered?.split(',').map(str::trim).collect();
    SUBPROTOCOLS
        .iter()
        .find(|(name, _)| offered.contains(name))
        .copied()
}

/// Answer one frame. `None` when nothing has to be sent back.
pub async fn process_frame(engine: &OcppEngine, headers: &OcppHeaders, bytes: &[u8]) -> Option<Vec<u8>> {
    let reply = match OcppMessage::parse(bytes) {
        Ok(OcppMessage::Call(call)) => match call.action() {
            Ok(action) => OcppMessage::CallResult(CallResult {
                payload: engine.handle(headers, action, call.payload).await,
                message_id: call.message_id,
            }),
            Err(e) => {
                warn!("{}: {}", headers.charge_box_identity, e);
                OcppMessage::CallError(CallError::new(
                    call.message_id,
                    e.error_code(),
                    e.to_string(),
                ))
            }
        },
        Ok(OcppMessage::CallResult(result)) => {
            debug!(
                "{}: CALLRESULT {} ignored",
                headers.charge_box_identity, result.message_id
            );
            return None;
        }
        Ok(OcppMessage::CallError(err)) => {
            warn!(
                "{}: CALLERROR {} {:?}: {}",
                headers.charge_box_identity, err.message_id, err.error_code, err.error_description
            );
            return None;
        }
        Err(e) => {
            warn!("{}: unreadable frame: {}", headers.charge_box_identity, e);
            let message_id = OcppMessage::peek_message_id(bytes)?;
            OcppMessage::CallError(CallError::new(message_id, e.error_code(), e.to_string()))
        }
    };

    match reply.to_bytes() {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            error!("Failed to serialize reply: {}", e);
            None
        }
    }
}

/// Accepts station connections and feeds them to the engine
pub struct OcppServer {
    engine: OcppEngine,
    config: ServerConfig,
}

impl OcppServer {
    pub fn new(engine: OcppEngine, config: ServerConfig) -> Self {
        Self { engine, config }
    }

    /// Bind the configured address and serve forever
    pub async fn run(self) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.config.listen).await?;
        self.serve(listener).await
    }

    pub async fn serve(self, listener: TcpListener) -> std::io::Result<()> {
        info!("OCPP-J server listening on {}", listener.local_addr()?);

        loop {
            let (stream, peer) = listener.accept().await?;
            let engine = self.engine.clone();
            let config = self.config.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(engine, config, stream, peer).await {
                    warn!("Connection from {} ended: {}", peer, e);
                }
            });
        }
    }
}

async fn handle_connection(
    engine: OcppEngine,
    config: ServerConfig,
    stream: TcpStream,
    peer: SocketAddr,
) -> Result<(), OcppError> {
    let mut accepted: Option<(Route, OcppVersion)> = None;

    let callback = |request: &Request, mut response: Response| -> Result<Response, ErrorResponse> {
        let Some(route) = Route::parse(request.uri().path(), request.uri().query()) else {
            let mut refusal = ErrorResponse::new(Some("Expected /{tenant}/{chargeBoxIdentity}".into()));
            *refusal.status_mut() = StatusCode::NOT_FOUND;
            return Err(refusal);
        };

        let offered = request
            .headers()
            .get(header::SEC_WEBSOCKET_PROTOCOL)
            .and_then(|v| v.to_str().ok());
        let version = match select_subprotocol(offered) {
            Some((name, version)) => {
                response
                    .headers_mut()
                    .insert(header::SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(name));
                version
            }
            None => {
                warn!(
                    "{} offered no supported subprotocol ({:?}), assuming OCPP 1.6",
                    route.charge_box_identity, offered
                );
                OcppVersion::V16
            }
        };

        accepted = Some((route, version));
        Ok(response)
    };

    let ws_config = WebSocketConfig {
        max_message_size: Some(config.max_message_size),
        ..Default::default()
    };
    let ws_stream = accept_hdr_async_with_config(stream, callback, Some(ws_config))
        .await
        .map_err(|e| {
            debug!("Handshake with {} failed: {}", peer, e);
            OcppError::ConnectionClosed
        })?;
    let (route, version) = accepted.ok_or(OcppError::InvalidFormat)?;

    let mut headers = OcppHeaders::new(&route.tenant_id, &route.charge_box_identity)
        .with_version(version, OcppProtocol::Json)
        .with_ip(peer.ip().to_string());
    headers.token = route.token;

    info!(
        "{} connected from {} (tenant {}, OCPP {})",
        headers.charge_box_identity,
        peer,
        headers.tenant_id,
        version.as_str()
    );

    let (mut ws_tx, mut ws_rx) = ws_stream.split();
    while let Some(message) = ws_rx.next().await {
        let reply = match message {
            Ok(Message::Text(text)) => {
                debug!("{} >> {}", headers.charge_box_identity, text);
                process_frame(&engine, &headers, text.as_bytes()).await
            }
            Ok(Message::Ping(data)) => {
                ws_tx
                    .send(Message::Pong(data))
                    .await
                    .map_err(|_| OcppError::ConnectionClosed)?;
                continue;
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                warn!("{}: WebSocket error: {}", headers.charge_box_identity, e);
                break;
            }
        };

        if let Some(bytes) = reply {
            let text = String::from_utf8_lossy(&bytes).into_owned();
            debug!("{} << {}", headers.charge_box_identity, text);
            ws_tx
                .send(Message::Text(text.into()))
                .await
                .map_err(|_| OcppError::ConnectionClosed)?;
        }
    }

    info!("{} disconnected", headers.charge_box_identity);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::services::{Collaborators, MemoryStorage};
    use std::sync::Arc;

    #[test]
    fn test_route_parsing() {
        let route = Route::parse("/tenant-a/CS001", None).unwrap();
        assert_eq!(route.tenant_id, "tenant-a");
        assert_eq!(route.charge_box_identity, "CS001");
        assert_eq!(route.token, None);

        let route = Route::parse("/ocpp/json/tenant-a/CS001/", Some("foo=1&token=abc")).unwrap();
        assert_eq!(route.tenant_id, "tenant-a");
        assert_eq!(route.charge_box_identity, "CS001");
        assert_eq!(route.token.as_deref(), Some("abc"));

        assert!(Route::parse("/CS001", None).is_none());
    }

    #[test]
    fn test_subprotocol_selection() {
        assert_eq!(
            select_subprotocol(Some("ocpp1.5, ocpp1.6")),
            Some(("ocpp1.6", OcppVersion::V16))
        );
        assert_eq!(
            select_subprotocol(Some("ocpp1.5")),
            Some(("ocpp1.5", OcppVersion::V15))
        );
        assert_eq!(select_subprotocol(Some("ocpp2.0.1")), None);
        assert_eq!(select_subprotocol(None), None);
    }

    #[tokio::test]
    async fn test_process_frame_errors() {
        let engine = OcppEngine::new(
            EngineConfig::default(),
            Arc::new(MemoryStorage::new()),
            Collaborators::noop(),
        );
        let headers = OcppHeaders::new("t1", "CS001");

        let reply = process_frame(&engine, &headers, br#"[2, "m1", "DataTransfer", {}]"#)
            .await
            .unwrap();
        let reply: serde_json::Value = serde_json::from_slice(&reply).unwrap();
        assert_eq!(reply[0], 4);
        assert_eq!(reply[1], "m1");
        assert_eq!(reply[2], "NotImplemented");

        let reply = process_frame(&engine, &headers, br#"[2, "m2", "Heartbeat"]"#)
            .await
            .unwrap();
        let reply: serde_json::Value = serde_json::from_slice(&reply).unwrap();
        assert_eq!(reply[2], "FormationViolation");

        assert!(process_frame(&engine, &headers, b"garbage").await.is_none());
        assert!(process_frame(&engine, &headers, br#"[3, "m3", {}]"#).await.is_none());

        let reply = process_frame(&engine, &headers, br#"[2, "m4", "Heartbeat", {}]"#)
            .await
            .unwrap();
        let reply: serde_json::Value = serde_json::from_slice(&reply).unwrap();
        assert_eq!(reply[0], 3);
        assert!(reply[2]["currentTime"].is_string());
    }
}
