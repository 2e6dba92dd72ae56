//! Shared WebSocket transport for the gateway and voice signaling state
//! machines: JSON (de)serialization, TLS-backend client setup, and the
//! gateway's one-shot zlib-compressed binary frame handling.

use async_trait::async_trait;
use async_tungstenite::{
    self as tungstenite,
    tokio::ConnectStream,
    tungstenite::{error::Error as TungsteniteError, protocol::CloseFrame, Message},
    WebSocketStream,
};
use flate2::read::ZlibDecoder;
use futures::{stream::SplitSink, SinkExt, StreamExt, TryStreamExt};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Error as JsonError;
use std::io::Read;
use tokio::time::{timeout, Duration};
use tracing::{debug, instrument};
use url::Url;

use crate::constants::MAX_GATEWAY_INFLATE_SIZE;

pub type WsStream = WebSocketStream<ConnectStream>;

pub type Result<T> = std::result::Result<T, Error>;

/// Transport-level error shared by both WebSocket state machines.
#[derive(Debug)]
pub enum Error {
    Json(JsonError),
    #[cfg(all(feature = "rustls-marker", not(feature = "native-marker")))]
    Tls(RustlsError),
    /// A binary frame was received without the `zlib` flag that would make
    /// it decodable; voice signaling never sends these, and a gateway frame
    /// this crate didn't ask to have compressed shouldn't appear either.
    UnexpectedBinaryMessage(Vec<u8>),
    /// A compressed gateway frame failed to inflate within the documented
    /// size cap.
    Inflate(std::io::Error),
    /// A connect URL built from a gateway- or Discord-supplied endpoint
    /// string failed to parse.
    InvalidUrl(url::ParseError),
    Ws(TungsteniteError),
    WsClosed(Option<CloseFrame<'static>>),
}

impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Error {
        Error::InvalidUrl(e)
    }
}

impl From<JsonError> for Error {
    fn from(e: JsonError) -> Error {
        Error::Json(e)
    }
}

#[cfg(all(feature = "rustls-marker", not(feature = "native-marker")))]
impl From<RustlsError> for Error {
    fn from(e: RustlsError) -> Error {
        Error::Tls(e)
    }
}

impl From<TungsteniteError> for Error {
    fn from(e: TungsteniteError) -> Error {
        Error::Ws(e)
    }
}

#[cfg(all(feature = "rustls-marker", not(feature = "native-marker")))]
use std::{
    error::Error as StdError,
    fmt::{Display, Formatter, Result as FmtResult},
    io::Error as IoError,
};

/// Decodes the two shapes of inbound message this crate's sockets ever
/// receive: plain JSON text (voice signaling, and gateway when compression
/// is off), and a single-frame zlib-compressed JSON payload (gateway, when
/// requested via `compress=zlib-stream` on the connect URL).
///
/// This is a one-shot `inflate`, not the continuous-stream transform
/// `zlib-stream` technically implies: discord.py's gateway client treats
/// each compressed frame independently via `zlib.decompress(msg, 15,
/// 10490000)`, and this crate follows that simpler, proven behaviour rather
/// than keeping a single `Decompress` instance alive across the whole
/// connection.
fn inflate_binary_frame(bytes: &[u8]) -> std::result::Result<String, std::io::Error> {
    let mut decoder = ZlibDecoder::new(bytes).take(MAX_GATEWAY_INFLATE_SIZE as u64);
    let mut out = String::new();
    decoder.read_to_string(&mut out)?;
    Ok(out)
}

#[async_trait]
pub trait ReceiverExt {
    async fn recv_json<T: DeserializeOwned>(&mut self) -> Result<Option<T>>;
    async fn recv_json_no_timeout<T: DeserializeOwned>(&mut self) -> Result<Option<T>>;
}

#[async_trait]
pub trait SenderExt {
    async fn send_json<T: Serialize + Sync>(&mut self, value: &T) -> Result<()>;
}

#[async_trait]
impl ReceiverExt for WsStream {
    async fn recv_json<T: DeserializeOwned>(&mut self) -> Result<Option<T>> {
        const TIMEOUT: Duration = Duration::from_millis(500);

        let ws_message = match timeout(TIMEOUT, self.next()).await {
            Ok(Some(Ok(v))) => Some(v),
            Ok(Some(Err(e))) => return Err(e.into()),
            Ok(None) | Err(_) => None,
        };

        convert_ws_message(ws_message)
    }

    async fn recv_json_no_timeout<T: DeserializeOwned>(&mut self) -> Result<Option<T>> {
        convert_ws_message(self.try_next().await?)
    }
}

#[async_trait]
impl ReceiverExt for futures::stream::SplitStream<WsStream> {
    async fn recv_json<T: DeserializeOwned>(&mut self) -> Result<Option<T>> {
        const TIMEOUT: Duration = Duration::from_millis(500);

        let ws_message = match timeout(TIMEOUT, self.next()).await {
            Ok(Some(Ok(v))) => Some(v),
            Ok(Some(Err(e))) => return Err(e.into()),
            Ok(None) | Err(_) => None,
        };

        convert_ws_message(ws_message)
    }

    async fn recv_json_no_timeout<T: DeserializeOwned>(&mut self) -> Result<Option<T>> {
        convert_ws_message(self.try_next().await?)
    }
}

#[async_trait]
impl SenderExt for SplitSink<WsStream, Message> {
    async fn send_json<T: Serialize + Sync>(&mut self, value: &T) -> Result<()> {
        Ok(serde_json::to_string(value)
            .map(Message::Text)
            .map_err(Error::from)
            .map(|m| self.send(m))?
            .await?)
    }
}

#[async_trait]
impl SenderExt for WsStream {
    async fn send_json<T: Serialize + Sync>(&mut self, value: &T) -> Result<()> {
        Ok(serde_json::to_string(value)
            .map(Message::Text)
            .map_err(Error::from)
            .map(|m| self.send(m))?
            .await?)
    }
}

#[inline]
pub(crate) fn convert_ws_message<T: DeserializeOwned>(
    message: Option<Message>,
) -> Result<Option<T>> {
    Ok(match message {
        Some(Message::Text(payload)) => serde_json::from_str(&payload)
            .map_err(|e| {
                debug!("Unexpected JSON {payload:?}.");
                e
            })
            .ok(),
        Some(Message::Binary(bytes)) => {
            let inflated = inflate_binary_frame(&bytes).map_err(Error::Inflate)?;
            serde_json::from_str(&inflated)
                .map_err(|e| {
                    debug!("Unexpected JSON after inflate {inflated:?}.");
                    e
                })
                .ok()
        },
        Some(Message::Close(Some(frame))) => {
            return Err(Error::WsClosed(Some(frame)));
        },
        // Ping/Pong message behaviour is internally handled by tungstenite.
        _ => None,
    })
}

/// An error that occured while connecting over rustls.
#[derive(Debug)]
#[non_exhaustive]
#[cfg(all(feature = "rustls-marker", not(feature = "native-marker")))]
pub enum RustlsError {
    /// An error with the handshake in tungstenite.
    HandshakeError,
    /// Standard IO error happening while creating the tcp stream.
    Io(IoError),
}

#[cfg(all(feature = "rustls-marker", not(feature = "native-marker")))]
impl From<IoError> for RustlsError {
    fn from(e: IoError) -> Self {
        RustlsError::Io(e)
    }
}

#[cfg(all(feature = "rustls-marker", not(feature = "native-marker")))]
impl Display for RustlsError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            RustlsError::HandshakeError =>
                f.write_str("TLS handshake failed when making the websocket connection"),
            RustlsError::Io(inner) => Display::fmt(&inner, f),
        }
    }
}

#[cfg(all(feature = "rustls-marker", not(feature = "native-marker")))]
impl StdError for RustlsError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            RustlsError::Io(inner) => Some(inner),
            _ => None,
        }
    }
}

#[cfg(all(feature = "rustls-marker", not(feature = "native-marker")))]
#[instrument]
pub(crate) async fn create_rustls_client(url: Url) -> Result<WsStream> {
    let (stream, _) = tungstenite::tokio::connect_async_with_config::<Url>(
        url,
        Some(tungstenite::tungstenite::protocol::WebSocketConfig {
            max_message_size: None,
            max_frame_size: None,
            ..Default::default()
        }),
    )
    .await
    .map_err(|_| RustlsError::HandshakeError)?;

    Ok(stream)
}

#[cfg(feature = "native-marker")]
#[instrument]
pub(crate) async fn create_native_tls_client(url: Url) -> Result<WsStream> {
    let (stream, _) = tungstenite::tokio::connect_async_with_config::<Url>(
        url,
        Some(tungstenite::tungstenite::protocol::WebSocketConfig {
            max_message_size: None,
            max_frame_size: None,
            ..Default::default()
        }),
    )
    .await?;

    Ok(stream)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn inflate_rejects_corrupt_frames_without_panicking() {
        assert!(inflate_binary_frame(&[0xff, 0x00, 0x11]).is_err());
    }
}
