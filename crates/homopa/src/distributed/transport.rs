//! Framed request/response transport over TCP.
//!
//! A frame is a 4-byte big-endian body length, one flag byte (0 plain,
//! 1 zstd) and a bincode body. The length never counts the flag byte.

use super::messages::{Request, Response};
use crate::config::RpcConfig;
use crate::engine::HomopathListing;
use crate::observation::Members;
use homopa_core::{Compressor, EdgeId, HomopaError, RegionId, ZstdCompressor};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

const FLAG_PLAIN: u8 = 0;
const FLAG_ZSTD: u8 = 1;

/// Errors on the region RPC channel.
#[derive(Error, Debug)]
pub enum RpcError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timed out after {after:?} while {during}")]
    Timeout {
        after: Duration,
        during: &'static str,
    },

    #[error("Frame of {size} bytes exceeds limit of {limit}")]
    FrameTooLarge { size: usize, limit: usize },

    #[error("Unknown frame flag {0}")]
    UnknownFlag(u8),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Compression error: {0}")]
    Compression(#[from] HomopaError),

    #[error("Expected {expected} response, got {got}")]
    UnexpectedResponse {
        expected: &'static str,
        got: &'static str,
    },

    #[error("Invalid address: {0}")]
    Address(String),
}

/// Result type for RPC operations.
pub type Result<T> = std::result::Result<T, RpcError>;

/// Encodes and decodes frames.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    compressor: Option<ZstdCompressor>,
    max_frame_bytes: usize,
}

impl FrameCodec {
    #[must_use]
    pub fn new(compress: bool, max_frame_bytes: usize) -> Self {
        Self {
            compressor: compress.then(ZstdCompressor::new),
            max_frame_bytes,
        }
    }

    #[must_use]
    pub fn from_config(config: &RpcConfig) -> Self {
        Self::new(config.compress_transfers, config.max_frame_bytes)
    }

    /// Serialize `message` into a complete frame.
    pub fn encode<T: Serialize>(&self, message: &T) -> Result<Vec<u8>> {
        let body = bincode::serialize(message)?;
        let (flag, body) = match &self.compressor {
            Some(compressor) => (FLAG_ZSTD, compressor.compress(&body)?),
            None => (FLAG_PLAIN, body),
        };
        if body.len() > self.max_frame_bytes {
            return Err(RpcError::FrameTooLarge {
                size: body.len(),
                limit: self.max_frame_bytes,
            });
        }
        let len = u32::try_from(body.len()).map_err(|_| RpcError::FrameTooLarge {
            size: body.len(),
            limit: u32::MAX as usize,
        })?;

        let mut frame = Vec::with_capacity(5 + body.len());
        frame.extend_from_slice(&len.to_be_bytes());
        frame.push(flag);
        frame.extend_from_slice(&body);
        Ok(frame)
    }

    /// Deserialize a frame body.
    pub fn decode<T: DeserializeOwned>(&self, flag: u8, body: &[u8]) -> Result<T> {
        match flag {
            FLAG_PLAIN => Ok(bincode::deserialize(body)?),
            FLAG_ZSTD => {
                let raw = ZstdCompressor::new().decompress_bounded(body, self.max_frame_bytes)?;
                Ok(bincode::deserialize(&raw)?)
            }
            other => Err(RpcError::UnknownFlag(other)),
        }
    }

    /// Write one frame.
    pub async fn write_frame<W, T>(&self, writer: &mut W, message: &T) -> Result<()>
    where
        W: AsyncWrite + Unpin,
        T: Serialize,
    {
        let frame = self.encode(message)?;
        writer.write_all(&frame).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Read one frame.
    pub async fn read_frame<R, T>(&self, reader: &mut R) -> Result<T>
    where
        R: AsyncRead + Unpin,
        T: DeserializeOwned,
    {
        let mut header = [0u8; 5];
        reader.read_exact(&mut header).await?;
        let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
        if len > self.max_frame_bytes {
            return Err(RpcError::FrameTooLarge {
                size: len,
                limit: self.max_frame_bytes,
            });
        }
        let mut body = vec![0u8; len];
        reader.read_exact(&mut body).await?;
        self.decode(header[4], &body)
    }
}

/// Client side of the region RPC channel. One connection per request.
#[derive(Debug, Clone)]
pub struct RegionClient {
    config: RpcConfig,
    codec: FrameCodec,
}

impl RegionClient {
    #[must_use]
    pub fn new(config: RpcConfig) -> Self {
        let codec = FrameCodec::from_config(&config);
        Self { config, codec }
    }

    async fn connect(&self, region: RegionId) -> Result<TcpStream> {
        let address = self
            .config
            .address_for(region)
            .map_err(|e| RpcError::Address(e.to_string()))?;
        let timeout = self.config.connect_timeout();
        tokio::time::timeout(timeout, TcpStream::connect(&address))
            .await
            .map_err(|_| RpcError::Timeout {
                after: timeout,
                during: "connecting",
            })?
            .map_err(RpcError::from)
    }

    /// Send one request. Returns `None` for requests without a response.
    pub async fn request(&self, region: RegionId, request: &Request) -> Result<Option<Response>> {
        let timeout = self.config.request_timeout();
        let exchange = async {
            let mut stream = self.connect(region).await?;
            self.codec.write_frame(&mut stream, request).await?;
            if !request.expects_response() {
                stream.shutdown().await?;
                return Ok(None);
            }
            let response: Response = self.codec.read_frame(&mut stream).await?;
            Ok::<_, RpcError>(Some(response))
        };

        let result = tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| RpcError::Timeout {
                after: timeout,
                during: "awaiting response",
            })?;
        debug!(region, code = request.code(), ok = result.is_ok(), "rpc");
        result
    }

    async fn expect(&self, region: RegionId, request: Request) -> Result<Response> {
        self.request(region, &request)
            .await?
            .ok_or(RpcError::UnexpectedResponse {
                expected: "any",
                got: "no response",
            })
    }

    /// Request 1.
    pub async fn path_members(&self, region: RegionId, path: &[EdgeId]) -> Result<Option<Members>> {
        match self.expect(region, Request::PathMembers(path.to_vec())).await? {
            Response::Members(members) => Ok(members),
            other => Err(unexpected("members", &other)),
        }
    }

    /// Request 2.
    pub async fn edge_members(&self, region: RegionId, edge: EdgeId) -> Result<Option<Members>> {
        match self.expect(region, Request::EdgeMembers(edge)).await? {
            Response::Members(members) => Ok(members),
            other => Err(unexpected("members", &other)),
        }
    }

    /// Request 3.
    pub async fn homopath_table(&self, region: RegionId) -> Result<Option<HomopathListing>> {
        match self.expect(region, Request::HomopathTable).await? {
            Response::Table(table) => Ok(table),
            other => Err(unexpected("table", &other)),
        }
    }

    /// Request 4.
    pub async fn distinct_objects(&self, region: RegionId) -> Result<Vec<u64>> {
        match self.expect(region, Request::DistinctObjects).await? {
            Response::DistinctObjects(objects) => Ok(objects),
            other => Err(unexpected("distinct objects", &other)),
        }
    }

    /// Request 5.
    pub async fn observation_integers(&self, region: RegionId) -> Result<u64> {
        match self.expect(region, Request::ObservationIntegers).await? {
            Response::IntegerCount(count) => Ok(count),
            other => Err(unexpected("integer count", &other)),
        }
    }

    /// Request -1.
    pub async fn terminate(&self, region: RegionId) -> Result<()> {
        self.request(region, &Request::Terminate).await.map(|_| ())
    }
}

fn unexpected(expected: &'static str, got: &Response) -> RpcError {
    RpcError::UnexpectedResponse {
        expected,
        got: got.kind(),
    }
}
