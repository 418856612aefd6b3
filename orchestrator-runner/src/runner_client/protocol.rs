// Copyright (c) The orchestrator Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The duplex wire schema between the driver and a runner subprocess.
//!
//! Framing is a 4-byte big-endian length prefix followed by a JSON payload.
//! A literal protocol-buffer codec would need `protoc` at build time and an
//! SSH-backed transport to carry it, both out of scope here; `serde_json`
//! behind a small [`Codec`] trait gets the same "length-prefixed messages
//! over a byte stream" shape without either dependency, and can be swapped
//! for a real protobuf codec later without touching callers.

use crate::errors::RunnerClientError;
use crate::fixture_stack::FixtureValue;
use orchestrator_metadata::{EntityKind, StructuredError};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::collections::BTreeMap;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

/// Board/runtime facts a bundle reports about the device it's running on,
/// answering `GetDUTInfo`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[non_exhaustive]
pub struct DutInfo {
    /// The board or product name, as reported by the DUT.
    pub board: SmolStr,
    /// The target architecture, used to resolve a toolchain mapping.
    pub arch: SmolStr,
    /// Free-form key/value facts (kernel version, build id, ...).
    pub extra: BTreeMap<String, String>,
}

/// A message the runner subprocess sends to the driver.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "type")]
#[non_exhaustive]
pub enum RunnerToClient {
    RunStart,
    RunEnd,
    RunLog {
        line: String,
    },
    EntityStart {
        name: SmolStr,
        kind: EntityKind,
    },
    EntityLog {
        name: SmolStr,
        line: String,
    },
    EntityError {
        name: SmolStr,
        error: StructuredError,
    },
    EntityEnd {
        name: SmolStr,
        kind: EntityKind,
        skip_reasons: Vec<String>,
    },
    Heartbeat,
    StackOperation {
        request_id: u64,
        operation: StackOperationKind,
    },
    /// Answers `GetDUTInfo`.
    GetDutInfoResponse {
        request_id: u64,
        info: DutInfo,
    },
    /// Answers `GetSysInfoState`: whether a prior `CollectSysInfo` has
    /// already populated the bundle's system-info cache.
    GetSysInfoStateResponse {
        request_id: u64,
        collected: bool,
    },
    /// Answers `CollectSysInfo`.
    CollectSysInfoResponse {
        request_id: u64,
        ok: bool,
        error: Option<String>,
    },
    /// Answers `DownloadPrivateBundles`.
    DownloadPrivateBundlesResponse {
        request_id: u64,
        ok: bool,
        error: Option<String>,
    },
    /// Answers `ListEntities` with every entity the bundle's registry
    /// declares (both tests and fixtures; the caller filters by kind and
    /// by pattern).
    ListEntitiesResponse {
        request_id: u64,
        entities: Vec<orchestrator_metadata::EntitySummary>,
    },
}

/// A message the driver sends to the runner subprocess.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "type")]
#[non_exhaustive]
pub enum ClientToRunner {
    RunTestsInit {
        run_config_json: String,
        debug_port: Option<u16>,
    },
    StackOperationResponse {
        request_id: u64,
        status: String,
        test_has_error: bool,
        fatal_error: Option<String>,
    },
    /// Requests board/runtime facts before planning a run.
    GetDutInfoRequest { request_id: u64 },
    /// Asks whether `CollectSysInfo` has already run this connection.
    GetSysInfoStateRequest { request_id: u64 },
    /// Asks the bundle to gather and cache system info (board logs,
    /// installed package versions, ...) for attachment to later failures.
    CollectSysInfoRequest { request_id: u64 },
    /// Asks the bundle to fetch any private (non-public) sub-bundles it
    /// declares, ahead of listing or running them.
    DownloadPrivateBundlesRequest { request_id: u64 },
    /// Requests the bundle's full entity registry.
    ListEntitiesRequest { request_id: u64 },
}

/// The stack operations the runner can request of the driver-owned combined
/// stack, sent as a `StackOperation` request and answered with a
/// `StackOperationResponse` carrying the same `request_id`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "kind")]
#[non_exhaustive]
pub enum StackOperationKind {
    Reset,
    PreTest { entity_name: SmolStr },
    PostTest { entity_name: SmolStr, has_error: bool },
    Status,
    SetDirty,
    Errors,
}

/// A tagged fixture value as it crosses the wire (see
/// `crate::fixture_stack::FixtureValue`).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "kind", content = "value")]
pub enum WireFixtureValue {
    Int(i64),
    Str(String),
    Bytes(Vec<u8>),
    Map(BTreeMap<String, WireFixtureValue>),
}

impl From<FixtureValue> for WireFixtureValue {
    fn from(value: FixtureValue) -> Self {
        match value {
            FixtureValue::Int(v) => WireFixtureValue::Int(v),
            FixtureValue::Str(v) => WireFixtureValue::Str(v),
            FixtureValue::Bytes(v) => WireFixtureValue::Bytes(v),
            FixtureValue::Map(m) => {
                WireFixtureValue::Map(m.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

impl From<WireFixtureValue> for FixtureValue {
    fn from(value: WireFixtureValue) -> Self {
        match value {
            WireFixtureValue::Int(v) => FixtureValue::Int(v),
            WireFixtureValue::Str(v) => FixtureValue::Str(v),
            WireFixtureValue::Bytes(v) => FixtureValue::Bytes(v),
            WireFixtureValue::Map(m) => {
                FixtureValue::Map(m.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

/// Reads and writes length-prefixed JSON frames over an async byte stream.
pub struct Codec;

impl Codec {
    /// Reads one frame and deserializes it as `T`. Returns `Ok(None)` on a
    /// clean EOF with no partial frame in flight.
    pub async fn read_frame<T, R>(reader: &mut R) -> Result<Option<T>, RunnerClientError>
    where
        T: for<'de> Deserialize<'de>,
        R: AsyncRead + Unpin,
    {
        let mut len_buf = [0u8; 4];
        match reader.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(error) if error.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(error) => return Err(RunnerClientError::Transport(error.to_string())),
        }
        let len = u32::from_be_bytes(len_buf);
        if len > MAX_FRAME_LEN {
            return Err(RunnerClientError::Protocol(format!(
                "frame length {len} exceeds maximum {MAX_FRAME_LEN}"
            )));
        }
        let mut buf = vec![0u8; len as usize];
        reader
            .read_exact(&mut buf)
            .await
            .map_err(|error| RunnerClientError::Transport(error.to_string()))?;
        let message = serde_json::from_slice(&buf)
            .map_err(|error| RunnerClientError::Protocol(format!("malformed frame: {error}")))?;
        Ok(Some(message))
    }

    /// Serializes `message` and writes it as one length-prefixed frame.
    pub async fn write_frame<T, W>(writer: &mut W, message: &T) -> Result<(), RunnerClientError>
    where
        T: Serialize,
        W: AsyncWrite + Unpin,
    {
        let payload = serde_json::to_vec(message)
            .map_err(|error| RunnerClientError::Protocol(error.to_string()))?;
        let len = u32::try_from(payload.len())
            .map_err(|_| RunnerClientError::Protocol("frame too large to encode".to_string()))?;
        writer
            .write_all(&len.to_be_bytes())
            .await
            .map_err(|error| RunnerClientError::Transport(error.to_string()))?;
        writer
            .write_all(&payload)
            .await
            .map_err(|error| RunnerClientError::Transport(error.to_string()))?;
        writer
            .flush()
            .await
            .map_err(|error| RunnerClientError::Transport(error.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frame_round_trips() {
        let mut buf = Vec::new();
        Codec::write_frame(&mut buf, &RunnerToClient::RunStart)
            .await
            .unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        let decoded: RunnerToClient = Codec::read_frame(&mut cursor).await.unwrap().unwrap();
        assert!(matches!(decoded, RunnerToClient::RunStart));
    }

    #[tokio::test]
    async fn clean_eof_with_no_frame_returns_none() {
        let mut cursor = std::io::Cursor::new(Vec::<u8>::new());
        let decoded: Option<RunnerToClient> = Codec::read_frame(&mut cursor).await.unwrap();
        assert!(decoded.is_none());
    }

    #[tokio::test]
    async fn oversized_frame_is_a_protocol_error() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(MAX_FRAME_LEN + 1).to_be_bytes());
        let mut cursor = std::io::Cursor::new(buf);
        let result: Result<Option<RunnerToClient>, _> = Codec::read_frame(&mut cursor).await;
        assert!(matches!(result, Err(RunnerClientError::Protocol(_))));
    }
}
