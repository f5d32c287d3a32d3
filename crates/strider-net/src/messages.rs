//! Messages exchanged between a predicting client and the authoritative server
//!
//! The transport is left to the caller. Every message is serde-serializable,
//! and [`encode`]/[`decode`] give a JSON encoding for transports that want text.

use glam::{Quat, Vec3};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use strider_core::SurfaceId;
use strider_movement::MoveFlags;

use crate::error::NetError;

/// One predicted move, sent by the client after simulating it locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientMove {
    pub timestamp: f32,
    pub delta_time: f32,
    pub acceleration: Vec3,
    /// End location, relative to `base` when the base can move
    pub location: Vec3,
    pub base: Option<SurfaceId>,
    pub bone: Option<String>,
    pub packed_mode: u8,
    pub flags: MoveFlags,
}

/// Authoritative state the client must snap to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerAdjustment {
    pub timestamp: f32,
    pub ack_good_move: bool,
    pub delta_time: f32,
    pub new_location: Vec3,
    pub new_velocity: Vec3,
    pub new_rotation: Quat,
    pub new_base: Option<SurfaceId>,
    pub bone: Option<String>,
    pub has_base: bool,
    /// `new_location` is relative to `new_base`
    pub base_relative: bool,
    pub server_mode: u8,
}

/// Server verdict on a client move.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerResponse {
    AckGoodMove { timestamp: f32 },
    Adjust(ServerAdjustment),
}

impl ServerResponse {
    pub fn timestamp(&self) -> f32 {
        match self {
            ServerResponse::AckGoodMove { timestamp } => *timestamp,
            ServerResponse::Adjust(adjustment) => adjustment.timestamp,
        }
    }

    pub fn is_correction(&self) -> bool {
        matches!(self, ServerResponse::Adjust(_))
    }
}

pub fn encode<T: Serialize>(message: &T) -> Result<String, NetError> {
    Ok(serde_json::to_string(message)?)
}

pub fn decode<T: DeserializeOwned>(text: &str) -> Result<T, NetError> {
    Ok(serde_json::from_str(text)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adjustment_survives_json() {
        let response = ServerResponse::Adjust(ServerAdjustment {
            timestamp: 1.5,
            ack_good_move: false,
            delta_time: 0.016,
            new_location: Vec3::new(1.0, 2.0, 3.0),
            new_velocity: Vec3::X,
            new_rotation: Quat::IDENTITY,
            new_base: Some(SurfaceId(7)),
            bone: None,
            has_base: true,
            base_relative: false,
            server_mode: 1,
        });
        let text = encode(&response).unwrap();
        let decoded: ServerResponse = decode(&text).unwrap();
        assert_eq!(decoded, response);
        assert!(decoded.is_correction());
        assert_eq!(decoded.timestamp(), 1.5);
    }

    #[test]
    fn test_decode_garbage_is_an_error() {
        let result: Result<ClientMove, _> = decode("{\"timestamp\":");
        assert!(matches!(result, Err(NetError::Serialization(_))));
    }
}
