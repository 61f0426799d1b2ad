use std::net::SocketAddr;

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::request::Parts;
use axum::http::HeaderMap;

use crate::error::GatewayError;
use crate::AppState;

/// How a caller's identity is derived from the connection.
///
/// Identity is the network origin, which is weak: anyone who can reach the
/// gateway from an unused address gets a key, and `X-Forwarded-For` is
/// client-controlled unless a trusted proxy overwrites it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentitySource {
    /// Peer IP of the accepted TCP connection.
    PeerAddress,
    /// First `X-Forwarded-For` hop, falling back to the peer IP.
    ForwardedFor,
}

impl IdentitySource {
    pub fn from_config(trust_forwarded_for: bool) -> Self {
        if trust_forwarded_for {
            IdentitySource::ForwardedFor
        } else {
            IdentitySource::PeerAddress
        }
    }

    pub fn identify(&self, headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
        if *self == IdentitySource::ForwardedFor {
            let forwarded = headers
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .map(str::trim)
                .filter(|v| !v.is_empty());
            if let Some(ip) = forwarded {
                return Some(ip.to_string());
            }
        }
        peer.map(|addr| addr.ip().to_string())
    }
}

/// Extractor for the identity of the caller making this request.
#[derive(Debug, Clone)]
pub struct CallerIdentity(pub String);

impl FromRequestParts<AppState> for CallerIdentity {
    type Rejection = GatewayError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);

        state
            .identity
            .identify(&parts.headers, peer)
            .map(CallerIdentity)
            .ok_or_else(|| GatewayError::Internal("caller address unavailable".into()))
    }
}
