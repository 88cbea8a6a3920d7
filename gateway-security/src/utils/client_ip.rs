use axum::{extract::ConnectInfo, http::Request};
use std::net::{IpAddr, SocketAddr};

pub const UNKNOWN_IP: &str = "0.0.0.0";

/// Best-effort client address: first parsable `X-Forwarded-For` entry, then
/// `X-Real-IP`, then the socket peer.
pub fn client_ip<B>(req: &Request<B>) -> String {
    let headers = req.headers();

    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').find_map(|part| part.trim().parse::<IpAddr>().ok()));

    let real_ip = || {
        headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<IpAddr>().ok())
    };

    let peer = || {
        req.extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip())
    };

    forwarded
        .or_else(real_ip)
        .or_else(peer)
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| UNKNOWN_IP.to_string())
}

pub fn user_agent<B>(req: &Request<B>) -> String {
    req.headers()
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}
