//! Records published by the public server directory.
//!
//! Fetching the directory over HTTP is left to the embedding application;
//! this module only understands the records and turns one into an address.

use serde::{Deserialize, Serialize};
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMetadata {
    pub hostname: String,
    pub tcp_port: u16,
    #[serde(default)]
    pub udp_port: Option<u16>,
    /// e.g. `"publicRandomRooms"`.
    pub room_mode: String,
    pub max_players_per_room: usize,
    pub max_rooms: usize,
}

impl ServerMetadata {
    pub fn parse_list(json: &str) -> Result<Vec<ServerMetadata>, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Resolves the hostname. This performs a blocking DNS lookup.
    pub fn resolve(&self) -> io::Result<SocketAddr> {
        (self.hostname.as_str(), self.tcp_port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no address found for {}", self.hostname),
                )
            })
    }
}
