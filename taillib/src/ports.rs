use crate::types::Port;
use std::net::{Ipv4Addr, TcpListener};

pub const MIN_PORT: Port = 8100;
pub const MAX_PORT: Port = 8500;

/// First port in `min..=max` that can be bound on localhost.
pub fn find_free_port(min: Port, max: Port) -> Option<Port> {
    (min..=max).find(|&port| is_port_open(port))
}

/// Whether nothing is bound to `port` on localhost.
pub fn is_port_open(port: Port) -> bool {
    TcpListener::bind((Ipv4Addr::LOCALHOST, port)).is_ok()
}
