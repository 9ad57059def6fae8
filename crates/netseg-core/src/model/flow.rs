//! Flow descriptors handed to the evaluator by the dataplane.

use std::net::IpAddr;

use super::rule::{Direction, Protocol};

/// One side of a flow. `group` is the endpoint group name when the caller
/// already knows it; otherwise the engine resolves it from membership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowEndpoint {
    pub ip: IpAddr,
    pub group: Option<String>,
}

impl FlowEndpoint {
    pub fn new(ip: IpAddr) -> Self {
        Self { ip, group: None }
    }

    pub fn in_group(ip: IpAddr, group: impl Into<String>) -> Self {
        Self {
            ip,
            group: Some(group.into()),
        }
    }
}

/// A flow as seen from the local endpoint: `In` means the local endpoint is
/// the destination, `Out` means it is the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowDescriptor {
    pub direction: Direction,
    pub protocol: Protocol,
    pub src: FlowEndpoint,
    pub dst: FlowEndpoint,
    /// Destination port; ignored for protocols without ports.
    pub port: Option<u16>,
}

impl FlowDescriptor {
    pub fn new(
        direction: Direction,
        protocol: Protocol,
        src: FlowEndpoint,
        dst: FlowEndpoint,
        port: Option<u16>,
    ) -> Self {
        Self {
            direction,
            protocol,
            src,
            dst,
            port,
        }
    }

    /// The side peer selectors are matched against.
    pub fn remote(&self) -> &FlowEndpoint {
        match self.direction {
            Direction::In => &self.src,
            Direction::Out => &self.dst,
        }
    }
}
