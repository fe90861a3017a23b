//! Typed state shared by the pipeline steps.
//!
//! Each field is written by exactly one step and read by later ones:
//!
//! | field | written by | read by |
//! |---|---|---|
//! | `datacenter_id` | create-server | create-server cleanup, snapshot |
//! | `volume_id` | create-server | snapshot |
//! | `instance_id` | create-server | snapshot, provisioners |
//! | `server_ip` | create-server | connect, provisioners |
//! | `snapshot_name` | snapshot | builder artifact |
//!
//! Apart from `datacenter_id`, a field is only set once the provider has
//! confirmed the resource it names.

use std::collections::BTreeMap;
use std::net::IpAddr;

use crate::cloud::types::{DatacenterId, ServerId, VolumeId};

/// Values produced by the pipeline for later steps and downstream consumers.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PipelineState {
    /// Data center holding every resource of the run. Recorded as soon as
    /// the creation call returns so rollback can reach it.
    pub datacenter_id: Option<DatacenterId>,
    /// Boot volume of the build server.
    pub volume_id: Option<VolumeId>,
    /// Build server.
    pub instance_id: Option<ServerId>,
    /// First address of the server's first NIC.
    pub server_ip: Option<IpAddr>,
    /// Name of the snapshot once it is available.
    pub snapshot_name: Option<String>,
    /// Message of the error that halted the pipeline.
    pub error: Option<String>,
}

impl PipelineState {
    /// Records the error that halted the pipeline. The first error wins.
    pub fn record_error(&mut self, message: impl Into<String>) {
        if self.error.is_none() {
            self.error = Some(message.into());
        }
    }

    /// Returns the populated entries keyed by their interpolation names.
    #[must_use]
    pub fn exports(&self) -> BTreeMap<&'static str, String> {
        let mut exports = BTreeMap::new();
        if let Some(id) = &self.datacenter_id {
            exports.insert("datacenter_id", id.to_string());
        }
        if let Some(id) = &self.volume_id {
            exports.insert("volume_id", id.to_string());
        }
        if let Some(id) = &self.instance_id {
            exports.insert("instance_id", id.to_string());
        }
        if let Some(ip) = &self.server_ip {
            exports.insert("server_ip", ip.to_string());
        }
        if let Some(name) = &self.snapshot_name {
            exports.insert("snapshot_name", name.clone());
        }
        exports
    }
}
