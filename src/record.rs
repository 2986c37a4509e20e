//! The instance record and its mapping onto store rows.
//!
//! The column names follow the schema of existing `tokens` tables. Note that
//! for historical reasons the `datacenter` column holds the *rack* while the
//! region-level datacenter lives in `location`.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

use crate::error::MalformedProblem;
use crate::error::MalformedRecord;
use crate::store::Attributes;
use crate::store::Row;

pub const CN_ID: &str = "Id";
pub const CN_APPID: &str = "appId";
pub const CN_AZ: &str = "availabilityZone";
pub const CN_DC: &str = "datacenter";
pub const CN_INSTANCEID: &str = "instanceId";
pub const CN_HOSTNAME: &str = "hostname";
pub const CN_EIP: &str = "elasticIP";
pub const CN_TOKEN: &str = "token";
pub const CN_LOCATION: &str = "location";
pub const CN_UPDATETIME: &str = "updatetime";
pub const CN_VOLUME_PREFIX: &str = "ssVolumes";

/// Everything a node knows about itself when it asks for an identity.
///
/// Supplied by whatever discovers the local environment, e.g. cloud instance
/// metadata.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceDescriptor {
    /// Logical cluster name.
    pub application: String,
    /// Failure domain, e.g. an availability zone.
    pub rack: String,
    /// Ordinal within the rack. Only unique together with application and rack.
    pub slot: u32,
    /// Provider-assigned machine id, doubles as the contender id when locking.
    pub instance_id: String,
    pub hostname: String,
    pub address: String,
    /// Region-level grouping, coarser than the rack.
    pub datacenter: String,
    /// Availability zone the instance runs in. Usually equal to `rack`.
    pub zone: String,
    /// Position on the hash ring. Assigned elsewhere, stored verbatim.
    pub token: String,
    /// Attached volumes keyed by path.
    #[serde(default)]
    pub volumes: BTreeMap<String, String>,
    /// Milliseconds since the epoch of the last write, set by the registry.
    #[serde(default)]
    pub updated_at: Option<u64>,
}

/// A persisted [`InstanceDescriptor`].
pub type InstanceRecord = InstanceDescriptor;

impl InstanceDescriptor {
    pub fn row_key(&self) -> RowKey {
        RowKey::new(&self.application, &self.rack, self.slot)
    }

    /// Flattens the descriptor into row attributes, one per field and one
    /// per volume.
    pub fn to_attributes(&self) -> Attributes {
        let mut attributes = Attributes::new();

        attributes.insert(CN_ID.to_string(), self.slot.to_string());
        attributes.insert(CN_APPID.to_string(), self.application.clone());
        attributes.insert(CN_AZ.to_string(), self.zone.clone());
        attributes.insert(CN_DC.to_string(), self.rack.clone());
        attributes.insert(CN_INSTANCEID.to_string(), self.instance_id.clone());
        attributes.insert(CN_HOSTNAME.to_string(), self.hostname.clone());
        attributes.insert(CN_EIP.to_string(), self.address.clone());
        attributes.insert(CN_TOKEN.to_string(), self.token.clone());
        attributes.insert(CN_LOCATION.to_string(), self.datacenter.clone());

        if let Some(updated_at) = self.updated_at {
            attributes.insert(CN_UPDATETIME.to_string(), updated_at.to_string());
        }

        for (path, volume) in &self.volumes {
            attributes.insert(volume_attribute(path), volume.clone());
        }

        attributes
    }

    pub fn from_row(row: &Row) -> Result<Self, MalformedRecord> {
        let required = |name: &'static str| {
            row.get(name)
                .map(str::to_string)
                .ok_or_else(|| MalformedRecord {
                    key: row.key.clone(),
                    problem: MalformedProblem::MissingAttribute(name),
                })
        };

        let slot = required(CN_ID)?.parse().map_err(|_| MalformedRecord {
            key: row.key.clone(),
            problem: MalformedProblem::NotAnInteger(CN_ID),
        })?;

        let updated_at = row.get(CN_UPDATETIME).and_then(|t| t.parse().ok());

        let prefix = volume_attribute("");
        let volumes = row
            .attributes
            .iter()
            .filter_map(|(name, value)| {
                name.strip_prefix(&prefix)
                    .map(|path| (path.to_string(), value.clone()))
            })
            .collect();

        Ok(Self {
            application: required(CN_APPID)?,
            rack: required(CN_DC)?,
            slot,
            instance_id: required(CN_INSTANCEID)?,
            hostname: required(CN_HOSTNAME)?,
            address: required(CN_EIP)?,
            datacenter: required(CN_LOCATION)?,
            zone: required(CN_AZ)?,
            token: required(CN_TOKEN)?,
            volumes,
            updated_at,
        })
    }
}

fn volume_attribute(path: &str) -> String {
    format!("{}_{}", CN_VOLUME_PREFIX, path)
}

/// Key of an instance record, `application_rack_slot`.
///
/// Also names the two lock rows guarding the record.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowKey(String);

impl RowKey {
    pub fn new(application: &str, rack: &str, slot: u32) -> Self {
        Self(format!("{}_{}_{}", application, rack, slot))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn choosing_key(&self) -> String {
        format!("{}-choosing", self.0)
    }

    pub fn lock_key(&self) -> String {
        format!("{}-lock", self.0)
    }
}

impl std::fmt::Display for RowKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&InstanceDescriptor> for RowKey {
    fn from(descriptor: &InstanceDescriptor) -> Self {
        descriptor.row_key()
    }
}
