//! Record model shared by the engines, the record store and the public facade.

use crate::error::{NetMemError, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Presence-tagged attribute value.
///
/// `Absent` means "this write says nothing about the field"; it never clears a
/// stored value. On the wire it is an optional value.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(
    from = "Option<T>",
    into = "Option<T>",
    bound(
        serialize = "T: Serialize + Clone",
        deserialize = "T: Deserialize<'de>"
    )
)]
pub enum Field<T> {
    #[default]
    Absent,
    Present(T),
}

impl<T> Field<T> {
    pub fn is_present(&self) -> bool {
        matches!(self, Field::Present(_))
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Field::Absent)
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Field::Present(value) => Some(value),
            Field::Absent => None,
        }
    }

    /// Keep this value if present, otherwise fall back to `existing`.
    pub fn or(self, existing: Field<T>) -> Field<T> {
        match self {
            Field::Present(value) => Field::Present(value),
            Field::Absent => existing,
        }
    }
}

impl<T> From<Option<T>> for Field<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => Field::Present(value),
            None => Field::Absent,
        }
    }
}

impl<T> From<Field<T>> for Option<T> {
    fn from(value: Field<T>) -> Self {
        match value {
            Field::Present(value) => Some(value),
            Field::Absent => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ipv6Prefix {
    pub address: Ipv6Addr,
    pub prefix_length: u8,
}

impl Ipv6Prefix {
    /// The prefix with host bits cleared.
    pub fn network(&self) -> Ipv6Addr {
        let length = u32::from(self.prefix_length.min(128));
        let mask = if length == 0 {
            0
        } else {
            u128::MAX << (128 - length)
        };
        Ipv6Addr::from(u128::from(self.address) & mask)
    }
}

/// Provisioning facts remembered for one L2 network.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkAttributes {
    #[serde(skip_serializing_if = "Field::is_absent")]
    pub assigned_v4_address: Field<Ipv4Addr>,
    #[serde(skip_serializing_if = "Field::is_absent")]
    pub assigned_v4_address_expiry: Field<i64>,
    #[serde(skip_serializing_if = "Field::is_absent")]
    pub group_hint: Field<String>,
    /// Explicit cluster. When absent the record is grouped by `group_hint`.
    #[serde(skip_serializing_if = "Field::is_absent")]
    pub cluster: Field<String>,
    #[serde(skip_serializing_if = "Field::is_absent")]
    pub dns_addresses: Field<Vec<IpAddr>>,
    #[serde(skip_serializing_if = "Field::is_absent")]
    pub mtu: Field<u32>,
    #[serde(skip_serializing_if = "Field::is_absent")]
    pub assigned_v6_prefix: Field<Ipv6Prefix>,
    /// Absolute expiry in ms. Never inherited on merge.
    #[serde(skip_serializing_if = "Field::is_absent")]
    pub expiry: Field<i64>,
}

impl NetworkAttributes {
    pub fn is_empty(&self) -> bool {
        self.assigned_v4_address.is_absent()
            && self.assigned_v4_address_expiry.is_absent()
            && self.group_hint.is_absent()
            && self.cluster.is_absent()
            && self.dns_addresses.is_absent()
            && self.mtu.is_absent()
            && self.assigned_v6_prefix.is_absent()
            && self.expiry.is_absent()
    }

    /// Cluster the record belongs to: the explicit one, else the group hint.
    pub fn effective_cluster(&self) -> Option<&str> {
        self.cluster
            .value()
            .or(self.group_hint.value())
            .map(String::as_str)
            .filter(|cluster| !cluster.is_empty())
    }

    pub fn with_assigned_v4_address(mut self, address: Ipv4Addr) -> Self {
        self.assigned_v4_address = Field::Present(address);
        self
    }

    pub fn with_assigned_v4_address_expiry(mut self, expiry: i64) -> Self {
        self.assigned_v4_address_expiry = Field::Present(expiry);
        self
    }

    pub fn with_group_hint(mut self, hint: impl Into<String>) -> Self {
        self.group_hint = Field::Present(hint.into());
        self
    }

    pub fn with_cluster(mut self, cluster: impl Into<String>) -> Self {
        self.cluster = Field::Present(cluster.into());
        self
    }

    pub fn with_dns_addresses(mut self, addresses: Vec<IpAddr>) -> Self {
        self.dns_addresses = Field::Present(addresses);
        self
    }

    pub fn with_mtu(mut self, mtu: u32) -> Self {
        self.mtu = Field::Present(mtu);
        self
    }

    pub fn with_assigned_v6_prefix(mut self, prefix: Ipv6Prefix) -> Self {
        self.assigned_v6_prefix = Field::Present(prefix);
        self
    }

    pub fn with_expiry(mut self, expiry: i64) -> Self {
        self.expiry = Field::Present(expiry);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tombstone {
    pub deleted_at: i64,
    /// After this instant the record is gone for good.
    pub purge_after: i64,
}

/// One row of the attributes table.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributesRecord {
    pub l2_key: String,
    /// Merged attributes; `expiry` is always present.
    pub attributes: NetworkAttributes,
    pub tombstone: Option<Tombstone>,
}

impl AttributesRecord {
    pub fn expiry(&self) -> i64 {
        self.attributes.expiry.value().copied().unwrap_or(i64::MIN)
    }

    pub fn cluster(&self) -> Option<&str> {
        self.attributes.effective_cluster()
    }

    /// Visible to retrieval: not tombstoned and not expired.
    pub fn is_live(&self, now: i64) -> bool {
        self.tombstone.is_none() && self.expiry() > now
    }

    /// Usable as the "existing" side of a merge or a similarity lookup.
    pub fn is_recallable(&self, now: i64) -> bool {
        match self.tombstone {
            Some(tombstone) => now < tombstone.purge_after,
            None => self.expiry() > now,
        }
    }

    /// Eligible for physical removal by the sweeper.
    pub fn is_purgeable(&self, now: i64) -> bool {
        !self.is_recallable(now)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlobKey {
    pub l2_key: String,
    pub client_id: String,
    pub name: String,
}

impl BlobKey {
    pub fn new(
        l2_key: impl Into<String>,
        client_id: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            l2_key: l2_key.into(),
            client_id: client_id.into(),
            name: name.into(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_l2_key(&self.l2_key)?;
        if self.client_id.is_empty() {
            return Err(NetMemError::InvalidArgument(
                "client id cannot be empty".to_string(),
            ));
        }
        if self.name.is_empty() {
            return Err(NetMemError::InvalidArgument(
                "blob name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlobRecord {
    pub key: BlobKey,
    pub data: Bytes,
    pub expiry: i64,
}

/// Cause of a neighbor-unreachability failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum EventType {
    NudFailureRoam = 0,
    NudFailureConfirm = 1,
    NudFailureOrganic = 2,
    NudFailureMacAddressChanged = 3,
}

impl EventType {
    pub fn code(self) -> i32 {
        self as i32
    }
}

impl TryFrom<i32> for EventType {
    type Error = NetMemError;

    fn try_from(code: i32) -> Result<Self> {
        match code {
            0 => Ok(EventType::NudFailureRoam),
            1 => Ok(EventType::NudFailureConfirm),
            2 => Ok(EventType::NudFailureOrganic),
            3 => Ok(EventType::NudFailureMacAddressChanged),
            other => Err(NetMemError::InvalidArgument(format!(
                "unknown event type {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkEvent {
    pub cluster: String,
    pub timestamp: i64,
    pub expiry: i64,
    pub event_type: EventType,
}

/// Status code carried to listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum Status {
    Success = 0,
    Internal = -1,
    InvalidArgument = -2,
    IoFailure = -3,
    NotFound = -4,
}

impl Status {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn is_success(self) -> bool {
        self == Status::Success
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::Success => "SUCCESS",
            Status::Internal => "INTERNAL",
            Status::InvalidArgument => "INVALID_ARGUMENT",
            Status::IoFailure => "IO_FAILURE",
            Status::NotFound => "NOT_FOUND",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkSameness {
    Same,
    Different,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SameL3NetworkResponse {
    pub l2_key1: String,
    pub l2_key2: String,
    pub sameness: NetworkSameness,
    /// 0.0 (no evidence) to 1.0; SAME verdicts are always above 0.5.
    pub confidence: f32,
}

/// Result of `delete` and `delete_cluster`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub status: Status,
    /// Attribute records that went from visible to deleted.
    pub affected: u32,
}

impl DeleteOutcome {
    pub fn succeeded(affected: u32) -> Self {
        Self {
            status: Status::Success,
            affected,
        }
    }
}

pub fn validate_l2_key(l2_key: &str) -> Result<()> {
    if l2_key.is_empty() {
        return Err(NetMemError::InvalidArgument(
            "l2 key cannot be empty".to_string(),
        ));
    }
    Ok(())
}

pub fn validate_cluster(cluster: &str) -> Result<()> {
    if cluster.is_empty() {
        return Err(NetMemError::InvalidArgument(
            "cluster cannot be empty".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_or_prefers_present() {
        assert_eq!(Field::Present(1).or(Field::Present(2)), Field::Present(1));
        assert_eq!(Field::Absent.or(Field::Present(2)), Field::Present(2));
        assert_eq!(Field::<i32>::Absent.or(Field::Absent), Field::Absent);
    }

    #[test]
    fn test_absent_fields_are_omitted_from_json() {
        let attrs = NetworkAttributes::default().with_mtu(1500);
        let json = serde_json::to_string(&attrs).unwrap();
        assert_eq!(json, r#"{"mtu":1500}"#);

        let decoded: NetworkAttributes = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.mtu, Field::Present(1500));
        assert!(decoded.dns_addresses.is_absent());
    }

    #[test]
    fn test_event_type_codes() {
        assert_eq!(EventType::NudFailureRoam.code(), 0);
        assert_eq!(EventType::NudFailureMacAddressChanged.code(), 3);
        assert_eq!(EventType::try_from(2).unwrap(), EventType::NudFailureOrganic);
        assert!(matches!(
            EventType::try_from(4),
            Err(NetMemError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_ipv6_prefix_network() {
        let prefix = Ipv6Prefix {
            address: "2001:db8:1:2:aaaa:bbbb:cccc:dddd".parse().unwrap(),
            prefix_length: 64,
        };
        assert_eq!(prefix.network(), "2001:db8:1:2::".parse::<Ipv6Addr>().unwrap());
    }

    #[test]
    fn test_record_visibility() {
        let record = AttributesRecord {
            l2_key: "k".to_string(),
            attributes: NetworkAttributes::default().with_expiry(100),
            tombstone: None,
        };
        assert!(record.is_live(99));
        assert!(!record.is_live(100));
        assert!(record.is_purgeable(100));

        let tombstoned = AttributesRecord {
            tombstone: Some(Tombstone {
                deleted_at: 50,
                purge_after: 150,
            }),
            ..record
        };
        assert!(!tombstoned.is_live(60));
        assert!(tombstoned.is_recallable(120));
        assert!(tombstoned.is_purgeable(150));
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(Status::Success.code(), 0);
        assert_eq!(Status::NotFound.to_string(), "NOT_FOUND");
        assert!(!Status::IoFailure.is_success());
    }
}
