//! Field-level merge of attribute writes.

use crate::model::{Field, NetworkAttributes};

/// Merge `incoming` over `existing`.
///
/// Present incoming fields win, absent ones inherit. Expiry is never inherited:
/// it comes from the write or, failing that, `now + default_lease_ms`. Only an
/// explicitly written cluster is kept; a record without one is grouped by its
/// current group hint (see [`NetworkAttributes::effective_cluster`]).
pub fn merge_attributes(
    existing: Option<&NetworkAttributes>,
    incoming: NetworkAttributes,
    now: i64,
    default_lease_ms: i64,
) -> NetworkAttributes {
    let base = existing.cloned().unwrap_or_default();

    let expiry = match incoming.expiry {
        Field::Present(expiry) => expiry,
        Field::Absent => now.saturating_add(default_lease_ms),
    };

    NetworkAttributes {
        assigned_v4_address: incoming.assigned_v4_address.or(base.assigned_v4_address),
        assigned_v4_address_expiry: incoming
            .assigned_v4_address_expiry
            .or(base.assigned_v4_address_expiry),
        group_hint: incoming.group_hint.or(base.group_hint),
        cluster: incoming.cluster.or(base.cluster),
        dns_addresses: incoming.dns_addresses.or(base.dns_addresses),
        mtu: incoming.mtu.or(base.mtu),
        assigned_v6_prefix: incoming.assigned_v6_prefix.or(base.assigned_v6_prefix),
        expiry: Field::Present(expiry),
    }
}
