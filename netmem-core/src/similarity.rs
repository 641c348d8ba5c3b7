//! Decides whether two L2 networks are the same L3 network.
//!
//! A shared group hint (or cluster) is enough on its own. Without one, the
//! records must agree on their DNS servers and on every subnet both of them
//! know about. Confidence is a weighted agreement score folded into [0, 1] so
//! that SAME verdicts land above 0.5 and DIFFERENT ones below it.

use crate::model::{Field, NetworkAttributes, NetworkSameness};
use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr};

const WEIGHT_GROUP: f32 = 300.0;
const WEIGHT_V4_SUBNET: f32 = 300.0;
const WEIGHT_DNS: f32 = 200.0;
const WEIGHT_MTU: f32 = 50.0;
const TOTAL_WEIGHT: f32 = WEIGHT_GROUP + WEIGHT_V4_SUBNET + WEIGHT_DNS + WEIGHT_MTU;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Assessment {
    pub sameness: NetworkSameness,
    pub confidence: f32,
}

impl Assessment {
    /// Verdict when at least one side has never been seen.
    pub fn unknown() -> Self {
        Self {
            sameness: NetworkSameness::Different,
            confidence: 0.0,
        }
    }

    pub fn is_same(&self) -> bool {
        self.sameness == NetworkSameness::Same
    }
}

pub fn assess(a: &NetworkAttributes, b: &NetworkAttributes) -> Assessment {
    let hint = shares_hint(a, b);
    let v4_subnet = both(&a.assigned_v4_address, &b.assigned_v4_address)
        .map(|(x, y)| v4_subnet(*x) == v4_subnet(*y));
    let v6_subnet = both(&a.assigned_v6_prefix, &b.assigned_v6_prefix)
        .map(|(x, y)| x.network() == y.network() && x.prefix_length == y.prefix_length);
    let dns = both(&a.dns_addresses, &b.dns_addresses)
        .filter(|(x, y)| !x.is_empty() && !y.is_empty())
        .map(|(x, y)| dns_set(x) == dns_set(y));
    let mtu = both(&a.mtu, &b.mtu).map(|(x, y)| x == y);

    let mut score = 0.0;
    if hint {
        score += WEIGHT_GROUP;
    }
    if v4_subnet == Some(true) {
        score += WEIGHT_V4_SUBNET;
    }
    if dns == Some(true) {
        score += WEIGHT_DNS;
    }
    if mtu == Some(true) {
        score += WEIGHT_MTU;
    }

    let subnets_agree = (v4_subnet.is_some() || v6_subnet.is_some())
        && v4_subnet != Some(false)
        && v6_subnet != Some(false);
    let fingerprint = dns == Some(true) && subnets_agree;

    let fraction = score / TOTAL_WEIGHT;
    if hint || fingerprint {
        Assessment {
            sameness: NetworkSameness::Same,
            confidence: 0.5 + fraction / 2.0,
        }
    } else {
        Assessment {
            sameness: NetworkSameness::Different,
            // Keep DIFFERENT verdicts strictly under the SAME band.
            confidence: (fraction / 2.0).min(0.499),
        }
    }
}

fn shares_hint(a: &NetworkAttributes, b: &NetworkAttributes) -> bool {
    let same_hint =
        both(&a.group_hint, &b.group_hint).is_some_and(|(x, y)| !x.is_empty() && x == y);
    let same_cluster = matches!(
        (a.effective_cluster(), b.effective_cluster()),
        (Some(x), Some(y)) if x == y
    );
    same_hint || same_cluster
}

fn both<'a, T>(a: &'a Field<T>, b: &'a Field<T>) -> Option<(&'a T, &'a T)> {
    Some((a.value()?, b.value()?))
}

fn v4_subnet(address: Ipv4Addr) -> u32 {
    u32::from(address) & 0xFFFF_FF00
}

fn dns_set(addresses: &[IpAddr]) -> BTreeSet<IpAddr> {
    addresses.iter().copied().collect()
}
