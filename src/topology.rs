//! Per-parent address allocation.
//!
//! A parent owns one [`TopologyRegistry`] per [`TopologyDomain`] (link
//! numbers, satellite addresses, ports, names, ...). Children reserve their
//! address while their transaction validates. A member that re-registers
//! with a different address is moved, never duplicated, so capacity is only
//! consumed once per member.
//!
//! Members are keyed by [`ObjectId`]. The object tree releases every
//! reservation a member holds when the node is removed, so an aborted,
//! never-committed child cannot leave a stale address behind.
//!
//! ```rust
//! use rs_trainz_fleet::mo::ObjectId;
//! use rs_trainz_fleet::topology::{TopologyError, TopologyRegistry};
//!
//! let mut links = TopologyRegistry::bounded(2);
//! links.add(ObjectId(1), 0).unwrap();
//! assert!(matches!(links.add(ObjectId(2), 0), Err(TopologyError::AddressInUse { .. })));
//!
//! // Moving a member does not use another slot.
//! links.add(ObjectId(1), 1).unwrap();
//! assert_eq!(links.len(), 1);
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::mo::ObjectId;

// ============================================================================
// Domains
// ============================================================================

/// An address space among siblings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TopologyDomain {
    /// Sibling system names.
    SystemName,
    /// Decoder URIs.
    DecoderUri,
    /// Decoder MAC addresses.
    DecoderMac,
    /// Light group link numbers.
    LightgroupsLink,
    /// Satellite link numbers.
    SatelliteLink,
    /// Light group addresses on a link.
    LightGroupAddress,
    /// Satellite addresses on a link.
    SatelliteAddress,
    /// Sensor ports on a satellite.
    SensorPort,
    /// Actuator ports on a satellite.
    ActuatorPort,
}

impl TopologyDomain {
    /// Maximum number of members, `None` for unbounded.
    pub fn capacity(&self) -> Option<usize> {
        match self {
            Self::SystemName | Self::DecoderUri | Self::DecoderMac => None,
            Self::LightgroupsLink => Some(1),
            Self::SatelliteLink => Some(2),
            Self::LightGroupAddress => Some(64),
            Self::SatelliteAddress => Some(8),
            Self::SensorPort => Some(8),
            Self::ActuatorPort => Some(4),
        }
    }

    /// Canonical form of an address, so equivalent spellings collide.
    pub fn canonical(&self, address: String) -> String {
        match self {
            Self::DecoderMac => address.to_ascii_uppercase(),
            _ => address,
        }
    }
}

impl fmt::Display for TopologyDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::SystemName => "system name",
            Self::DecoderUri => "decoder URI",
            Self::DecoderMac => "decoder MAC",
            Self::LightgroupsLink => "light group link",
            Self::SatelliteLink => "satellite link",
            Self::LightGroupAddress => "light group address",
            Self::SatelliteAddress => "satellite address",
            Self::SensorPort => "sensor port",
            Self::ActuatorPort => "actuator port",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Registry failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TopologyError {
    /// Another member holds the address.
    #[error("address {address} is held by object {holder}")]
    AddressInUse {
        /// Contested address.
        address: String,
        /// Current holder.
        holder: ObjectId,
    },
    /// The registry is full.
    #[error("no free slot, capacity {max}")]
    NoResources {
        /// Capacity of the registry.
        max: usize,
    },
}

#[derive(Clone, Debug)]
struct Entry<A> {
    member: ObjectId,
    address: A,
}

/// Address reservations among the children of one parent.
#[derive(Clone, Debug)]
pub struct TopologyRegistry<A> {
    capacity: Option<usize>,
    entries: Vec<Entry<A>>,
}

impl<A: Clone + PartialEq + fmt::Display> TopologyRegistry<A> {
    /// Registry without a member limit.
    pub fn unbounded() -> Self {
        Self {
            capacity: None,
            entries: Vec::new(),
        }
    }

    /// Registry holding at most `max` members.
    pub fn bounded(max: usize) -> Self {
        Self {
            capacity: Some(max),
            entries: Vec::new(),
        }
    }

    /// Reserves `address` for `member`.
    ///
    /// Re-registering a member moves it to the new address in place.
    pub fn add(&mut self, member: ObjectId, address: A) -> Result<(), TopologyError> {
        if let Some(holder) = self.holder(&address) {
            if holder != member {
                return Err(TopologyError::AddressInUse {
                    address: address.to_string(),
                    holder,
                });
            }
            return Ok(());
        }
        if let Some(entry) = self.entries.iter_mut().find(|e| e.member == member) {
            entry.address = address;
            return Ok(());
        }
        if let Some(max) = self.capacity {
            if self.entries.len() >= max {
                return Err(TopologyError::NoResources { max });
            }
        }
        self.entries.push(Entry { member, address });
        Ok(())
    }

    /// Releases the member's reservation, returning its address.
    pub fn remove(&mut self, member: ObjectId) -> Option<A> {
        let index = self.entries.iter().position(|e| e.member == member)?;
        Some(self.entries.remove(index).address)
    }

    /// Member holding `address`.
    pub fn holder(&self, address: &A) -> Option<ObjectId> {
        self.entries
            .iter()
            .find(|e| &e.address == address)
            .map(|e| e.member)
    }

    /// Address held by `member`.
    pub fn address_of(&self, member: ObjectId) -> Option<&A> {
        self.entries
            .iter()
            .find(|e| e.member == member)
            .map(|e| &e.address)
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// No members.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Member limit, `None` for unbounded.
    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Remaining slots, `None` for unbounded.
    pub fn free(&self) -> Option<usize> {
        self.capacity.map(|max| max.saturating_sub(self.entries.len()))
    }

    /// Iterates `(member, address)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (ObjectId, &A)> {
        self.entries.iter().map(|e| (e.member, &e.address))
    }
}

// ============================================================================
// Per-parent table
// ============================================================================

/// All registries owned by one parent, created on first use.
#[derive(Clone, Debug, Default)]
pub struct TopologyTable {
    registries: BTreeMap<TopologyDomain, TopologyRegistry<String>>,
}

impl TopologyTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves an address in a domain.
    pub fn reserve(
        &mut self,
        domain: TopologyDomain,
        member: ObjectId,
        address: String,
    ) -> Result<(), TopologyError> {
        self.registries
            .entry(domain)
            .or_insert_with(|| match domain.capacity() {
                Some(max) => TopologyRegistry::bounded(max),
                None => TopologyRegistry::unbounded(),
            })
            .add(member, address)
    }

    /// Registry for a domain, if anything was ever reserved in it.
    pub fn registry(&self, domain: TopologyDomain) -> Option<&TopologyRegistry<String>> {
        self.registries.get(&domain)
    }

    /// Address held by `member` in a domain.
    pub fn address_of(&self, domain: TopologyDomain, member: ObjectId) -> Option<&String> {
        self.registries.get(&domain)?.address_of(member)
    }

    /// Releases the member in one domain.
    pub fn release(&mut self, domain: TopologyDomain, member: ObjectId) -> Option<String> {
        self.registries.get_mut(&domain)?.remove(member)
    }

    /// Releases everything the member holds; returns the number of entries.
    pub fn release_all(&mut self, member: ObjectId) -> usize {
        self.registries
            .values_mut()
            .filter_map(|r| r.remove(member))
            .count()
    }
}
