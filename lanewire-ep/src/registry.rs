//! Endpoint identity map.
//!
//! Exactly one endpoint exists per remote peer id. The map owns its endpoints;
//! everything else refers to them by [`EpHandle`].

use hashbrown::hash_map::Entry;
use hashbrown::HashMap;
use lanewire_core::config::ConfigIndex;
use lanewire_core::error::{LanewireError, Result};
use lanewire_core::PeerId;
use tracing::{debug, error, trace};

use crate::endpoint::{EpHandle, Endpoint};
use crate::stub::StubTransport;

pub struct EndpointRegistry {
    // peer id -> endpoint
    eps: HashMap<PeerId, Endpoint>,
    max_endpoints: usize,
    next_serial: u64,
}

impl EndpointRegistry {
    #[must_use]
    pub fn new(max_endpoints: usize) -> Self {
        Self {
            eps: HashMap::new(),
            max_endpoints,
            next_serial: 1,
        }
    }

    /// Pre-size the map for `additional` peers.
    #[must_use]
    pub fn with_capacity(max_endpoints: usize, additional: usize) -> Self {
        Self {
            eps: HashMap::with_capacity(additional.min(max_endpoints)),
            max_endpoints,
            next_serial: 1,
        }
    }

    #[must_use]
    pub fn find(&self, peer_id: PeerId) -> Option<&Endpoint> {
        self.eps.get(&peer_id)
    }

    pub fn find_mut(&mut self, peer_id: PeerId) -> Option<&mut Endpoint> {
        self.eps.get_mut(&peer_id)
    }

    /// Endpoint behind `handle`. A handle outliving its endpoint resolves to
    /// nothing, even if the peer has a newer endpoint.
    #[must_use]
    pub fn get(&self, handle: EpHandle) -> Option<&Endpoint> {
        self.find(handle.peer_id()).filter(|ep| ep.handle() == handle)
    }

    pub fn get_mut(&mut self, handle: EpHandle) -> Option<&mut Endpoint> {
        self.find_mut(handle.peer_id()).filter(|ep| ep.handle() == handle)
    }

    /// Endpoint for `peer_id`, creating it with `config` if there is none.
    ///
    /// An existing endpoint is returned unchanged, even if its wireup has not
    /// finished. The flag is `true` when the endpoint was created here.
    pub fn create_or_get(
        &mut self,
        peer_id: PeerId,
        peer_name: Option<&str>,
        config: ConfigIndex,
    ) -> Result<(&mut Endpoint, bool)> {
        let len = self.eps.len();
        if !self.eps.contains_key(&peer_id) {
            if len >= self.max_endpoints {
                error!("[EP] cannot create endpoint to {:#x}: limit of {} reached", peer_id, self.max_endpoints);
                return Err(LanewireError::NoMemory("endpoint"));
            }
            self.eps.try_reserve(1).map_err(|e| {
                error!("[EP] failed to add endpoint {:#x} to the map: {:?}", peer_id, e);
                LanewireError::NoResource
            })?;
        }

        match self.eps.entry(peer_id) {
            Entry::Occupied(entry) => {
                trace!("[EP] found existing endpoint {}", entry.get().handle());
                Ok((entry.into_mut(), false))
            }
            Entry::Vacant(entry) => {
                let handle = EpHandle::new(peer_id, self.next_serial);
                self.next_serial += 1;
                let ep = entry.insert(Endpoint::new(handle, peer_name.map(str::to_owned), config));
                debug!(
                    "[EP] created endpoint {} to {}",
                    handle,
                    peer_name.unwrap_or("<unnamed>")
                );
                Ok((ep, true))
            }
        }
    }

    /// Endpoint for an unknown peer whose wireup has not finished.
    ///
    /// Lane 0 is bound to a [`StubTransport`] that buffers work until the real
    /// lanes exist. An existing endpoint is returned unchanged.
    pub fn create_stub(
        &mut self,
        peer_id: PeerId,
        peer_name: Option<&str>,
        stub_config: ConfigIndex,
    ) -> Result<(&mut Endpoint, bool)> {
        let (ep, created) = self.create_or_get(peer_id, peer_name, stub_config)?;
        if created {
            ep.bind_lane(0, Box::new(StubTransport::new()))?;
            ep.flags_mut().stub = true;
            debug!("[EP] endpoint {} is a stub", ep.handle());
        }
        Ok((ep, created))
    }

    /// Drop the mapping for `peer_id`. Removing an unknown peer is a no-op.
    pub fn remove(&mut self, peer_id: PeerId) -> Option<Endpoint> {
        self.eps.remove(&peer_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Endpoint> {
        self.eps.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Endpoint> {
        self.eps.values_mut()
    }

    /// Remove every endpoint.
    pub fn drain(&mut self) -> Vec<Endpoint> {
        self.eps.drain().map(|(_, ep)| ep).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.eps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.eps.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_endpoint_per_peer() {
        let mut registry = EndpointRegistry::new(16);
        let (ep, created) = registry.create_or_get(0x10, Some("a"), 0).unwrap();
        assert!(created);
        let first = ep.handle();

        let (ep, created) = registry.create_or_get(0x10, Some("b"), 3).unwrap();
        assert!(!created);
        assert_eq!(ep.handle(), first);
        assert_eq!(ep.peer_name(), Some("a"));
        assert_eq!(ep.config(), 0);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.find(0x10).map(Endpoint::handle), Some(first));
    }

    #[test]
    fn test_capacity_limit() {
        let mut registry = EndpointRegistry::new(1);
        registry.create_or_get(1, None, 0).unwrap();
        assert_eq!(
            registry.create_or_get(2, None, 0).unwrap_err(),
            LanewireError::NoMemory("endpoint")
        );
        // existing peers are still found at the limit
        assert!(registry.create_or_get(1, None, 0).is_ok());
    }

    #[test]
    fn test_stale_handle() {
        let mut registry = EndpointRegistry::new(4);
        let old = registry.create_or_get(7, None, 0).unwrap().0.handle();
        assert!(registry.remove(7).is_some());
        assert!(registry.remove(7).is_none());

        let new = registry.create_or_get(7, None, 0).unwrap().0.handle();
        assert_ne!(old, new);
        assert!(registry.get(old).is_none());
        assert!(registry.get(new).is_some());
    }

    #[test]
    fn test_stub_binds_placeholder_lane() {
        let mut registry = EndpointRegistry::new(4);
        let (ep, created) = registry.create_stub(9, None, 1).unwrap();
        assert!(created);
        assert!(ep.flags().stub);
        assert_eq!(ep.bound_lanes().bits(), 0b1);
        assert_eq!(ep.config(), 1);

        let (ep, created) = registry.create_stub(9, None, 1).unwrap();
        assert!(!created);
        assert!(ep.flags().stub);
        assert_eq!(registry.drain().len(), 1);
        assert!(registry.is_empty());
    }
}
