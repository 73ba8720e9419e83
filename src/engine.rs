//! In-process transport engine.
//!
//! This module realizes the transport the provider core is written against:
//! endpoint lookup by address, provider registration by numeric id,
//! registered bulk buffers with ranged read/write (the RDMA-style pull/push
//! consumed by transfer managers), and request dispatch that produces
//! exactly one result envelope per request. Several providers share one
//! engine, which is also the topology the migration tests run.

use crate::error::{Error, Result};
use crate::rpc::{Envelope, Request, ResponseValue};
use log::{debug, error};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

/// A resolved peer address, as returned by [`Engine::lookup`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    address: String,
}

impl Endpoint {
    pub fn address(&self) -> &str {
        &self.address
    }
}

/// Handle to a registered bulk buffer. The handle travels over the wire;
/// the buffer itself stays in the engine's bulk registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkHandle {
    id: u64,
    len: u64,
}

impl BulkHandle {
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Receives the requests the engine routes to a provider id.
pub trait RpcHandler: Send + Sync {
    fn handle(&self, sender: Endpoint, request: Request) -> Envelope<ResponseValue>;
}

#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

pub(crate) struct EngineInner {
    address: String,
    providers: Mutex<HashMap<u16, Weak<dyn RpcHandler>>>,
    bulks: Mutex<HashMap<u64, Arc<Mutex<Vec<u8>>>>>,
    next_bulk_id: AtomicU64,
    fileset_server: Mutex<Option<Weak<crate::fileset::FileSetServerInner>>>,
}

impl Engine {
    pub fn new(address: &str) -> Engine {
        Engine {
            inner: Arc::new(EngineInner {
                address: address.to_string(),
                providers: Mutex::new(HashMap::new()),
                bulks: Mutex::new(HashMap::new()),
                next_bulk_id: AtomicU64::new(1),
                fileset_server: Mutex::new(None),
            }),
        }
    }

    /// Address other processes would use to reach this engine.
    pub fn address(&self) -> &str {
        &self.inner.address
    }

    pub fn self_endpoint(&self) -> Endpoint {
        Endpoint {
            address: self.inner.address.clone(),
        }
    }

    /// Resolve an address string to an endpoint.
    pub fn lookup(&self, address: &str) -> Result<Endpoint> {
        if address == self.inner.address {
            Ok(Endpoint {
                address: address.to_string(),
            })
        } else {
            Err(Error::AddressNotFound(address.to_string()))
        }
    }

    /// Register a request handler under a provider id. Stale registrations
    /// (dropped handlers) are replaced silently.
    pub fn register_provider(&self, provider_id: u16, handler: Weak<dyn RpcHandler>) -> Result<()> {
        let mut providers = self.inner.providers.lock().unwrap();
        if let Some(existing) = providers.get(&provider_id) {
            if existing.upgrade().is_some() {
                return Err(Error::ProviderIdInUse(provider_id));
            }
        }
        providers.insert(provider_id, handler);
        debug!("Registered provider {} on engine {}", provider_id, self.inner.address);
        Ok(())
    }

    pub fn deregister_provider(&self, provider_id: u16) {
        self.inner.providers.lock().unwrap().remove(&provider_id);
        debug!("Deregistered provider {} from engine {}", provider_id, self.inner.address);
    }

    /// Register a buffer as bulk memory and hand back its wire handle.
    pub fn expose(&self, data: Vec<u8>) -> BulkHandle {
        let id = self.inner.next_bulk_id.fetch_add(1, Ordering::Relaxed);
        let len = data.len() as u64;
        self.inner
            .bulks
            .lock()
            .unwrap()
            .insert(id, Arc::new(Mutex::new(data)));
        BulkHandle { id, len }
    }

    /// Drop a registered bulk buffer, returning its final content.
    pub fn release(&self, handle: BulkHandle) -> Result<Vec<u8>> {
        let buffer = self
            .inner
            .bulks
            .lock()
            .unwrap()
            .remove(&handle.id)
            .ok_or(Error::BulkNotFound(handle.id))?;
        let content = buffer.lock().unwrap().clone();
        Ok(content)
    }

    fn bulk_buffer(&self, endpoint: &Endpoint, handle: &BulkHandle) -> Result<Arc<Mutex<Vec<u8>>>> {
        if endpoint.address != self.inner.address {
            return Err(Error::AddressNotFound(endpoint.address.clone()));
        }
        self.inner
            .bulks
            .lock()
            .unwrap()
            .get(&handle.id)
            .cloned()
            .ok_or(Error::BulkNotFound(handle.id))
    }

    /// One-sided pull: copy `dest.len()` bytes out of the remote buffer,
    /// starting at `offset`.
    pub fn bulk_read(
        &self,
        endpoint: &Endpoint,
        handle: &BulkHandle,
        offset: u64,
        dest: &mut [u8],
    ) -> Result<()> {
        let buffer = self.bulk_buffer(endpoint, handle)?;
        let buffer = buffer.lock().unwrap();
        let end = offset + dest.len() as u64;
        if end > buffer.len() as u64 {
            return Err(Error::BulkBounds {
                offset,
                needed: dest.len() as u64,
                size: buffer.len() as u64,
            });
        }
        dest.copy_from_slice(&buffer[offset as usize..end as usize]);
        Ok(())
    }

    /// One-sided push: copy `src` into the remote buffer at `offset`.
    pub fn bulk_write(
        &self,
        endpoint: &Endpoint,
        handle: &BulkHandle,
        offset: u64,
        src: &[u8],
    ) -> Result<()> {
        let buffer = self.bulk_buffer(endpoint, handle)?;
        let mut buffer = buffer.lock().unwrap();
        let end = offset + src.len() as u64;
        if end > buffer.len() as u64 {
            return Err(Error::BulkBounds {
                offset,
                needed: src.len() as u64,
                size: buffer.len() as u64,
            });
        }
        buffer[offset as usize..end as usize].copy_from_slice(src);
        Ok(())
    }

    /// Send a request to a provider and wait for its envelope.
    ///
    /// A panic inside the handler is contained here and converted into a
    /// failure envelope, so a misbehaving backend cannot take other RPCs
    /// down with it.
    pub fn send(&self, address: &str, provider_id: u16, request: Request) -> Envelope<ResponseValue> {
        let endpoint = match self.lookup(address) {
            Ok(ep) => ep,
            Err(e) => return Envelope::failure(e.to_string()),
        };
        let handler = {
            let providers = self.inner.providers.lock().unwrap();
            providers.get(&provider_id).and_then(|weak| weak.upgrade())
        };
        let handler = match handler {
            Some(h) => h,
            None => {
                return Envelope::failure(
                    Error::ProviderNotFound {
                        address: endpoint.address,
                        provider_id,
                    }
                    .to_string(),
                )
            }
        };
        let sender = self.self_endpoint();
        match catch_unwind(AssertUnwindSafe(|| handler.handle(sender, request))) {
            Ok(envelope) => envelope,
            Err(_) => {
                error!("RPC handler for provider {} panicked", provider_id);
                Envelope::failure("RPC handler panicked")
            }
        }
    }

    pub(crate) fn set_fileset_server(&self, server: Weak<crate::fileset::FileSetServerInner>) {
        *self.inner.fileset_server.lock().unwrap() = Some(server);
    }

    pub(crate) fn fileset_server(&self) -> Option<Arc<crate::fileset::FileSetServerInner>> {
        self.inner
            .fileset_server
            .lock()
            .unwrap()
            .as_ref()
            .and_then(|weak| weak.upgrade())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_self() {
        let engine = Engine::new("local://unit");
        let ep = engine.lookup("local://unit").unwrap();
        assert_eq!(ep.address(), "local://unit");
        assert!(engine.lookup("local://elsewhere").is_err());
    }

    #[test]
    fn test_bulk_read_write_round_trip() {
        let engine = Engine::new("local://unit");
        let handle = engine.expose(vec![0u8; 8]);
        let ep = engine.self_endpoint();

        engine.bulk_write(&ep, &handle, 2, b"abcd").unwrap();
        let mut out = [0u8; 4];
        engine.bulk_read(&ep, &handle, 2, &mut out).unwrap();
        assert_eq!(&out, b"abcd");

        let content = engine.release(handle).unwrap();
        assert_eq!(&content[2..6], b"abcd");
    }

    #[test]
    fn test_bulk_bounds_checked() {
        let engine = Engine::new("local://unit");
        let handle = engine.expose(vec![0u8; 4]);
        let ep = engine.self_endpoint();

        let mut out = [0u8; 4];
        assert!(engine.bulk_read(&ep, &handle, 2, &mut out).is_err());
        assert!(engine.bulk_write(&ep, &handle, 3, b"ab").is_err());
    }

    #[test]
    fn test_send_to_unknown_provider_fails() {
        let engine = Engine::new("local://unit");
        let env = engine.send(
            "local://unit",
            9,
            Request::CheckTarget {
                target_id: uuid::Uuid::nil(),
            },
        );
        assert!(!env.success);
        assert!(env.error.contains("9"));
    }
}
