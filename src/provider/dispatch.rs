//! Binds each wire verb to an internal operation.
//!
//! Every request, whatever happens inside it, produces exactly one result
//! envelope: the single exit point below converts the operation's
//! `Result` into the envelope, and panics are contained one level up at
//! the engine boundary.

use crate::backend::total_length;
use crate::engine::{Endpoint, RpcHandler};
use crate::error::Result;
use crate::provider::{migration, ProviderInner};
use crate::rpc::{Envelope, Request, ResponseValue};
use log::{debug, error};

impl RpcHandler for ProviderInner {
    fn handle(&self, sender: Endpoint, request: Request) -> Envelope<ResponseValue> {
        let verb = request.verb();
        debug!("[provider:{}] received {} request", self.provider_id, verb);
        match self.execute(sender, request) {
            Ok(value) => {
                debug!("[provider:{}] {} completed", self.provider_id, verb);
                Envelope::ok(value)
            }
            Err(e) => {
                error!("[provider:{}] {} failed: {}", self.provider_id, verb, e);
                Envelope::failure(e.to_string())
            }
        }
    }
}

impl ProviderInner {
    fn execute(&self, sender: Endpoint, request: Request) -> Result<ResponseValue> {
        match request {
            Request::AddTarget {
                target_type,
                config,
            } => self
                .add_target(&target_type, &config)
                .map(ResponseValue::TargetId),

            Request::RemoveTarget { target_id } => self
                .remove_target(&target_id)
                .map(|_| ResponseValue::Acknowledged(true)),

            Request::DestroyTarget { target_id } => self
                .destroy_target(&target_id)
                .map(|_| ResponseValue::Acknowledged(true)),

            Request::AddTransferManager {
                name,
                tm_type,
                config,
            } => self
                .add_transfer_manager(&name, &tm_type, &config)
                .map(|_| ResponseValue::Acknowledged(true)),

            Request::MigrateTarget {
                target_id,
                dest_address,
                dest_provider_id,
                options,
            } => migration::migrate(self, &target_id, &dest_address, dest_provider_id, &options)
                .map(|_| ResponseValue::Acknowledged(true)),

            Request::CheckTarget { target_id } => self
                .find_target(&target_id)
                .map(|_| ResponseValue::Acknowledged(true)),

            Request::Create { target_id, size } => {
                let entry = self.find_target(&target_id)?;
                let region = entry.backend.create(size)?;
                Ok(ResponseValue::Region(region.region_id()))
            }

            Request::Write {
                target_id,
                region_id,
                segments,
                bulk,
                address,
                bulk_offset,
                persist,
            } => {
                let entry = self.find_target(&target_id)?;
                let mut region = entry.backend.open_write(&region_id, persist)?;
                let source = self.resolve_source(sender, &address)?;
                entry.transfer_manager.pull(
                    region.as_mut(),
                    &segments,
                    &bulk,
                    &source,
                    bulk_offset,
                    persist,
                )?;
                Ok(ResponseValue::Acknowledged(true))
            }

            Request::WriteEager {
                target_id,
                region_id,
                segments,
                data,
                persist,
            } => {
                let entry = self.find_target(&target_id)?;
                let mut region = entry.backend.open_write(&region_id, persist)?;
                region.write(&segments, &data, persist)?;
                Ok(ResponseValue::Acknowledged(true))
            }

            Request::Persist {
                target_id,
                region_id,
                segments,
            } => {
                let entry = self.find_target(&target_id)?;
                let mut region = entry.backend.open_write(&region_id, true)?;
                region.persist(&segments)?;
                Ok(ResponseValue::Acknowledged(true))
            }

            Request::CreateWrite {
                target_id,
                bulk,
                address,
                bulk_offset,
                size,
                persist,
            } => {
                let entry = self.find_target(&target_id)?;
                let mut region = entry.backend.create(size)?;
                let region_id = region.region_id();
                let source = self.resolve_source(sender, &address)?;
                entry.transfer_manager.pull(
                    region.as_mut(),
                    &[(0, size)],
                    &bulk,
                    &source,
                    bulk_offset,
                    persist,
                )?;
                Ok(ResponseValue::Region(region_id))
            }

            Request::CreateWriteEager {
                target_id,
                data,
                persist,
            } => {
                let entry = self.find_target(&target_id)?;
                let mut region = entry.backend.create(data.len() as u64)?;
                let region_id = region.region_id();
                region.write(&[(0, data.len() as u64)], &data, persist)?;
                Ok(ResponseValue::Region(region_id))
            }

            Request::Read {
                target_id,
                region_id,
                segments,
                bulk,
                address,
                bulk_offset,
            } => {
                let entry = self.find_target(&target_id)?;
                let mut region = entry.backend.open_read(&region_id)?;
                let source = self.resolve_source(sender, &address)?;
                entry.transfer_manager.push(
                    region.as_mut(),
                    &segments,
                    &bulk,
                    &source,
                    bulk_offset,
                )?;
                Ok(ResponseValue::Acknowledged(true))
            }

            Request::ReadEager {
                target_id,
                region_id,
                segments,
            } => {
                let entry = self.find_target(&target_id)?;
                let mut region = entry.backend.open_read(&region_id)?;
                let mut data = vec![0u8; total_length(&segments) as usize];
                region.read(&segments, &mut data)?;
                Ok(ResponseValue::Bytes(data))
            }

            Request::Erase {
                target_id,
                region_id,
            } => {
                let entry = self.find_target(&target_id)?;
                entry.backend.erase(&region_id)?;
                Ok(ResponseValue::Acknowledged(true))
            }
        }
    }

    /// The endpoint supplying or consuming bulk data: an explicit address
    /// if the caller named one, the RPC sender otherwise.
    fn resolve_source(&self, sender: Endpoint, address: &str) -> Result<Endpoint> {
        if address.is_empty() {
            Ok(sender)
        } else {
            self.engine.lookup(address)
        }
    }
}
