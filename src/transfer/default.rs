//! Pass-through transfer manager.
//!
//! One full-size bulk transfer, then one region call. This is the
//! `"__default__"` policy every provider carries.

use crate::backend::{total_length, ReadableRegion, WritableRegion};
use crate::engine::{BulkHandle, Endpoint, Engine};
use crate::error::Result;
use crate::transfer::TransferManager;

pub struct DefaultTransferManager {
    engine: Engine,
}

impl DefaultTransferManager {
    pub fn new(engine: &Engine) -> DefaultTransferManager {
        DefaultTransferManager {
            engine: engine.clone(),
        }
    }

    /// Nothing to configure; any object is accepted.
    pub(crate) fn validate(config: &serde_json::Value) -> Result<()> {
        if !config.is_object() {
            return Err(crate::error::Error::InvalidConfig(
                "transfer manager configuration must be an object".to_string(),
            ));
        }
        Ok(())
    }
}

impl TransferManager for DefaultTransferManager {
    fn kind(&self) -> &'static str {
        "__default__"
    }

    fn config(&self) -> serde_json::Value {
        serde_json::json!({})
    }

    fn pull(
        &self,
        region: &mut dyn WritableRegion,
        segments: &[(u64, u64)],
        bulk: &BulkHandle,
        source: &Endpoint,
        bulk_offset: u64,
        persist: bool,
    ) -> Result<()> {
        let total = total_length(segments);
        let mut staging = vec![0u8; total as usize];
        self.engine.bulk_read(source, bulk, bulk_offset, &mut staging)?;
        region.write(segments, &staging, persist)
    }

    fn push(
        &self,
        region: &mut dyn ReadableRegion,
        segments: &[(u64, u64)],
        bulk: &BulkHandle,
        source: &Endpoint,
        bulk_offset: u64,
    ) -> Result<()> {
        let total = total_length(segments);
        let mut staging = vec![0u8; total as usize];
        region.read(segments, &mut staging)?;
        self.engine.bulk_write(source, bulk, bulk_offset, &staging)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryTarget;
    use crate::backend::TargetBackend;

    #[test]
    fn test_pull_then_push_round_trip() {
        let engine = Engine::new("local://tm-test");
        let tm = DefaultTransferManager::new(&engine);
        let target = MemoryTarget::new(&serde_json::json!({}));
        let endpoint = engine.self_endpoint();

        let inbound = engine.expose(b"ABCDEFGH".to_vec());
        let region_id = {
            let mut region = target.create(8).unwrap();
            tm.pull(region.as_mut(), &[(0, 8)], &inbound, &endpoint, 0, false)
                .unwrap();
            region.region_id()
        };

        let outbound = engine.expose(vec![0u8; 8]);
        {
            let mut region = target.open_read(&region_id).unwrap();
            tm.push(region.as_mut(), &[(0, 8)], &outbound, &endpoint, 0)
                .unwrap();
        }
        assert_eq!(engine.release(outbound).unwrap(), b"ABCDEFGH".to_vec());
    }

    #[test]
    fn test_short_bulk_buffer_fails() {
        let engine = Engine::new("local://tm-test");
        let tm = DefaultTransferManager::new(&engine);
        let target = MemoryTarget::new(&serde_json::json!({}));
        let endpoint = engine.self_endpoint();

        let bulk = engine.expose(vec![0u8; 4]);
        let mut region = target.create(8).unwrap();
        assert!(tm
            .pull(region.as_mut(), &[(0, 8)], &bulk, &endpoint, 0, false)
            .is_err());
    }
}
