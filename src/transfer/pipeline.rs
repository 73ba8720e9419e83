//! Chunked transfer manager.
//!
//! Splits the segment list so that no staged piece exceeds the configured
//! `buffer_size`, then moves the pieces batch by batch through a bounded
//! staging buffer. Useful when regions are large and the caller does not
//! want transfer-sized allocations on the provider.
//!
//! Configuration: `{"buffer_size": <integer >= 1>}` (required).

use crate::backend::{total_length, ReadableRegion, WritableRegion};
use crate::engine::{BulkHandle, Endpoint, Engine};
use crate::error::{Error, Result};
use crate::transfer::TransferManager;

pub struct PipelineTransferManager {
    engine: Engine,
    config: serde_json::Value,
    buffer_size: u64,
}

impl PipelineTransferManager {
    pub fn new(engine: &Engine, config: &serde_json::Value) -> Result<PipelineTransferManager> {
        Self::validate(config)?;
        let buffer_size = config["buffer_size"].as_u64().unwrap_or(0);
        Ok(PipelineTransferManager {
            engine: engine.clone(),
            config: config.clone(),
            buffer_size,
        })
    }

    pub(crate) fn validate(config: &serde_json::Value) -> Result<()> {
        if !config.is_object() {
            return Err(Error::InvalidConfig(
                "pipeline transfer manager configuration must be an object".to_string(),
            ));
        }
        match config.get("buffer_size").and_then(|v| v.as_u64()) {
            Some(size) if size >= 1 => Ok(()),
            Some(_) => Err(Error::InvalidConfig(
                "pipeline \"buffer_size\" must be at least 1".to_string(),
            )),
            None => Err(Error::InvalidConfig(
                "pipeline transfer manager requires an integer \"buffer_size\"".to_string(),
            )),
        }
    }

    /// Split `segments` into batches whose total length fits the staging
    /// buffer, remembering each batch's offset into the bulk buffer.
    fn plan(&self, segments: &[(u64, u64)], bulk_offset: u64) -> Vec<(u64, Vec<(u64, u64)>)> {
        let mut batches: Vec<(u64, Vec<(u64, u64)>)> = Vec::new();
        let mut current: Vec<(u64, u64)> = Vec::new();
        let mut current_size = 0u64;
        let mut cursor = bulk_offset;
        let mut batch_start = bulk_offset;
        for &(offset, len) in segments {
            let mut offset = offset;
            let mut remaining = len;
            while remaining > 0 {
                let take = remaining.min(self.buffer_size);
                if current_size + take > self.buffer_size && !current.is_empty() {
                    batches.push((batch_start, std::mem::take(&mut current)));
                    batch_start = cursor;
                    current_size = 0;
                }
                current.push((offset, take));
                current_size += take;
                cursor += take;
                offset += take;
                remaining -= take;
            }
        }
        if !current.is_empty() {
            batches.push((batch_start, current));
        }
        batches
    }
}

impl TransferManager for PipelineTransferManager {
    fn kind(&self) -> &'static str {
        "pipeline"
    }

    fn config(&self) -> serde_json::Value {
        self.config.clone()
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
        let mut staging = vec![0u8; self.buffer_size as usize];
        for (batch_offset, batch) in self.plan(segments, bulk_offset) {
            let total = total_length(&batch) as usize;
            self.engine
                .bulk_read(source, bulk, batch_offset, &mut staging[..total])?;
            region.write(&batch, &staging[..total], persist)?;
        }
        Ok(())
    }

    fn push(
        &self,
        region: &mut dyn ReadableRegion,
        segments: &[(u64, u64)],
        bulk: &BulkHandle,
        source: &Endpoint,
        bulk_offset: u64,
    ) -> Result<()> {
        let mut staging = vec![0u8; self.buffer_size as usize];
        for (batch_offset, batch) in self.plan(segments, bulk_offset) {
            let total = total_length(&batch) as usize;
            region.read(&batch, &mut staging[..total])?;
            self.engine
                .bulk_write(source, bulk, batch_offset, &staging[..total])?;
        }
        Ok(())
    }
}
