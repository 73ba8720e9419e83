//! HTTP surface: the admin verbs and the eager data verbs as JSON
//! endpoints.
//!
//! Every endpoint answers with the same envelope the engine-level dispatch
//! produces; payload-carrying endpoints take or return raw bytes. Handlers
//! stay thin: decode the request, run it through the provider's dispatch
//! path, wrap the outcome.

use crate::app_state::AppState;
use crate::region::RegionId;
use crate::rpc::{Envelope, MigrationOptions, Request, ResponseValue};
use actix_web::{delete, get, post, put, web, Error, HttpResponse, Responder};
use bytes::BytesMut;
use futures::StreamExt;
use log::{info, warn};
use serde::Deserialize;
use uuid::Uuid;

/// Drain a request payload into one buffer.
async fn read_payload(mut payload: web::Payload) -> Result<BytesMut, Error> {
    let mut bytes = BytesMut::new();
    while let Some(chunk) = payload.next().await {
        let chunk = chunk.map_err(|e| {
            warn!("Error reading payload chunk: {}", e);
            actix_web::error::ErrorInternalServerError("Error reading payload")
        })?;
        bytes.extend_from_slice(&chunk);
    }
    Ok(bytes)
}

/// Parse a `segments` query value of the form `offset:length,offset:length`.
fn parse_segments(text: &str) -> Result<Vec<(u64, u64)>, String> {
    let mut segments = Vec::new();
    for part in text.split(',') {
        let (offset, len) = part
            .split_once(':')
            .ok_or_else(|| format!("malformed segment \"{}\"", part))?;
        let offset = offset
            .parse()
            .map_err(|_| format!("malformed segment offset \"{}\"", offset))?;
        let len = len
            .parse()
            .map_err(|_| format!("malformed segment length \"{}\"", len))?;
        segments.push((offset, len));
    }
    Ok(segments)
}

fn envelope_response(envelope: Envelope<ResponseValue>) -> HttpResponse {
    if envelope.success {
        HttpResponse::Ok().json(envelope)
    } else {
        HttpResponse::BadRequest().json(envelope)
    }
}

fn bad_request(error: String) -> HttpResponse {
    HttpResponse::BadRequest().json(Envelope::<ResponseValue>::failure(error))
}

#[derive(Deserialize)]
pub struct AddTargetBody {
    #[serde(rename = "type")]
    target_type: String,
    #[serde(default)]
    config: serde_json::Value,
}

#[post("/admin/targets")]
pub async fn add_target(
    state: web::Data<AppState>,
    body: web::Json<AddTargetBody>,
) -> impl Responder {
    info!("HTTP add_target type={}", body.target_type);
    let config = if body.config.is_null() {
        "{}".to_string()
    } else {
        body.config.to_string()
    };
    envelope_response(state.provider.dispatch(Request::AddTarget {
        target_type: body.target_type.clone(),
        config,
    }))
}

#[delete("/admin/targets/{target_id}")]
pub async fn remove_target(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> impl Responder {
    let target_id = path.into_inner();
    info!("HTTP remove_target {}", target_id);
    envelope_response(state.provider.dispatch(Request::RemoveTarget { target_id }))
}

#[post("/admin/targets/{target_id}/destroy")]
pub async fn destroy_target(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> impl Responder {
    let target_id = path.into_inner();
    info!("HTTP destroy_target {}", target_id);
    envelope_response(state.provider.dispatch(Request::DestroyTarget { target_id }))
}

#[derive(Deserialize)]
pub struct AddTransferManagerBody {
    name: String,
    #[serde(rename = "type")]
    tm_type: String,
    #[serde(default)]
    config: serde_json::Value,
}

#[post("/admin/transfer-managers")]
pub async fn add_transfer_manager(
    state: web::Data<AppState>,
    body: web::Json<AddTransferManagerBody>,
) -> impl Responder {
    info!("HTTP add_transfer_manager name={} type={}", body.name, body.tm_type);
    let config = if body.config.is_null() {
        "{}".to_string()
    } else {
        body.config.to_string()
    };
    envelope_response(state.provider.dispatch(Request::AddTransferManager {
        name: body.name.clone(),
        tm_type: body.tm_type.clone(),
        config,
    }))
}

#[derive(Deserialize)]
pub struct MigrateTargetBody {
    dest_address: String,
    dest_provider_id: u16,
    new_root: String,
    #[serde(default)]
    transfer_size: u32,
    #[serde(default = "default_extra_config")]
    extra_config: String,
    #[serde(default)]
    remove_source: bool,
}

fn default_extra_config() -> String {
    "{}".to_string()
}

#[post("/admin/targets/{target_id}/migrate")]
pub async fn migrate_target(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    body: web::Json<MigrateTargetBody>,
) -> impl Responder {
    let target_id = path.into_inner();
    info!(
        "HTTP migrate_target {} to {} (provider {})",
        target_id, body.dest_address, body.dest_provider_id
    );
    envelope_response(state.provider.dispatch(Request::MigrateTarget {
        target_id,
        dest_address: body.dest_address.clone(),
        dest_provider_id: body.dest_provider_id,
        options: MigrationOptions {
            new_root: body.new_root.clone(),
            transfer_size: body.transfer_size,
            extra_config: body.extra_config.clone(),
            remove_source: body.remove_source,
        },
    }))
}

#[get("/admin/config")]
pub async fn get_provider_config(state: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(state.provider.get_config())
}

#[get("/targets/{target_id}")]
pub async fn check_target(state: web::Data<AppState>, path: web::Path<Uuid>) -> impl Responder {
    let target_id = path.into_inner();
    envelope_response(state.provider.dispatch(Request::CheckTarget { target_id }))
}

#[derive(Deserialize)]
pub struct CreateRegionQuery {
    #[serde(default)]
    size: u64,
    #[serde(default)]
    persist: bool,
}

/// Create a region. With a body, this is create-and-write: the region is
/// sized and filled from the payload; without one, `size` gives the region
/// size.
#[post("/targets/{target_id}/regions")]
pub async fn create_region(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    query: web::Query<CreateRegionQuery>,
    payload: web::Payload,
) -> Result<HttpResponse, Error> {
    let target_id = path.into_inner();
    let body = read_payload(payload).await?;
    let request = if body.is_empty() {
        Request::Create {
            target_id,
            size: query.size,
        }
    } else {
        Request::CreateWriteEager {
            target_id,
            data: body.to_vec(),
            persist: query.persist,
        }
    };
    Ok(envelope_response(state.provider.dispatch(request)))
}

#[derive(Deserialize)]
pub struct SegmentsQuery {
    segments: String,
    #[serde(default)]
    persist: bool,
}

#[put("/targets/{target_id}/regions/{region_id}")]
pub async fn write_region(
    state: web::Data<AppState>,
    path: web::Path<(Uuid, String)>,
    query: web::Query<SegmentsQuery>,
    payload: web::Payload,
) -> Result<HttpResponse, Error> {
    let (target_id, region_hex) = path.into_inner();
    let region_id = match RegionId::from_hex(&region_hex) {
        Some(id) => id,
        None => return Ok(bad_request(format!("malformed region id \"{}\"", region_hex))),
    };
    let segments = match parse_segments(&query.segments) {
        Ok(segments) => segments,
        Err(e) => return Ok(bad_request(e)),
    };
    let body = read_payload(payload).await?;
    Ok(envelope_response(state.provider.dispatch(Request::WriteEager {
        target_id,
        region_id,
        segments,
        data: body.to_vec(),
        persist: query.persist,
    })))
}

#[get("/targets/{target_id}/regions/{region_id}")]
pub async fn read_region(
    state: web::Data<AppState>,
    path: web::Path<(Uuid, String)>,
    query: web::Query<SegmentsQuery>,
) -> impl Responder {
    let (target_id, region_hex) = path.into_inner();
    let region_id = match RegionId::from_hex(&region_hex) {
        Some(id) => id,
        None => return bad_request(format!("malformed region id \"{}\"", region_hex)),
    };
    let segments = match parse_segments(&query.segments) {
        Ok(segments) => segments,
        Err(e) => return bad_request(e),
    };
    let envelope = state.provider.dispatch(Request::ReadEager {
        target_id,
        region_id,
        segments,
    });
    match envelope {
        Envelope {
            success: true,
            value: Some(ResponseValue::Bytes(data)),
            ..
        } => HttpResponse::Ok()
            .content_type("application/octet-stream")
            .body(data),
        other => envelope_response(other),
    }
}

#[post("/targets/{target_id}/regions/{region_id}/persist")]
pub async fn persist_region(
    state: web::Data<AppState>,
    path: web::Path<(Uuid, String)>,
    query: web::Query<SegmentsQuery>,
) -> impl Responder {
    let (target_id, region_hex) = path.into_inner();
    let region_id = match RegionId::from_hex(&region_hex) {
        Some(id) => id,
        None => return bad_request(format!("malformed region id \"{}\"", region_hex)),
    };
    let segments = match parse_segments(&query.segments) {
        Ok(segments) => segments,
        Err(e) => return bad_request(e),
    };
    envelope_response(state.provider.dispatch(Request::Persist {
        target_id,
        region_id,
        segments,
    }))
}

#[delete("/targets/{target_id}/regions/{region_id}")]
pub async fn erase_region(
    state: web::Data<AppState>,
    path: web::Path<(Uuid, String)>,
) -> impl Responder {
    let (target_id, region_hex) = path.into_inner();
    let region_id = match RegionId::from_hex(&region_hex) {
        Some(id) => id,
        None => return bad_request(format!("malformed region id \"{}\"", region_hex)),
    };
    envelope_response(state.provider.dispatch(Request::Erase {
        target_id,
        region_id,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_segments() {
        assert_eq!(parse_segments("0:16").unwrap(), vec![(0, 16)]);
        assert_eq!(
            parse_segments("5:5,0:5").unwrap(),
            vec![(5, 5), (0, 5)]
        );
        assert!(parse_segments("5").is_err());
        assert!(parse_segments("a:b").is_err());
    }
}
