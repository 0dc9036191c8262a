//! Sync phase handlers.
//!
//! Each phase is a single request that reads and writes the store and
//! keeps nothing in memory between calls, so any instance sharing the
//! store can serve any phase. Agent data that cannot be parsed never
//! fails a phase: it is logged and handled as an empty request, because
//! an error response stalls the agent's sync loop.

use crate::config::ServerConfig;
use crate::error::ServerResult;
use fleetgate_core::{Database, DeviceUpdate};
use fleetgate_protocol::{
    EventUploadRequest, EventUploadResponse, PostflightResponse, PreflightRequest,
    RuleDownloadRequest, RuleDownloadResponse, SyncPhase, SyncPolicy,
};
use std::sync::Arc;

/// Context for request handling.
pub struct HandlerContext {
    /// Server configuration.
    pub config: ServerConfig,
    /// The store shared by every phase.
    pub db: Database,
}

impl HandlerContext {
    /// Creates a new handler context.
    pub fn new(config: ServerConfig, db: Database) -> Self {
        Self { config, db }
    }
}

/// Handler for the four sync phases.
#[derive(Clone)]
pub struct SyncHandler {
    context: Arc<HandlerContext>,
}

impl SyncHandler {
    /// Creates a new sync handler.
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }

    /// The policy handed to agents at preflight.
    pub fn policy(&self) -> &SyncPolicy {
        &self.context.config.policy
    }

    /// Merges reported telemetry into the device record and returns the
    /// sync policy.
    pub fn preflight(&self, device_id: &str, body: &[u8], content_type: &str) -> SyncPolicy {
        let request = PreflightRequest::parse(body, content_type).unwrap_or_else(|e| {
            tracing::warn!(device_id, error = %e, "unparseable preflight body; treating as empty");
            PreflightRequest::default()
        });
        let update = DeviceUpdate::from(&request);
        let empty = update.is_empty();

        if let Err(e) = self.context.db.merge_device(device_id, &update) {
            tracing::error!(device_id, error = %e, "failed to record preflight");
        } else {
            tracing::debug!(device_id, empty, mode = ?update.client_mode, "preflight");
        }
        self.policy().clone()
    }

    /// Stores uploaded execution events. Always acknowledges.
    pub fn event_upload(&self, device_id: &str, body: &[u8]) -> EventUploadResponse {
        let events = match EventUploadRequest::parse(body) {
            Ok(request) => request.events,
            Err(e) => {
                tracing::warn!(
                    device_id,
                    error = %e,
                    stored = 0,
                    body_len = body.len(),
                    "unparseable event upload; acknowledging without storing"
                );
                if let Err(e) = self.context.db.ensure_device(device_id) {
                    tracing::error!(device_id, error = %e, "failed to register device");
                }
                return EventUploadResponse::default();
            }
        };

        match self.context.db.record_events(device_id, &events) {
            Ok(report) => tracing::info!(
                device_id,
                attempted = report.attempted,
                stored = report.stored,
                duplicates = report.duplicates,
                skipped = report.skipped,
                failed = report.failed,
                "event upload"
            ),
            Err(e) => tracing::error!(
                device_id,
                attempted = events.len(),
                stored = 0,
                error = %e,
                "failed to store event upload"
            ),
        }
        EventUploadResponse::default()
    }

    /// Returns the page of rules after the request's cursor.
    ///
    /// The next cursor is included only when the page is full.
    pub fn rule_download(&self, device_id: &str, body: &[u8]) -> ServerResult<RuleDownloadResponse> {
        let request = RuleDownloadRequest::parse(body).unwrap_or_else(|e| {
            tracing::warn!(device_id, error = %e, "unparseable rule download body; starting from 0");
            RuleDownloadRequest::default()
        });
        if let Err(e) = self.context.db.touch_last_sync(device_id) {
            tracing::error!(device_id, error = %e, "failed to stamp last sync");
        }

        let page_size = self.context.config.rule_page_size;
        let rules = self.context.db.rules_after(request.watermark(), page_size)?;
        let cursor = if rules.len() == page_size {
            rules.last().map(|r| r.id)
        } else {
            None
        };
        tracing::debug!(
            device_id,
            from = request.watermark(),
            count = rules.len(),
            next = ?cursor,
            "rule download"
        );
        Ok(RuleDownloadResponse {
            rules: rules.iter().map(|r| r.to_wire()).collect(),
            cursor,
        })
    }

    /// Stamps the end of a sync cycle.
    pub fn postflight(&self, device_id: &str) -> PostflightResponse {
        match self.context.db.touch_last_sync(device_id) {
            Ok(()) => tracing::debug!(device_id, phase = SyncPhase::Postflight.as_str(), "sync complete"),
            Err(e) => tracing::error!(device_id, error = %e, "failed to stamp last sync"),
        }
        PostflightResponse {}
    }
}
