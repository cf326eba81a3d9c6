// Internal RPC client used by tenant nodes and gateways to reach a real
// control-plane process instead of holding a private in-process metadata
// store. Grounded on the gateway's own `reqwest::Client` usage in
// `gateway::proxy`, generalized to JSON request/response instead of raw
// HTTP forwarding.

use super::{WireRequest, WireResponse};
use crate::error::{RdbError, Result};
use reqwest::Client;
use std::time::Duration;

pub struct WireClient {
    http: Client,
    addrs: Vec<String>,
}

impl WireClient {
    pub fn new(addrs: Vec<String>) -> Self {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(10))
            .build()
            .expect("reqwest client configuration is static and always valid");
        Self { http, addrs }
    }

    /// Tries each configured control-plane address in order, returning the
    /// first successful reply. A real deployment would route only to the
    /// current raft leader; this fleet's control-plane addresses are
    /// expected to list the leader first, with followers as fallback for
    /// reads that tolerate staleness.
    pub async fn call(&self, request: WireRequest) -> Result<WireResponse> {
        if self.addrs.is_empty() {
            return Err(RdbError::Unavailable("no control-plane addresses configured".into()));
        }

        let mut last_err = None;
        for addr in &self.addrs {
            let url = format!("http://{addr}/_internal/rpc");
            match self.http.post(&url).json(&request).send().await {
                Ok(resp) => match resp.json::<WireResponse>().await {
                    Ok(wire_resp) => return Ok(wire_resp),
                    Err(e) => last_err = Some(RdbError::Network(format!("{addr}: malformed rpc reply: {e}"))),
                },
                Err(e) => last_err = Some(RdbError::Network(format!("{addr}: {e}"))),
            }
        }
        Err(last_err.unwrap_or_else(|| RdbError::Unavailable("no control-plane addresses configured".into())))
    }

    /// Synchronous wrapper for `MetadataStore`'s (non-async) method
    /// surface, which every caller in this crate expects to stay
    /// synchronous regardless of whether the store is local or remote.
    /// Only ever called from inside a tokio worker thread.
    pub fn call_blocking(&self, request: WireRequest) -> Result<WireResponse> {
        tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(self.call(request)))
    }
}
