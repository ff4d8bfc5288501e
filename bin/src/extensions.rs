//! built-in hook libraries
//!
//! Libraries named by `hooks-libraries` entries are resolved here and
//! registered in-process through the hooks framework.
use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc, Mutex,
};
use std::time::Instant;

use kestrel_core::hooks::{
    CalloutManager, Error, HookLibrary, NextStep, HOOKS_API_VERSION, HOOK_PKT4_RECEIVE,
    HOOK_PKT4_SEND,
};
use kestrel_core::proto::v4::Message;
use kestrel_core::tracing::{debug, info};

/// resolve a configured library name
pub fn library(name: &str) -> Option<Arc<dyn HookLibrary>> {
    match name {
        "pkt-trace" => Some(Arc::new(PktTrace)),
        "rate-limit" => Some(Arc::new(RateLimit::default())),
        _ => None,
    }
}

/// logs every query and response passing through the hook points
struct PktTrace;

impl HookLibrary for PktTrace {
    fn name(&self) -> &str {
        "pkt-trace"
    }
    fn version(&self) -> u32 {
        HOOKS_API_VERSION
    }
    fn load(&self, _params: &serde_json::Value) -> Result<(), String> {
        Ok(())
    }
    fn unload(&self) -> Result<(), String> {
        Ok(())
    }
    fn register(&self, lib_index: u32, callouts: &CalloutManager) -> Result<(), Error> {
        callouts.register_callout(
            lib_index,
            HOOK_PKT4_RECEIVE,
            Arc::new(|handle| {
                if let Some(query) = handle.get_argument::<Message>("query4") {
                    info!(query = %query, "pkt4_receive");
                }
            }),
        )?;
        callouts.register_callout(
            lib_index,
            HOOK_PKT4_SEND,
            Arc::new(|handle| {
                if let Some(resp) = handle.get_argument::<Message>("response4") {
                    info!(response = %resp, "pkt4_send");
                }
            }),
        )
    }
}

/// drops queries beyond a configured packets-per-second budget
#[derive(Default)]
struct RateLimit {
    limit: AtomicU32,
    bucket: Arc<Mutex<Option<Window>>>,
}

struct Window {
    started: Instant,
    seen: u32,
}

impl HookLibrary for RateLimit {
    fn name(&self) -> &str {
        "rate-limit"
    }
    fn version(&self) -> u32 {
        HOOKS_API_VERSION
    }
    fn load(&self, params: &serde_json::Value) -> Result<(), String> {
        let limit = params
            .get("packets-per-second")
            .and_then(serde_json::Value::as_u64)
            .ok_or_else(|| "rate-limit requires packets-per-second".to_string())?;
        if limit == 0 {
            return Err("packets-per-second must be positive".into());
        }
        self.limit.store(limit as u32, Ordering::Relaxed);
        Ok(())
    }
    fn unload(&self) -> Result<(), String> {
        Ok(())
    }
    fn register(&self, lib_index: u32, callouts: &CalloutManager) -> Result<(), Error> {
        let limit = self.limit.load(Ordering::Relaxed);
        let bucket = Arc::clone(&self.bucket);
        callouts.register_callout(
            lib_index,
            HOOK_PKT4_RECEIVE,
            Arc::new(move |handle| {
                let mut bucket = bucket.lock().unwrap();
                let window = bucket.get_or_insert_with(|| Window {
                    started: Instant::now(),
                    seen: 0,
                });
                if window.started.elapsed().as_secs() >= 1 {
                    window.started = Instant::now();
                    window.seen = 0;
                }
                window.seen += 1;
                if window.seen > limit {
                    debug!(limit, "rate limit exceeded, dropping query");
                    handle.set_next_step(NextStep::Drop);
                }
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_core::hooks::{CalloutHandle, HooksManager};
    use serde_json::json;

    #[test]
    fn unknown_library_is_none() {
        assert!(library("nonesuch").is_none());
    }

    #[test]
    fn rate_limit_requires_parameters() {
        let mgr = HooksManager::new();
        let lib = library("rate-limit").unwrap();
        assert!(mgr.load_library(lib, &serde_json::Value::Null).is_err());
    }

    #[test]
    fn rate_limit_drops_past_budget() {
        let mgr = HooksManager::new();
        let lib = library("rate-limit").unwrap();
        mgr.load_library(lib, &json!({"packets-per-second": 2}))
            .unwrap();
        let callouts = mgr.callouts();

        let mut steps = vec![];
        for _ in 0..3 {
            let mut handle = CalloutHandle::new();
            steps.push(callouts.call(HOOK_PKT4_RECEIVE, &mut handle));
        }
        assert_eq!(
            steps,
            vec![NextStep::Continue, NextStep::Continue, NextStep::Drop]
        );
    }
}
