//! Plugins can register to various points in the request lifecycle
//! by implementing one of these traits.
use anyhow::Result;
use async_trait::async_trait;

pub(crate) use crate::server::{context::MsgContext, state::State};

/// Action for kestrel to take after the plugin returns
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub enum Action {
    /// Respond with `resp_msg` from `MsgContext`
    Respond,
    /// Don't respond
    NoResponse,
    /// Continue executing the next plugin
    Continue,
}

/// define a plugin which will mutate a `MsgContext`
#[async_trait]
pub trait Plugin: Send + Sync + 'static {
    /// what to execute during this step in the message lifecycle
    ///
    /// CANCEL-SAFETY: everything in handle must be cancel-safe. A top-level timeout can possibly kill this
    /// method
    async fn handle(&self, ctx: &mut MsgContext) -> Result<Action>;
}

/// A handler that is run after the response is sent. This moves the
/// `MsgContext` instead of borrowing it, and as such only one such handler can
/// be added.
#[async_trait]
pub trait PostResponse: Send + Sync + 'static {
    /// what to execute during this step in the message lifecycle
    async fn handle(&self, ctx: MsgContext);
}
