//! Privileged helper side.
//!
//! A helper process builds one [`HelperDispatcher`], binds a [`Responder`]
//! holding its handlers, and serves it with [`HelperServer`]. The dispatcher
//! enforces the one-action-at-a-time rule; the server only moves frames.

mod dispatcher;
pub mod idle;
mod responder;
mod server;

pub use dispatcher::{
    HANDLER_PANICKED, HelperContext, HelperDispatcher, LOCAL_ORIGIN, Origin, OriginSignal,
};
pub use idle::IdleTimer;
pub use responder::{Handler, Responder};
pub use server::HelperServer;
