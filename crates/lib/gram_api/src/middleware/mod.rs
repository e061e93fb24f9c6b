//! Request pipeline middleware.
//!
//! Global, outermost first: [`domains`], [`cors`], [`session`] (session then
//! admin override), [`logging`]. Per endpoint: [`endpoint`], then [`auth`].

pub mod auth;
pub mod cors;
pub mod domains;
pub mod endpoint;
pub mod logging;
pub mod session;
