//! Dual-source read layer for Reality.eth oracle questions.
//!
//! Question state can be served either by the public reality.eth
//! subgraph (fast, pre-indexed) or by direct contract calls (slower,
//! trustless). Both backends normalize into the same records; the
//! `fetch` router picks a backend per call, and `watch` re-fetches on
//! every new block with cooperative cancellation.

pub mod config;
pub mod fetch;
pub mod onchain;
pub mod question;
pub mod subgraph;
pub mod watch;
