//! Direct on-chain reads of Reality.eth question state.
//!
//! - `abi`: selectors, topics, calldata encoding, and pure decoders
//!   for the question tuple and event log layouts
//! - `OnChainFetcher`: the `eth_call`/`eth_getLogs` backend of the
//!   full fetcher

pub mod abi;
pub mod fetcher;

pub use fetcher::OnChainFetcher;
