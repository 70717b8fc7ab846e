//! Key-to-node placement via consistent hashing.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      KetamaLocator                           │
//! │  ┌──────────────────────────────────────────────────────┐  │
//! │  │  Ring (BTreeMap<u32, routing key>)                    │  │
//! │  │  ┌─────┐ ┌─────┐ ┌─────┐ ┌─────┐ ┌─────┐ ┌─────┐   │  │
//! │  │  │ n1  │→│ n2  │→│ s-a │→│ n1  │→│ g-1 │→│ n2  │   │  │
//! │  │  └─────┘ └─────┘ └─────┘ └─────┘ └─────┘ └─────┘   │  │
//! │  │      160 points per routing key                      │  │
//! │  └──────────────────────────────────────────────────────┘  │
//! │                                                             │
//! │  "user:123" → hash → next point → RingEntry → NodeSelector │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! A routing key is the node address, a shard name shared by pooled
//! connections, or a replica-group name, depending on [`RoutingMode`].

mod hash;
mod hashring;

pub use hash::HashAlgorithm;
pub use hashring::{KetamaLocator, RingEntry, RoutingMode};
