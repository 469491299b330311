//! Value types exchanged between callers, the bridge, and the agent.

pub mod reply;
pub mod work;

pub use reply::Reply;
pub use work::WorkUnit;
