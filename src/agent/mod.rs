//! The agent seam: the handler trait consumers dispatch into, and the
//! explicit registry used for name-based late binding.

pub mod registry;
pub mod traits;

pub use registry::AgentRegistry;
pub use traits::AgentHandler;
