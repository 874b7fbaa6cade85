//! Frame records live on the object model (`value::thread::CallInfo`) to
//! avoid a cycle between the value layer and the engine; re-exported here
//! under the name the execution-engine modules reach for.

pub use crate::value::CallInfo;
