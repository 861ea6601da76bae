//! Local deployment: extension dispatch, the RPC channel to provider
//! processes, and the DAG orchestrator.

pub mod channel;
pub mod dispatch;
pub mod orchestrator;
pub mod protocol;
