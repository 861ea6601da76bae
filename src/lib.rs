//! Armature — a declarative infrastructure language compiler.
//!
//! Compiles `.arm` source to JSON deployment templates and, behind the
//! `localDeploy` feature gate, executes templates against out-of-process
//! provider extensions over a JSON-lines RPC channel.

pub mod cli;
pub mod core;
pub mod deploy;
