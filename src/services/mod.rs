//! Storage backends, the retention sweeper, and the invocation that ties them
//! together.

pub mod backend;
pub mod invocation;
#[cfg(test)]
pub mod memory;
pub mod storage_service;
pub mod sweeper;
