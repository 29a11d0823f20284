// docchat Kernel
//
// Document question answering with a durable interaction log.

pub mod config;
pub mod log;
pub mod rag;
pub mod session;
