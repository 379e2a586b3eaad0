//! Lambda functions that switch a managed SFTP server on and off by
//! creating and deleting its stack, and react to uploads into the
//! server's bucket.

pub mod app;
pub mod client;
pub mod conf;
pub mod notify;
pub mod service;
pub mod trigger;
pub mod upload;
