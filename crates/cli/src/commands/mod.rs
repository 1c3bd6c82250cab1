pub mod batch;
pub mod chat;
pub mod init;
pub mod runtime;
pub mod serve;
pub mod tools;
