//! Built-in protocol handlers

mod file;

pub use file::FileProtocol;
