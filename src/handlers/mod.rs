pub mod account;
pub mod file;
pub mod folder;
pub mod internal;
pub mod share;
pub mod trash;
pub mod upload;
