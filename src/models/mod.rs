pub mod account;
pub mod audit;
pub mod file;
pub mod folder;
pub mod share;
pub mod upload;

pub use account::*;
pub use audit::*;
pub use file::*;
pub use folder::*;
pub use share::*;
pub use upload::*;
