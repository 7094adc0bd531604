pub mod audit;
pub mod file;
pub mod folder;
pub mod quota;
pub mod scan;
pub mod share;
pub mod trash;
pub mod upload;

pub use audit::AuditService;
pub use file::FileService;
pub use folder::FolderService;
pub use quota::QuotaLedger;
pub use scan::ScanService;
pub use share::ShareService;
pub use trash::TrashService;
pub use upload::UploadService;
