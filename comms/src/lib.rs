//! Wire model and client for the central router that every site polls.

pub mod error;
mod http;
mod router;
mod run;
mod status;

pub use error::{Result, RouterErr};
pub use http::HttpRouter;
pub use router::{
    BundleKind, DownloadRequest, Router, SiteStatus, StatusUpdate, UploadField, UploadFile,
    UploadRequest,
};
pub use run::{Role, Run, Task, TaskConfig};
pub use status::Status;
