pub mod clone;
pub mod gateway;
pub mod memory;
pub mod model;
pub mod remote;

pub use clone::{CloneError, CloneManager, CloneState, WorkingClone};
pub use gateway::{RemoteError, RepositoryError, RepositoryGateway};
pub use memory::InMemoryGateway;
pub use model::{
    ArchiveFormat, Branch, CloneUrls, GitCommit, GitHistory, GitLog, GitUser, LogQuery,
    Repository, RepositoryUpdate, RepositoryView, Tag, archive_url, is_valid_name,
};
pub use remote::BitbucketGateway;
