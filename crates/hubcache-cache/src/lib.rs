//! On-disk state for hubcache: content-addressed blob store,
//! cross-process advisory locks, and the local-directory mirror.
//!
//! Layout per cache root:
//!
//! ```text
//! <cache>/
//!   <kind>s--<owner>--<name>/
//!     blobs/<etag>[.incomplete]
//!     refs/<symbolic-revision>
//!     snapshots/<commit>/<relative-file>
//!     .no_exist/<commit>/<relative-file>
//!   .locks/<kind>s--<owner>--<name>/<etag>.lock
//! ```

pub mod blob;
pub mod layout;
pub mod lock;
pub mod mirror;

pub use blob::{symlinks_supported, CacheLookup, RepoCache};
pub use layout::{
    ensure_mirror_gitignore, local_download_paths, no_exist_path, pointer_path,
    LocalDownloadPaths,
};
pub use lock::{with_lock, FileLock};
pub use mirror::{read_sidecar, sha256_of_file, write_sidecar, SidecarMetadata};
