//! Domain model (IDs, snapshots, buckets, transfer sessions, errors).
//!
//! ネットワークには触れません（ports / impls 側の責務）。
//! ファイルシステムに触れるのは `snapshot` だけで、スナップショットファイルを
//! 開いて読む（`SnapshotArtifact::open`, `ByteSource`）ことに限られます。

pub mod errors;
pub mod ids;
pub mod object;
pub mod snapshot;
pub mod transfer;

pub use self::errors::{CycleError, ErrorKind, ReplicationError, SnapshotError, StoreError};
pub use self::ids::{CycleId, TransferId};
pub use self::object::{BucketHandle, ObjectInfo, ObjectListing};
pub use self::snapshot::{ByteSource, SnapshotArtifact, SnapshotId};
pub use self::transfer::{
    ProgressReporter, TransferDirection, TransferEvent, TransferOutcome, TransferSession,
    TransferState,
};
