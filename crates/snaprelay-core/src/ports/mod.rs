//! Ports - 抽象化レイヤー
//!
//! このモジュールは Hexagonal Architecture の「ポート」を定義します。
//! 各 trait は外部システム（データベースの制御エンドポイント、
//! オブジェクトストレージ）へのインターフェースを提供し、実装の詳細を隠蔽します。

pub mod clock;
pub mod id_generator;
pub mod object_store;
pub mod snapshot_service;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::object_store::{
    DEFAULT_BUFFER_SIZE, DownloadOptions, ListObjectsOptions, ObjectStore, UploadOptions,
};
pub use self::snapshot_service::SnapshotService;
