//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **HttpSnapshotService**: データベース管理エンドポイント（HTTP）
//! - **GatewayObjectStore**: HTTP ゲートウェイ越しのオブジェクトストア
//! - **InMemoryObjectStore**: 開発用・テスト用のストア（障害注入つき）
//!
//! マルチパートの共通処理は `multipart` にあります。

pub mod endpoint;
pub mod http_snapshot;
pub mod http_store;
pub mod inmem_store;
pub mod multipart;

// 主要な型を再エクスポート
pub use self::endpoint::EndpointError;
pub use self::http_snapshot::{DEFAULT_NETWORK, DEFAULT_SNAPSHOT_ENDPOINT, HttpSnapshotService};
pub use self::http_store::{GatewayCredentials, GatewayObjectStore};
pub use self::inmem_store::InMemoryObjectStore;
pub use self::multipart::{ChunkRange, plan_chunks};
