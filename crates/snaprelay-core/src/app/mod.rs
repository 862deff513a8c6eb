//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせてレプリケーションを実装します。
//!
//! # 主要コンポーネント
//! - **SnapshotLocator**: スナップショット作成とローカルファイルの特定
//! - **TransferOrchestrator**: 転送セッションを終端状態まで駆動
//! - **ReplicationLoop**: 固定間隔のサイクル実行（Idle / Running）
//! - **AppBuilder**: 依存のワイヤリングと起動時検証
//!
//! データは Loop → Locator → Orchestrator → Store の一方向にだけ流れます。

pub mod builder;
pub mod locator;
pub mod orchestrator;
pub mod replication_loop;
pub mod status;

// 主要な型を再エクスポート
pub use self::builder::{AppBuilder, BuildError, store_from_config};
pub use self::locator::{SnapshotLocator, locate_artifact};
pub use self::orchestrator::TransferOrchestrator;
pub use self::replication_loop::{
    DEFAULT_INTERVAL, LoopState, ReplicationHandle, ReplicationLoop, ReplicationSettings,
    SnapshotSource,
};
pub use self::status::{CycleReport, CycleSummary};
