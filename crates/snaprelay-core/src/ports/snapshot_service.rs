//! SnapshotService port - データベースの制御エンドポイント
//!
//! スナップショットの生成自体はデータベース側の責務です。
//! ここでは「生成を依頼して ID を受け取る」能力だけを定義します。

use async_trait::async_trait;

use crate::domain::{SnapshotError, SnapshotId};

/// SnapshotService はデータベースにスナップショットの作成を依頼
///
/// # エラー分類
/// - `RemoteUnavailable`: 一時的に利用不可（次のサイクルで再試行）
/// - `RemoteError`: リクエストが拒否された（設定ミスの可能性）
#[async_trait]
pub trait SnapshotService: Send + Sync {
    async fn create_snapshot(&self, database: &str) -> Result<SnapshotId, SnapshotError>;
}
