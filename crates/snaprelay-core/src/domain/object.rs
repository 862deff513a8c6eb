//! Remote containers and the objects listed inside them.

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use chrono::{DateTime, Utc};
use futures::stream::{BoxStream, Stream, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};

use super::errors::StoreError;

/// Opaque reference to a remote bucket, resolved once per cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketHandle {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
}

impl BucketHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            created: None,
        }
    }
}

/// Descriptor of one remote object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectInfo {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    pub size: u64,
}

/// Lazy, finite sequence of objects in the order the remote returns them.
///
/// Implementations may page through the remote as the stream is polled.
pub struct ObjectListing {
    inner: BoxStream<'static, Result<ObjectInfo, StoreError>>,
}

impl ObjectListing {
    pub fn new(stream: impl Stream<Item = Result<ObjectInfo, StoreError>> + Send + 'static) -> Self {
        Self {
            inner: stream.boxed(),
        }
    }

    pub fn from_vec(objects: Vec<ObjectInfo>) -> Self {
        Self::new(futures::stream::iter(objects.into_iter().map(Ok)))
    }

    /// Drain the listing, stopping at the first error.
    pub async fn collect_all(self) -> Result<Vec<ObjectInfo>, StoreError> {
        self.try_collect().await
    }
}

impl Stream for ObjectListing {
    type Item = Result<ObjectInfo, StoreError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl fmt::Debug for ObjectListing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectListing").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn listing_stops_at_first_error() {
        let items = vec![
            Ok(ObjectInfo {
                key: "a".into(),
                created: None,
                size: 1,
            }),
            Err(StoreError::Network("connection reset".into())),
            Ok(ObjectInfo {
                key: "b".into(),
                created: None,
                size: 2,
            }),
        ];
        let listing = ObjectListing::new(futures::stream::iter(items));

        let err = listing.collect_all().await.unwrap_err();
        assert!(matches!(err, StoreError::Network(_)));
    }

    #[tokio::test]
    async fn listing_yields_items_in_order() {
        let listing = ObjectListing::from_vec(vec![
            ObjectInfo {
                key: "1585578518736.avro".into(),
                created: None,
                size: 10,
            },
            ObjectInfo {
                key: "1585578519999.avro".into(),
                created: None,
                size: 12,
            },
        ]);

        let keys: Vec<String> = listing
            .collect_all()
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.key)
            .collect();
        assert_eq!(keys, ["1585578518736.avro", "1585578519999.avro"]);
    }
}
