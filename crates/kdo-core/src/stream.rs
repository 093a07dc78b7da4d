//! Lazy, composable streams of Kubernetes objects
//!
//! An [`ObjectStream`] is a deferred batch of objects: nothing happens until
//! it is drained into an [`ObjectConsumer`]. Streams compose by
//! concatenation, and a consumer stops a stream early by returning an error
//! (usually [`CoreError::StreamCancelled`]).
//!
//! ```ignore
//! let stream = ObjectStream::concat(vec![
//!     ObjectStream::decode(jewels_yaml),
//!     ObjectStream::from_objects(rendered),
//! ]);
//! let yaml = stream.encode().await?;
//! ```

use std::fmt;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::error::{CoreError, Result};
use crate::object::Object;

/// Receives objects pushed by a stream, in order.
#[async_trait]
pub trait ObjectConsumer: Send {
    /// Accept the next object. Returning an error stops the stream.
    async fn accept(&mut self, object: Object) -> Result<()>;
}

#[async_trait]
impl ObjectConsumer for Vec<Object> {
    async fn accept(&mut self, object: Object) -> Result<()> {
        self.push(object);
        Ok(())
    }
}

/// Adapts a synchronous closure into a consumer
pub struct FnConsumer<F>(pub F);

#[async_trait]
impl<F> ObjectConsumer for FnConsumer<F>
where
    F: FnMut(Object) -> Result<()> + Send,
{
    async fn accept(&mut self, object: Object) -> Result<()> {
        (self.0)(object)
    }
}

/// Something that can push a batch of objects into a consumer
#[async_trait]
pub trait ObjectSource: Send {
    async fn drain(self: Box<Self>, consumer: &mut dyn ObjectConsumer) -> Result<()>;
}

/// Factory for a stream that is only built when drained
pub type DeferredStream = Box<dyn FnOnce() -> BoxFuture<'static, Result<ObjectStream>> + Send>;

/// A lazily evaluated, single-use batch of objects
pub struct ObjectStream {
    source: Box<dyn ObjectSource>,
}

impl ObjectStream {
    /// Wrap a custom source
    pub fn from_source(source: impl ObjectSource + 'static) -> Self {
        Self {
            source: Box::new(source),
        }
    }

    pub fn empty() -> Self {
        Self::from_objects(Vec::new())
    }

    pub fn from_objects(objects: Vec<Object>) -> Self {
        Self::from_source(Objects(objects))
    }

    /// A stream that fails with `err` without invoking the consumer
    pub fn error(err: CoreError) -> Self {
        Self::from_source(Failed(err))
    }

    /// Drain every stream in order. The first error stops the chain and the
    /// remaining streams are never drained.
    pub fn concat(streams: Vec<ObjectStream>) -> Self {
        Self::from_source(Concat(streams))
    }

    /// Multi-document YAML. Documents are parsed when the stream is drained;
    /// a malformed document fails the whole stream before any object is
    /// pushed. Empty documents are skipped.
    pub fn decode(bytes: impl Into<Vec<u8>>) -> Self {
        Self::from_source(Decoded(bytes.into()))
    }

    /// A stream whose content is computed only when it is drained
    pub fn deferred<F, Fut>(factory: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<ObjectStream>> + Send + 'static,
    {
        let build: DeferredStream =
            Box::new(move || -> BoxFuture<'static, Result<ObjectStream>> { Box::pin(factory()) });
        Self::from_source(Deferred(build))
    }

    /// Observe every object as it passes through
    pub fn inspect(self, f: impl FnMut(&Object) + Send + 'static) -> Self {
        Self::from_source(Inspect {
            inner: self,
            f: Box::new(f),
        })
    }

    /// Push every object into `consumer`
    pub async fn drain(self, consumer: &mut dyn ObjectConsumer) -> Result<()> {
        self.source.drain(consumer).await
    }

    /// Drain into a vector
    pub async fn collect(self) -> Result<Vec<Object>> {
        let mut objects = Vec::new();
        self.drain(&mut objects).await?;
        Ok(objects)
    }

    /// Render as multi-document YAML, in stream order
    pub async fn encode(self) -> Result<String> {
        let objects = self.collect().await?;
        encode_objects(&objects)
    }
}

impl fmt::Debug for ObjectStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStream").finish_non_exhaustive()
    }
}

impl From<Vec<Object>> for ObjectStream {
    fn from(objects: Vec<Object>) -> Self {
        Self::from_objects(objects)
    }
}

/// Encode objects as YAML documents separated by `---`
pub fn encode_objects(objects: &[Object]) -> Result<String> {
    let documents = objects
        .iter()
        .map(serde_yaml::to_string)
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(documents.join("---\n"))
}

/// Parse multi-document YAML into objects
pub fn decode_documents(bytes: &[u8]) -> Result<Vec<Object>> {
    let mut objects = Vec::new();
    for (index, document) in serde_yaml::Deserializer::from_slice(bytes).enumerate() {
        let value = JsonValue::deserialize(document).map_err(|e| CoreError::Parse {
            index,
            message: e.to_string(),
        })?;
        if value.is_null() {
            continue;
        }
        let object = Object::from_value(value).map_err(|e| CoreError::Parse {
            index,
            message: e.to_string(),
        })?;
        objects.push(object);
    }
    Ok(objects)
}

struct Objects(Vec<Object>);

#[async_trait]
impl ObjectSource for Objects {
    async fn drain(self: Box<Self>, consumer: &mut dyn ObjectConsumer) -> Result<()> {
        for object in self.0 {
            consumer.accept(object).await?;
        }
        Ok(())
    }
}

struct Failed(CoreError);

#[async_trait]
impl ObjectSource for Failed {
    async fn drain(self: Box<Self>, _consumer: &mut dyn ObjectConsumer) -> Result<()> {
        Err(self.0)
    }
}

struct Concat(Vec<ObjectStream>);

#[async_trait]
impl ObjectSource for Concat {
    async fn drain(self: Box<Self>, consumer: &mut dyn ObjectConsumer) -> Result<()> {
        for stream in self.0 {
            stream.drain(consumer).await?;
        }
        Ok(())
    }
}

struct Decoded(Vec<u8>);

#[async_trait]
impl ObjectSource for Decoded {
    async fn drain(self: Box<Self>, consumer: &mut dyn ObjectConsumer) -> Result<()> {
        for object in decode_documents(&self.0)? {
            consumer.accept(object).await?;
        }
        Ok(())
    }
}

struct Deferred(DeferredStream);

#[async_trait]
impl ObjectSource for Deferred {
    async fn drain(self: Box<Self>, consumer: &mut dyn ObjectConsumer) -> Result<()> {
        let Deferred(build) = *self;
        let stream = build().await?;
        stream.drain(consumer).await
    }
}

struct Inspect {
    inner: ObjectStream,
    f: Box<dyn FnMut(&Object) + Send>,
}

struct InspectConsumer<'a> {
    inner: &'a mut dyn ObjectConsumer,
    f: &'a mut (dyn FnMut(&Object) + Send),
}

#[async_trait]
impl ObjectConsumer for InspectConsumer<'_> {
    async fn accept(&mut self, object: Object) -> Result<()> {
        (self.f)(&object);
        self.inner.accept(object).await
    }
}

#[async_trait]
impl ObjectSource for Inspect {
    async fn drain(self: Box<Self>, consumer: &mut dyn ObjectConsumer) -> Result<()> {
        let Inspect { inner, mut f } = *self;
        let mut tap = InspectConsumer {
            inner: consumer,
            f: f.as_mut(),
        };
        inner.drain(&mut tap).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn cm(name: &str) -> Object {
        Object::new("v1", "ConfigMap", name)
    }

    fn names(objects: &[Object]) -> Vec<&str> {
        objects.iter().map(Object::name).collect()
    }

    #[tokio::test]
    async fn test_concat_preserves_order() {
        let stream = ObjectStream::concat(vec![
            ObjectStream::from_objects(vec![cm("a1"), cm("a2")]),
            ObjectStream::empty(),
            ObjectStream::from_objects(vec![cm("b1")]),
            ObjectStream::from_objects(vec![cm("c1"), cm("c2")]),
        ]);

        let objects = stream.collect().await.unwrap();
        assert_eq!(names(&objects), vec!["a1", "a2", "b1", "c1", "c2"]);
    }

    #[tokio::test]
    async fn test_concat_stops_at_first_error() {
        let drained_third = Arc::new(AtomicUsize::new(0));
        let counter = drained_third.clone();

        let stream = ObjectStream::concat(vec![
            ObjectStream::from_objects(vec![cm("a")]),
            ObjectStream::error(CoreError::Cluster {
                message: "down".to_string(),
            }),
            ObjectStream::deferred(move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(ObjectStream::from_objects(vec![cm("c")]))
            }),
        ]);

        let mut seen = Vec::new();
        let err = stream.drain(&mut seen).await.unwrap_err();

        assert!(matches!(err, CoreError::Cluster { .. }));
        assert_eq!(names(&seen), vec!["a"]);
        assert_eq!(drained_third.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_error_stream_never_calls_consumer() {
        let mut calls = 0;
        let mut consumer = FnConsumer(|_obj: Object| {
            calls += 1;
            Ok(())
        });
        let result = ObjectStream::error(CoreError::StreamCancelled)
            .drain(&mut consumer)
            .await;
        assert!(result.is_err());
        assert_eq!(calls, 0);
    }

    #[tokio::test]
    async fn test_consumer_error_stops_stream() {
        let mut consumer = FnConsumer(|obj: Object| {
            if obj.name() == "stop" {
                Err(CoreError::StreamCancelled)
            } else {
                Ok(())
            }
        });
        let err = ObjectStream::from_objects(vec![cm("go"), cm("stop"), cm("never")])
            .drain(&mut consumer)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_encode_decode_roundtrip() {
        let original = vec![
            cm("first").with_namespace("ns"),
            Object::from_value(serde_json::json!({
                "apiVersion": "apps/v1",
                "kind": "Deployment",
                "metadata": { "name": "web" },
                "spec": { "replicas": 2, "template": { "spec": { "containers": [{ "name": "c" }] } } }
            }))
            .unwrap(),
        ];

        let yaml = ObjectStream::from_objects(original.clone())
            .encode()
            .await
            .unwrap();
        assert!(yaml.contains("---\n"));

        let decoded = ObjectStream::decode(yaml).collect().await.unwrap();
        assert_eq!(decoded, original);
    }

    #[tokio::test]
    async fn test_decode_skips_empty_documents() {
        let yaml = "---\n---\napiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: only\n---\n";
        let objects = ObjectStream::decode(yaml).collect().await.unwrap();
        assert_eq!(names(&objects), vec!["only"]);
    }

    #[tokio::test]
    async fn test_decode_reports_malformed_document() {
        let yaml = "kind: ConfigMap\nmetadata:\n  name: ok\n---\n- just\n- a list\n";
        let err = ObjectStream::decode(yaml).collect().await.unwrap_err();
        assert!(matches!(err, CoreError::Parse { index: 1, .. }));
    }

    #[test]
    fn test_decode_is_lazy() {
        // Construction never parses
        let _stream = ObjectStream::decode("{ not yaml");
    }

    #[tokio::test]
    async fn test_inspect_sees_every_object() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let objects = ObjectStream::from_objects(vec![cm("a"), cm("b")])
            .inspect(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .collect()
            .await
            .unwrap();
        assert_eq!(objects.len(), 2);
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }
}
