use std::{pin::Pin, sync::Arc, time::SystemTime};

use futures::{Stream, StreamExt};

#[derive(Debug, Clone)]
pub struct Envelope<T> {
    pub payload: T,
    pub received_at: SystemTime,
}

impl<T> Envelope<T> {
    pub fn now(payload: T) -> Self {
        Self {
            payload,
            received_at: SystemTime::now(),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    /// The upstream cannot produce more items; the rest of the stream is lost.
    #[error("source error: {0}")]
    Source(String),
    /// A single item was rejected; the stream continues.
    #[error("transform error: {0}")]
    Transform(String),
    #[error("sink error: {0}")]
    Sink(String),
}

pub type EnvelopeStream<T> = Pin<Box<dyn Stream<Item = Result<Envelope<T>, PipelineError>> + Send>>;

#[async_trait::async_trait]
pub trait Source<T>: Send + Sync {
    async fn stream(&self) -> EnvelopeStream<T>;
}

#[async_trait::async_trait]
pub trait Transform<I, O>: Send + Sync {
    async fn apply(&self, input: Envelope<I>) -> Result<Envelope<O>, PipelineError>;
}

#[async_trait::async_trait]
pub trait Sink<T>: Send + Sync {
    async fn run<S>(&self, input: S) -> Result<(), PipelineError>
    where
        S: Stream<Item = Result<Envelope<T>, PipelineError>> + Send + Unpin + 'static;
}

/// A source with a chain of same-type transforms applied to each item.
///
/// The consumer either drains the result through a [`Sink`] with [`Pipeline::run`]
/// or takes the stream itself with [`Pipeline::stream`].
pub struct Pipeline<S, T> {
    pub source: S,
    pub transforms: Vec<Arc<dyn Transform<T, T> + Send + Sync>>,
}

impl<T, S> Pipeline<S, T>
where
    T: Send + 'static,
    S: Source<T> + Send + Sync + 'static,
{
    pub async fn stream(self) -> EnvelopeStream<T> {
        let mut stream = self.source.stream().await;

        // Apply transforms in sequence (if any).
        for t in self.transforms {
            let t_arc = t.clone();
            stream = Box::pin(stream.then(move |item| {
                let t_inner = t_arc.clone();
                async move {
                    match item {
                        Ok(env) => t_inner.apply(env).await,
                        Err(e) => Err(e),
                    }
                }
            }));
        }

        stream
    }

    pub async fn run<K>(self, sink: &K) -> Result<(), PipelineError>
    where
        K: Sink<T>,
    {
        let stream = self.stream().await;
        sink.run(stream).await
    }
}

/// Source over records that are already in memory.
pub struct VecSource<T> {
    items: std::sync::Mutex<Option<Vec<T>>>,
}

impl<T> VecSource<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items: std::sync::Mutex::new(Some(items)),
        }
    }
}

#[async_trait::async_trait]
impl<T> Source<T> for VecSource<T>
where
    T: Send + 'static,
{
    /// Yields the items once; a second call yields an empty stream.
    async fn stream(&self) -> EnvelopeStream<T> {
        let items = self
            .items
            .lock()
            .map(|mut guard| guard.take().unwrap_or_default())
            .unwrap_or_default();
        Box::pin(futures::stream::iter(items.into_iter().map(|item| Ok(Envelope::now(item)))))
    }
}
