//! Reactive stream primitives used by the decision pipeline.
//!
//! All operators are plain stream adapters: they own their upstream streams
//! and are driven by whoever polls them. Dropping the outermost stream drops
//! every upstream stream it owns, which cancels all work underneath it.

use async_stream::stream;
use futures_util::future;
use futures_util::stream::{self, BoxStream, StreamExt};
use tokio::sync::watch;

/// Stream that yields a single value and completes.
pub fn just<T: Send + 'static>(value: T) -> BoxStream<'static, T> {
    stream::once(future::ready(value)).boxed()
}

/// Follow a `watch` channel: yields the current value first, then every
/// replacement. Ends when the sender is dropped.
pub fn watch_stream<T>(mut receiver: watch::Receiver<T>) -> BoxStream<'static, T>
where
    T: Clone + Send + Sync + 'static,
{
    Box::pin(stream! {
        loop {
            let current = receiver.borrow_and_update().clone();
            yield current;
            if receiver.changed().await.is_err() {
                break;
            }
        }
    })
}

/// Join `sources` on a "latest of every one" basis.
///
/// Nothing is emitted until every source has delivered at least once. After
/// that, each delivery from any source replaces that source's slot and the
/// full slot array is emitted. The slots are owned by the single consumer
/// polling this stream, so each emitted vector is one consistent snapshot.
///
/// An empty input yields an empty stream; callers decide what "no sources"
/// means for them.
pub fn combine_latest<T>(sources: Vec<BoxStream<'static, T>>) -> BoxStream<'static, Vec<T>>
where
    T: Clone + Send + 'static,
{
    let width = sources.len();
    let mut merged = stream::select_all(
        sources
            .into_iter()
            .enumerate()
            .map(|(slot, source)| source.map(move |value| (slot, value)).boxed()),
    );

    Box::pin(stream! {
        if width == 0 {
            return;
        }
        let mut latest: Vec<Option<T>> = vec![None; width];
        let mut filled = 0usize;
        while let Some((slot, value)) = merged.next().await {
            if latest[slot].replace(value).is_none() {
                filled += 1;
            }
            if filled == width {
                yield latest.iter().flatten().cloned().collect::<Vec<T>>();
            }
        }
    })
}

enum SwitchEvent<A, B> {
    Outer(Option<A>),
    Inner(Option<B>),
}

/// Map every outer value to an inner stream and follow only the newest one.
///
/// A new outer value drops the previous inner stream before the next inner
/// value is read. Completion of an inner stream does not end the result; it
/// ends once the outer stream and the current inner stream are both done.
pub fn switch_map<A, B, F>(mut outer: BoxStream<'static, A>, f: F) -> BoxStream<'static, B>
where
    A: Send + 'static,
    B: Send + 'static,
    F: Fn(A) -> BoxStream<'static, B> + Send + 'static,
{
    Box::pin(stream! {
        let mut inner: Option<BoxStream<'static, B>> = None;
        let mut outer_done = false;
        loop {
            let event = match inner.as_mut() {
                Some(current) => tokio::select! {
                    biased;
                    next = outer.next(), if !outer_done => SwitchEvent::Outer(next),
                    next = current.next() => SwitchEvent::Inner(next),
                },
                None if outer_done => break,
                None => SwitchEvent::Outer(outer.next().await),
            };
            match event {
                SwitchEvent::Outer(Some(value)) => {
                    inner = Some(f(value));
                }
                SwitchEvent::Outer(None) => {
                    outer_done = true;
                    if inner.is_none() {
                        break;
                    }
                }
                SwitchEvent::Inner(Some(value)) => yield value,
                SwitchEvent::Inner(None) => {
                    inner = None;
                    if outer_done {
                        break;
                    }
                }
            }
        }
    })
}

/// Drop items whose key equals the key of the previously emitted item.
pub fn distinct_until_changed_by<T, K, F>(
    source: BoxStream<'static, T>,
    key: F,
) -> BoxStream<'static, T>
where
    T: Send + 'static,
    K: PartialEq + Send + 'static,
    F: Fn(&T) -> K + Send + 'static,
{
    Box::pin(stream! {
        let mut last: Option<K> = None;
        for await item in source {
            let current = key(&item);
            if last.as_ref() != Some(&current) {
                last = Some(current);
                yield item;
            }
        }
    })
}

/// Drop items equal to the previously emitted item.
pub fn distinct_until_changed<T>(source: BoxStream<'static, T>) -> BoxStream<'static, T>
where
    T: Clone + PartialEq + Send + 'static,
{
    distinct_until_changed_by(source, T::clone)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    fn channel_stream<T: Send + 'static>(mut rx: mpsc::UnboundedReceiver<T>) -> BoxStream<'static, T> {
        Box::pin(stream! {
            while let Some(item) = rx.recv().await {
                yield item;
            }
        })
    }

    async fn next<T>(s: &mut BoxStream<'static, T>) -> Option<T> {
        timeout(Duration::from_secs(1), s.next())
            .await
            .expect("stream did not emit in time")
    }

    async fn silent<T: std::fmt::Debug>(s: &mut BoxStream<'static, T>) {
        let result = timeout(Duration::from_millis(50), s.next()).await;
        assert!(result.is_err(), "unexpected emission: {result:?}");
    }

    #[tokio::test]
    async fn test_combine_latest_waits_for_all() {
        let (tx_a, rx_a) = mpsc::unbounded_channel();
        let (tx_b, rx_b) = mpsc::unbounded_channel();
        let mut joined = combine_latest(vec![channel_stream(rx_a), channel_stream(rx_b)]);

        tx_a.send(1).unwrap();
        silent(&mut joined).await;

        tx_b.send(10).unwrap();
        assert_eq!(next(&mut joined).await, Some(vec![1, 10]));

        tx_a.send(2).unwrap();
        assert_eq!(next(&mut joined).await, Some(vec![2, 10]));

        tx_b.send(20).unwrap();
        assert_eq!(next(&mut joined).await, Some(vec![2, 20]));
    }

    #[tokio::test]
    async fn test_combine_latest_empty() {
        let mut joined = combine_latest::<u8>(Vec::new());
        assert_eq!(next(&mut joined).await, None);
    }

    #[tokio::test]
    async fn test_switch_map_drops_previous_inner() {
        let (outer_tx, outer_rx) = mpsc::unbounded_channel::<u32>();
        let (inner_a_tx, inner_a_rx) = mpsc::unbounded_channel::<u32>();
        let (inner_b_tx, inner_b_rx) = mpsc::unbounded_channel::<u32>();
        let inners = std::sync::Mutex::new(vec![Some(inner_b_rx), Some(inner_a_rx)]);

        let mut switched = switch_map(channel_stream(outer_rx), move |_| {
            let rx = inners.lock().unwrap().pop().flatten().unwrap();
            channel_stream(rx)
        });

        outer_tx.send(1).unwrap();
        inner_a_tx.send(100).unwrap();
        assert_eq!(next(&mut switched).await, Some(100));

        outer_tx.send(2).unwrap();
        inner_b_tx.send(200).unwrap();
        assert_eq!(next(&mut switched).await, Some(200));

        // The first inner stream was dropped when the second outer value arrived.
        assert!(inner_a_tx.send(101).is_err());
    }

    #[tokio::test]
    async fn test_switch_map_completes_after_outer_and_inner() {
        let outer = stream::iter(vec![1u32, 2]).boxed();
        let collected: Vec<u32> = switch_map(outer, |n| stream::iter(vec![n * 10]).boxed())
            .collect()
            .await;
        assert_eq!(collected.last(), Some(&20));
    }

    #[tokio::test]
    async fn test_distinct_until_changed() {
        let source = stream::iter(vec![1, 1, 2, 2, 2, 1, 3]).boxed();
        let collected: Vec<i32> = distinct_until_changed(source).collect().await;
        assert_eq!(collected, vec![1, 2, 1, 3]);
    }

    #[tokio::test]
    async fn test_watch_stream_yields_current_then_updates() {
        let (tx, rx) = watch::channel(1);
        let mut followed = watch_stream(rx);
        assert_eq!(next(&mut followed).await, Some(1));
        tx.send(2).unwrap();
        assert_eq!(next(&mut followed).await, Some(2));
        drop(tx);
        assert_eq!(next(&mut followed).await, None);
    }
}
