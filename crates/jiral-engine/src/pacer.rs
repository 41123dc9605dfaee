use std::future::Future;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use std::time::Duration;

use futures::Stream;
use tokio::time::Sleep;

pin_project_lite::pin_project! {
    /// Stream adapter that holds each item after the first for `delay`
    /// before releasing it. Never reorders or drops items; a zero delay is
    /// a pass-through.
    pub struct Paced<S>
    where
        S: Stream,
    {
        #[pin]
        inner: S,
        delay: Duration,
        sleep: Option<Pin<Box<Sleep>>>,
        held: Option<S::Item>,
        released_any: bool,
    }
}

impl<S: Stream> Paced<S> {
    pub fn new(inner: S, delay: Duration) -> Self {
        Self {
            inner,
            delay,
            sleep: None,
            held: None,
            released_any: false,
        }
    }
}

impl<S: Stream> Stream for Paced<S> {
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();

        if this.held.is_none() {
            match this.inner.poll_next(cx) {
                Poll::Ready(Some(item)) => {
                    if !*this.released_any || this.delay.is_zero() {
                        *this.released_any = true;
                        return Poll::Ready(Some(item));
                    }
                    *this.held = Some(item);
                    let deadline = tokio::time::Instant::now() + *this.delay;
                    this.sleep
                        .get_or_insert_with(|| Box::pin(tokio::time::sleep_until(deadline)))
                        .as_mut()
                        .reset(deadline);
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }

        if let Some(sleep) = this.sleep.as_mut() {
            ready!(sleep.as_mut().poll(cx));
        }
        Poll::Ready(this.held.take())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn consecutive_items_spaced_by_delay() {
        let delay = Duration::from_millis(50);
        let mut paced = Box::pin(Paced::new(futures::stream::iter(vec!["a", "b", "c"]), delay));

        let mut stamps = Vec::new();
        let mut items = Vec::new();
        while let Some(item) = paced.next().await {
            stamps.push(Instant::now());
            items.push(item);
        }

        assert_eq!(items, vec!["a", "b", "c"]);
        for pair in stamps.windows(2) {
            assert!(pair[1] - pair[0] >= delay);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn first_item_not_delayed() {
        let start = Instant::now();
        let mut paced = Box::pin(Paced::new(futures::stream::iter(vec![1]), Duration::from_secs(5)));
        assert_eq!(paced.next().await, Some(1));
        assert!(start.elapsed() < Duration::from_secs(5));
        // End of stream is not delayed either.
        assert_eq!(paced.next().await, None);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_delay_passes_through() {
        let start = Instant::now();
        let items: Vec<i32> = Paced::new(futures::stream::iter(0..100), Duration::ZERO)
            .collect()
            .await;
        assert_eq!(items, (0..100).collect::<Vec<_>>());
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_upstream_not_delayed_further_than_needed() {
        // Upstream already spaces items 100ms apart; pacing adds 50ms per item
        // measured from when the item arrives.
        let upstream = futures::stream::iter(vec!["x", "y"]).then(|s| async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            s
        });
        let start = Instant::now();
        let items: Vec<&str> = Paced::new(upstream, Duration::from_millis(50)).collect().await;
        assert_eq!(items, vec!["x", "y"]);
        assert_eq!(start.elapsed(), Duration::from_millis(250));
    }
}
