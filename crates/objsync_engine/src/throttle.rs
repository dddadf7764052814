//! Rate limiting of observation streams.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Re-emits the latest value of `input` at most once per `period`.
///
/// Intermediate values are dropped. The last value seen before `input`
/// closes is always delivered. Must be called from within a tokio runtime.
pub fn sample<T: Send + 'static>(
    mut input: mpsc::Receiver<T>,
    period: Duration,
) -> mpsc::Receiver<T> {
    let (tx, rx) = mpsc::channel(1);
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut latest = None;
        loop {
            tokio::select! {
                next = input.recv() => match next {
                    Some(value) => latest = Some(value),
                    None => break,
                },
                _ = ticker.tick() => {
                    if let Some(value) = latest.take() {
                        if tx.send(value).await.is_err() {
                            return;
                        }
                    }
                }
            }
        }
        if let Some(value) = latest {
            let _ = tx.send(value).await;
        }
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn burst_collapses_to_latest() {
        let (tx, rx) = mpsc::channel(128);
        let mut sampled = sample(rx, Duration::from_millis(50));
        for i in 0..100u32 {
            tx.send(i).await.unwrap();
        }
        drop(tx);

        let mut seen = Vec::new();
        while let Some(value) = sampled.recv().await {
            seen.push(value);
        }
        assert!(!seen.is_empty() && seen.len() <= 3);
        assert_eq!(seen.last(), Some(&99));
    }

    #[tokio::test]
    async fn spaced_values_all_arrive() {
        let (tx, rx) = mpsc::channel(8);
        let mut sampled = sample(rx, Duration::from_millis(10));

        tx.send(1u32).await.unwrap();
        assert_eq!(sampled.recv().await, Some(1));
        tx.send(2).await.unwrap();
        assert_eq!(sampled.recv().await, Some(2));
        drop(tx);
        assert_eq!(sampled.recv().await, None);
    }
}
