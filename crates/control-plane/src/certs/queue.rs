use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};

/// 证书任务队列：按域名去重的 FIFO，多生产者、单消费者
#[derive(Clone, Default)]
pub struct CertQueue {
    inner: Arc<QueueInner>,
}

#[derive(Default)]
struct QueueInner {
    pending: Mutex<VecDeque<String>>,
    ready: Notify,
}

impl CertQueue {
    /// Appends `domain` unless it is already pending. Returns whether it was added.
    pub async fn enqueue(&self, domain: &str) -> bool {
        let domain = domain.trim();
        if domain.is_empty() {
            return false;
        }
        let depth = {
            let mut pending = self.inner.pending.lock().await;
            if pending.iter().any(|d| d == domain) {
                return false;
            }
            pending.push_back(domain.to_string());
            pending.len()
        };
        crate::metrics::set_queue_depth(depth);
        self.inner.ready.notify_one();
        true
    }

    /// Waits until a domain is pending and removes the oldest one.
    pub async fn dequeue(&self) -> String {
        loop {
            if let Some(domain) = self.try_dequeue().await {
                return domain;
            }
            self.inner.ready.notified().await;
        }
    }

    pub async fn try_dequeue(&self) -> Option<String> {
        let mut pending = self.inner.pending.lock().await;
        let domain = pending.pop_front();
        if domain.is_some() {
            crate::metrics::set_queue_depth(pending.len());
        }
        domain
    }

    pub async fn contains(&self, domain: &str) -> bool {
        self.inner.pending.lock().await.iter().any(|d| d == domain)
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.inner.pending.lock().await.len()
    }

    #[cfg(test)]
    pub async fn snapshot(&self) -> Vec<String> {
        self.inner.pending.lock().await.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn duplicate_enqueue_is_noop() {
        let queue = CertQueue::default();
        assert!(queue.enqueue("a.example.com").await);
        assert!(!queue.enqueue("a.example.com").await);
        assert!(!queue.enqueue(" a.example.com ").await);
        assert_eq!(queue.snapshot().await, vec!["a.example.com"]);
    }

    #[tokio::test]
    async fn dequeue_is_fifo() {
        let queue = CertQueue::default();
        queue.enqueue("a.example.com").await;
        queue.enqueue("b.example.com").await;
        queue.enqueue("a.example.com").await;
        queue.enqueue("c.example.com").await;

        assert_eq!(queue.dequeue().await, "a.example.com");
        assert_eq!(queue.dequeue().await, "b.example.com");
        assert_eq!(queue.dequeue().await, "c.example.com");
        assert!(queue.try_dequeue().await.is_none());
    }

    #[tokio::test]
    async fn domain_can_be_requeued_after_dequeue() {
        let queue = CertQueue::default();
        queue.enqueue("a.example.com").await;
        assert_eq!(queue.dequeue().await, "a.example.com");
        assert!(queue.enqueue("a.example.com").await);
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn blank_domain_is_ignored() {
        let queue = CertQueue::default();
        assert!(!queue.enqueue("   ").await);
        assert_eq!(queue.len().await, 0);
    }

    #[tokio::test]
    async fn blocked_dequeue_wakes_on_enqueue() {
        let queue = CertQueue::default();
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.enqueue("late.example.com").await;

        let got = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, "late.example.com");
    }

    #[tokio::test]
    async fn concurrent_producers_keep_one_entry_per_domain() {
        let queue = CertQueue::default();
        let mut handles = Vec::new();
        for i in 0..16 {
            let queue = queue.clone();
            handles.push(tokio::spawn(async move {
                queue.enqueue(&format!("site{}.example.com", i % 4)).await
            }));
        }
        let mut added = 0;
        for handle in handles {
            if handle.await.unwrap() {
                added += 1;
            }
        }
        assert_eq!(added, 4);
        assert_eq!(queue.len().await, 4);
    }
}
