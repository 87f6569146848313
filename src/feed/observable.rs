use tokio::sync::watch;

/// A value holder with "read current" and "write and notify".
///
/// Built on [`watch`]: subscribers always see the latest value, in write
/// order, and a slow subscriber never blocks the writer. `Observable` is not
/// `Clone`, so whoever owns it is the only writer; readers get receivers
/// from [`Observable::subscribe`].
#[derive(Debug)]
pub struct Observable<T> {
    tx: watch::Sender<T>,
}

impl<T: Clone> Observable<T> {
    pub fn new(initial: T) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    /// Clone of the current value.
    pub fn get(&self) -> T {
        self.tx.borrow().clone()
    }

    /// Replace the value and wake every subscriber.
    pub fn set(&self, value: T) {
        self.tx.send_replace(value);
    }

    /// Mutate in place; subscribers are notified only if `modify` returns true.
    pub fn update_if(&self, modify: impl FnOnce(&mut T) -> bool) -> bool {
        self.tx.send_if_modified(modify)
    }

    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_set_without_subscribers() {
        let value = Observable::new(1);
        value.set(2);
        assert_eq!(value.get(), 2);
    }

    #[tokio::test]
    async fn test_subscriber_sees_latest_write() {
        let value = Observable::new(String::from("a"));
        let mut rx = value.subscribe();

        value.set("b".into());
        value.set("c".into());

        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), "c");
    }

    #[tokio::test]
    async fn test_update_if_skips_notification() {
        let value = Observable::new(5u32);
        let rx = value.subscribe();

        let modified = value.update_if(|v| {
            if *v > 10 {
                *v = 0;
                true
            } else {
                false
            }
        });

        assert!(!modified);
        assert!(!rx.has_changed().unwrap());
        assert_eq!(value.get(), 5);
    }
}
