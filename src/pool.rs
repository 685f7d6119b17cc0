use std::cell::RefCell;
use std::ops::{Deref, DerefMut};
use std::rc::{Rc, Weak};
use std::time;

const OVER_MAX_LOG_INTERVAL: time::Duration = time::Duration::from_secs(10);

struct OverMaxLog {
    next_log_time: Option<time::Instant>,
    last_logged_count: usize,
}

impl OverMaxLog {
    fn check(&mut self, created: usize, max_size: usize, name: &str) {
        if created < max_size {
            return;
        }

        let now = time::Instant::now();

        // Log at most once per interval, unless the overshoot has grown by another full pool
        let interval_elapsed = self.next_log_time.map_or(true, |t| now >= t);
        let grown = created > self.last_logged_count + max_size;

        if interval_elapsed || grown {
            self.last_logged_count = created;
            self.next_log_time = Some(now + OVER_MAX_LOG_INTERVAL);

            tracing::warn!(pool = name, created = created + 1, max = max_size, "pool max size reached");
        }
    }
}

struct PoolInner<T> {
    name: &'static str,
    items: Vec<T>,
    max_size: usize,
    // Items alive that belong to this pool, stored or checked out
    created: usize,
    create: Box<dyn Fn() -> T>,
    over_max_log: OverMaxLog,
}

impl<T> PoolInner<T> {
    fn create_item(&mut self) -> T {
        self.over_max_log.check(self.created, self.max_size, self.name);
        self.created += 1;
        (self.create)()
    }

    fn put(&mut self, item: T) {
        if self.items.len() < self.max_size {
            self.items.push(item);
        } else {
            // Dropped rather than stored
            self.created -= 1;
        }
    }
}

/// A single-threaded object pool. Items are handed out as [`Pooled`] guards which return the
/// item to the pool when dropped.
///
/// The pool never refuses a request: once empty it creates new items, logging a warning when the
/// number of live items reaches the maximum. At most `max_size` items are kept for reuse.
pub struct Pool<T> {
    inner: Rc<RefCell<PoolInner<T>>>,
}

impl<T> Clone for Pool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> Pool<T> {
    pub fn new<F>(name: &'static str, start_size: usize, max_size: usize, create: F) -> Self
    where
        F: Fn() -> T + 'static,
    {
        assert!(
            start_size <= max_size,
            "invalid pool configuration: start_size > max_size"
        );

        let mut inner = PoolInner {
            name,
            items: Vec::with_capacity(start_size),
            max_size,
            created: 0,
            create: Box::new(create),
            over_max_log: OverMaxLog {
                next_log_time: None,
                last_logged_count: 0,
            },
        };

        for _ in 0..start_size {
            let item = inner.create_item();
            inner.put(item);
        }

        tracing::debug!(pool = name, start_size, max_size, "created pool");

        Self {
            inner: Rc::new(RefCell::new(inner)),
        }
    }

    pub fn take(&self) -> Pooled<T> {
        let mut inner = self.inner.borrow_mut();

        let item = match inner.items.pop() {
            Some(item) => item,
            None => inner.create_item(),
        };

        Pooled {
            item: Some(item),
            pool: Rc::downgrade(&self.inner),
        }
    }

    /// Number of items stored and ready for reuse.
    pub fn available(&self) -> usize {
        self.inner.borrow().items.len()
    }

    /// Number of live items belonging to this pool, stored or checked out.
    pub fn created(&self) -> usize {
        self.inner.borrow().created
    }

    /// Number of items currently checked out.
    pub fn in_use(&self) -> usize {
        let inner = self.inner.borrow();
        inner.created - inner.items.len()
    }
}

/// An item checked out of a [`Pool`]. Returned to the pool exactly once, on drop.
pub struct Pooled<T> {
    item: Option<T>,
    pool: Weak<RefCell<PoolInner<T>>>,
}

impl<T> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Only empty during drop
        match self.item.as_ref() {
            Some(item) => item,
            None => unreachable!(),
        }
    }
}

impl<T> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        match self.item.as_mut() {
            Some(item) => item,
            None => unreachable!(),
        }
    }
}

impl<T> Drop for Pooled<T> {
    fn drop(&mut self) {
        if let (Some(item), Some(pool)) = (self.item.take(), self.pool.upgrade()) {
            pool.borrow_mut().put(item);
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Pooled<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.item.fmt(f)
    }
}

/// Byte buffers of a fixed size, one per datagram.
pub type BufferPool = Pool<Box<[u8]>>;

pub type ByteBuffer = Pooled<Box<[u8]>>;

impl BufferPool {
    pub fn with_buffer_size(buffer_size: usize, start_size: usize, max_size: usize) -> Self {
        Self::new("buffer", start_size, max_size, move || {
            vec![0u8; buffer_size].into_boxed_slice()
        })
    }
}
