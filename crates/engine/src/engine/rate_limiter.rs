use parking_lot::Mutex;

/// Caps how many events per wall-clock second are marked `force_keep`.
///
/// A limit of 0 disables limiting: every call is allowed.
#[derive(Debug)]
pub struct RateLimiter {
    max_per_second: u32,
    window: Mutex<Window>,
}

#[derive(Debug, Default)]
struct Window {
    second: i64,
    count: u32,
}

impl RateLimiter {
    pub fn new(max_per_second: u32) -> Self {
        Self {
            max_per_second,
            window: Mutex::new(Window::default()),
        }
    }

    pub fn max_per_second(&self) -> u32 {
        self.max_per_second
    }

    /// Take a token for the current second.
    pub fn allow(&self) -> bool {
        if self.max_per_second == 0 {
            return true;
        }
        self.allow_at(chrono::Utc::now().timestamp())
    }

    pub(crate) fn allow_at(&self, second: i64) -> bool {
        if self.max_per_second == 0 {
            return true;
        }
        let mut window = self.window.lock();
        if window.second != second {
            window.second = second;
            window.count = 0;
        }
        if window.count < self.max_per_second {
            window.count += 1;
            true
        } else {
            false
        }
    }
}
