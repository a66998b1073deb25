use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Default)]
pub struct Clock {
    inner: Inner,
}

#[derive(Debug, Clone, Default)]
enum Inner {
    #[default]
    Realtime,
    #[cfg(test)]
    Fixed(DateTime<Utc>),
}

impl Clock {
    /// Creates a new real-time clock.
    pub fn new() -> Self {
        Self {
            inner: Inner::Realtime,
        }
    }

    /// Returns the current time.
    pub fn now(&self) -> DateTime<Utc> {
        match &self.inner {
            Inner::Realtime => Utc::now(),
            #[cfg(test)]
            Inner::Fixed(at) => *at,
        }
    }

    /// Creates a clock frozen at `at` for testing.
    #[cfg(test)]
    pub fn fixed(at: DateTime<Utc>) -> Self {
        Self {
            inner: Inner::Fixed(at),
        }
    }
}
