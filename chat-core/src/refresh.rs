//! Pull-to-refresh gesture and scroll tracking.
//!
//! The gesture only decides *whether* to load older history; the
//! synchronizer performs the fetch.

/// A gesture may start this close to the top of the list.
pub const START_SLOP_PX: f64 = 5.0;
/// Pull distance past which the refresh indicator shows.
pub const TRIGGER_DISTANCE_PX: f64 = 50.0;
/// Distance from the bottom past which the user counts as scrolled away.
pub const NEAR_BOTTOM_PX: f64 = 100.0;

/// Pull-down gesture over the message list.
#[derive(Debug, Default)]
pub struct PullToRefresh {
    start_y: Option<f64>,
    distance: f64,
}

impl PullToRefresh {
    /// Create an idle gesture.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pointer down at `y` while the list is scrolled to `scroll_top`.
    /// Returns whether a gesture began.
    pub fn press(&mut self, scroll_top: f64, y: f64) -> bool {
        if scroll_top > START_SLOP_PX {
            return false;
        }
        self.start_y = Some(y);
        self.distance = 0.0;
        true
    }

    /// Pointer moved to `y`. Returns the pull distance.
    pub fn drag(&mut self, y: f64) -> f64 {
        if let Some(start) = self.start_y {
            self.distance = (y - start).max(0.0);
        }
        self.distance
    }

    /// Whether the refresh indicator is showing.
    pub fn indicator_visible(&self) -> bool {
        self.start_y.is_some() && self.distance > TRIGGER_DISTANCE_PX
    }

    /// Pointer released. Returns whether to load older history.
    /// Any release resets the gesture.
    pub fn release(&mut self, has_more: bool, loading: bool) -> bool {
        let trigger = self.indicator_visible() && has_more && !loading;
        self.start_y = None;
        self.distance = 0.0;
        trigger
    }

    /// Whether a gesture is in progress.
    pub fn is_pulling(&self) -> bool {
        self.start_y.is_some()
    }

    /// Current pull distance.
    pub fn distance(&self) -> f64 {
        self.distance
    }
}

/// Tracks whether the user scrolled away from the latest message.
#[derive(Debug, Default)]
pub struct ScrollTracker {
    scrolled_away: bool,
}

impl ScrollTracker {
    /// Create a tracker pinned to the bottom.
    pub fn new() -> Self {
        Self::default()
    }

    /// The list scrolled. Returns whether the user is now away from the
    /// bottom.
    pub fn on_scroll(&mut self, scroll_top: f64, scroll_height: f64, client_height: f64) -> bool {
        let from_bottom = scroll_height - scroll_top - client_height;
        self.scrolled_away = from_bottom >= NEAR_BOTTOM_PX;
        self.scrolled_away
    }

    /// Whether the user scrolled away from the bottom.
    pub fn scrolled_away(&self) -> bool {
        self.scrolled_away
    }

    /// Pin back to the bottom (conversation switched).
    pub fn reset(&mut self) {
        self.scrolled_away = false;
    }
}
