//! Terminal rendering of the recording countdown.

use countdown::{CountdownSnapshot, COUNTDOWN_START};

pub struct CountdownOverlay {
    previous_count: u8,
}

impl CountdownOverlay {
    pub fn new() -> Self {
        Self {
            previous_count: COUNTDOWN_START,
        }
    }

    /// Returns the frame for `snapshot`, or `None` when nothing should show.
    /// A changed count below the start value is drawn emphasized.
    pub fn render(&mut self, snapshot: CountdownSnapshot) -> Option<String> {
        if !snapshot.is_active {
            return None;
        }

        let pulse = snapshot.count != self.previous_count && snapshot.count < COUNTDOWN_START;
        if pulse {
            self.previous_count = snapshot.count;
            Some(format!("recording in ( {} )", snapshot.count))
        } else {
            Some(format!("recording in   {}", snapshot.count))
        }
    }
}

impl Default for CountdownOverlay {
    fn default() -> Self {
        Self::new()
    }
}
