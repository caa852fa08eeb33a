//! ---
//! ems_section: "07-control-stabilization"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Stabilization controller, windows and action classification."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::collections::VecDeque;

use mgrid_common::types::Channel;

use crate::errors::{ControlError, Result};

/// Bounded, insertion-ordered history. The oldest value is evicted first.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    values: VecDeque<f64>,
    capacity: usize,
}

impl SlidingWindow {
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(ControlError::ZeroCapacity);
        }
        Ok(Self {
            values: VecDeque::with_capacity(capacity),
            capacity,
        })
    }

    pub fn push(&mut self, value: f64) {
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    pub fn is_full(&self) -> bool {
        self.values.len() == self.capacity
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest-first copy of the current contents.
    pub fn snapshot(&self) -> Vec<f64> {
        self.values.iter().copied().collect()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}

/// One window per channel, sharing a capacity.
#[derive(Debug, Clone)]
pub struct ChannelWindows {
    voltage: SlidingWindow,
    frequency: SlidingWindow,
}

impl ChannelWindows {
    pub fn new(capacity: usize) -> Result<Self> {
        Ok(Self {
            voltage: SlidingWindow::new(capacity)?,
            frequency: SlidingWindow::new(capacity)?,
        })
    }

    pub fn push(&mut self, voltage: f64, frequency: f64) {
        self.voltage.push(voltage);
        self.frequency.push(frequency);
    }

    pub fn get(&self, channel: Channel) -> &SlidingWindow {
        match channel {
            Channel::Voltage => &self.voltage,
            Channel::Frequency => &self.frequency,
        }
    }

    pub fn is_full(&self) -> bool {
        self.voltage.is_full() && self.frequency.is_full()
    }

    pub fn clear(&mut self) {
        self.voltage.clear();
        self.frequency.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_capacity_is_rejected() {
        assert_eq!(SlidingWindow::new(0).unwrap_err(), ControlError::ZeroCapacity);
        assert!(ChannelWindows::new(0).is_err());
    }

    #[test]
    fn keeps_last_values_in_push_order() {
        let mut window = SlidingWindow::new(4).unwrap();
        for value in 0..11 {
            window.push(f64::from(value));
            assert!(window.len() <= 4);
        }
        assert!(window.is_full());
        assert_eq!(window.snapshot(), vec![7.0, 8.0, 9.0, 10.0]);
    }

    #[test]
    fn fills_then_clears() {
        let mut window = SlidingWindow::new(2).unwrap();
        assert!(window.is_empty());
        window.push(1.0);
        assert!(!window.is_full());
        window.push(2.0);
        assert!(window.is_full());
        window.clear();
        assert_eq!(window.len(), 0);
        assert_eq!(window.capacity(), 2);
    }

    #[test]
    fn channel_windows_fill_together() {
        let mut windows = ChannelWindows::new(3).unwrap();
        for n in 0..3 {
            assert!(!windows.is_full());
            windows.push(230.0 + f64::from(n), 50.0);
        }
        assert!(windows.is_full());
        assert_eq!(windows.get(Channel::Voltage).snapshot(), vec![230.0, 231.0, 232.0]);
        assert_eq!(windows.get(Channel::Frequency).snapshot(), vec![50.0; 3]);
    }
}
