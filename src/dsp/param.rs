//! A timeline of value events for one automatable parameter, evaluated per sample
//! or per render quantum.
//!
//! Follows the WebAudio `AudioParam` model for the two event kinds the
//! drivers use. Events must be scheduled in non-decreasing time order; an
//! earlier event is rejected rather than silently reordered.

use crate::error::AutomationError;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Event {
    SetValue { value: f32, time: f64 },
    LinearRamp { value: f32, time: f64 },
}

impl Event {
    fn time(&self) -> f64 {
        match *self {
            Event::SetValue { time, .. } | Event::LinearRamp { time, .. } => time,
        }
    }

    fn value(&self) -> f32 {
        match *self {
            Event::SetValue { value, .. } | Event::LinearRamp { value, .. } => value,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AudioParam {
    value: f32,
    min: f32,
    max: f32,
    events: Vec<Event>,
}

impl AudioParam {
    pub fn new(default: f32, min: f32, max: f32) -> Self {
        Self {
            value: default.clamp(min, max),
            min,
            max,
            events: Vec::new(),
        }
    }

    /// Intrinsic value used before the first event.
    pub fn set_value(&mut self, value: f32) {
        if value.is_finite() {
            self.value = value.clamp(self.min, self.max);
        }
    }

    fn push(&mut self, event: Event) -> Result<(), AutomationError> {
        let time = event.time();
        if !time.is_finite() || time < 0.0 {
            return Err(AutomationError::InvalidTime(time));
        }
        if !event.value().is_finite() {
            return Err(AutomationError::InvalidValue(event.value()));
        }
        if let Some(last) = self.events.last() {
            if time < last.time() {
                return Err(AutomationError::OutOfOrder { time, last: last.time() });
            }
        }
        self.events.push(event);
        Ok(())
    }

    /// Jump to `value` at `time`.
    pub fn set_value_at_time(&mut self, value: f32, time: f64) -> Result<(), AutomationError> {
        self.push(Event::SetValue { value, time })
    }

    /// Ramp linearly from the previous event to `value`, arriving at `time`.
    pub fn linear_ramp_to_value_at_time(&mut self, value: f32, time: f64) -> Result<(), AutomationError> {
        self.push(Event::LinearRamp { value, time })
    }

    /// Time of the latest scheduled event, if any.
    pub fn last_event_time(&self) -> Option<f64> {
        self.events.last().map(Event::time)
    }

    /// Forget events that can no longer influence values at or after `time`.
    /// The last event at or before `time` is kept as the ramp anchor.
    pub fn prune_before(&mut self, time: f64) {
        let passed = self.events.iter().take_while(|e| e.time() <= time).count();
        if passed > 1 {
            self.events.drain(..passed - 1);
        }
    }

    /// Evaluate the timeline at `time`.
    pub fn value_at(&self, time: f64) -> f32 {
        // Index of the first event strictly after `time`
        let next = self.events.partition_point(|e| e.time() <= time);
        let (prev_time, prev_value) = match next.checked_sub(1) {
            Some(i) => (self.events[i].time(), self.events[i].value()),
            None => (0.0, self.value),
        };
        let v = match self.events.get(next) {
            Some(Event::LinearRamp { value, time: end }) if *end > prev_time => {
                let frac = ((time - prev_time) / (end - prev_time)).clamp(0.0, 1.0) as f32;
                prev_value + (value - prev_value) * frac
            }
            _ => prev_value,
        };
        v.clamp(self.min, self.max)
    }

    /// Fill `out` with per-sample values starting at `start`.
    pub fn fill(&self, start: f64, sample_rate: f32, out: &mut [f32]) {
        if self.events.is_empty() {
            out.fill(self.value);
            return;
        }
        let dt = 1.0 / sample_rate as f64;
        for (i, v) in out.iter_mut().enumerate() {
            *v = self.value_at(start + i as f64 * dt);
        }
    }
}
