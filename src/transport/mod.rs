//! Violation sinks.
//!
//! Every alert that passes the gate is handed to a `ViolationSink`. Sinks are
//! fire-and-forget from the gate's point of view: a failed publish is logged
//! and never rolls back the cooldown.

use anyhow::Result;

use crate::ViolationEvent;

pub mod mqtt;
pub mod notify_log;

pub use mqtt::{parse_mqtt_endpoint, MqttEndpoint, MqttNotifier, MqttSettings};
pub use notify_log::NotificationLog;

pub trait ViolationSink: Send {
    fn name(&self) -> &'static str;

    fn publish(&mut self, ev: &ViolationEvent) -> Result<()>;
}

/// Publishes to every inner sink. A failing sink does not stop the others.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Box<dyn ViolationSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Box<dyn ViolationSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn push(&mut self, sink: Box<dyn ViolationSink>) {
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl ViolationSink for FanoutSink {
    fn name(&self) -> &'static str {
        "fanout"
    }

    fn publish(&mut self, ev: &ViolationEvent) -> Result<()> {
        for sink in &mut self.sinks {
            if let Err(e) = sink.publish(ev) {
                log::error!(
                    "sink {} failed for {} / {} on {}: {:#}",
                    sink.name(),
                    ev.identity_name,
                    ev.violation,
                    ev.camera_id,
                    e
                );
            }
        }
        Ok(())
    }
}
