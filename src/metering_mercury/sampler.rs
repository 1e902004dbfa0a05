use log::{debug, warn};

use crate::config::TimingConfig;
use super::channels::{MeterChannel, TimingClass};
use super::frame::{Command, Response};
use super::link::MeterLink;

pub const SAMPLE_COUNT: usize = 3;

/// A scaled value of one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub channel: MeterChannel,
    pub value: f64,
    pub unit: &'static str,
}

/// What is left of three samples after dropping the largest and the smallest.
pub fn survivor(samples: [f64; SAMPLE_COUNT]) -> f64 {
    let mut sorted = samples;
    sorted.sort_by(|a, b| a.total_cmp(b));
    return sorted[1];
}

/// Reads noisy registers three times and keeps the survivor.
pub struct ValueSampler<'a> {
    link: &'a dyn MeterLink,
    password: &'a str,
    timing: &'a TimingConfig,
}

impl<'a> ValueSampler<'a> {
    pub fn new(link: &'a dyn MeterLink, password: &'a str, timing: &'a TimingConfig) -> Self {
        return ValueSampler { link, password, timing };
    }

    /// `None` means there is nothing new to report for this channel.
    pub async fn sample(&self, channel: MeterChannel, address: u8) -> Option<Reading> {
        let profile = channel.profile();
        let pause = match profile.timing {
            TimingClass::Sample => self.timing.sample_pause(),
            TimingClass::Power => self.timing.power_sample_pause(),
        };
        let command = channel.command(address);

        let mut samples = [0f64; SAMPLE_COUNT];
        for s in samples.iter_mut() {
            if !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }
            let answer = self.read(&command).await;
            *s = answer.reassemble(profile.layout) as f64;
        }

        let raw = survivor(samples);
        if raw == 0.0 && profile.suppress_zero {
            debug!("Dropping zero reading of {} on {}", channel.id(), self.link.name());
            return None;
        }

        let value = raw / profile.divisor;
        debug!("{} : {} {}", channel.id(), value, profile.unit);
        Some(Reading { channel, value, unit: profile.unit })
    }

    async fn read(&self, command: &Command) -> Response {
        match self.link.authenticate_and_send(command, self.password).await {
            Ok(r) => r,
            Err(e) => {
                warn!("Request {:02X?} on {} failed: {}", command.words(), self.link.name(), e);
                Response::empty(command.expected_len())
            }
        }
    }
}
