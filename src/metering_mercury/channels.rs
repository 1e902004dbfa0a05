use serde::{Deserialize, Serialize};

use super::frame::{ByteLayout, Command, ACTIVE_ENERGY, REACTIVE_ENERGY};

/// One physical quantity a Mercury meter can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeterChannel {
    Voltage1,
    Voltage2,
    Voltage3,
    Current1,
    Current2,
    Current3,
    PowerTotal,
    Power1,
    Power2,
    Power3,
    Frequency,
    EnergyActiveTotal,
    Energy1,
    Energy2,
    Energy3,
    EnergyReactiveTotal,
}

/// Which of the configured sample pauses applies to a channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TimingClass {
    Sample,
    Power,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Request {
    Instantaneous(u8),
    Energy(u8),
}

/// Everything needed to read and scale one channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelProfile {
    pub request: Request,
    pub layout: ByteLayout,
    pub divisor: f64,
    pub unit: &'static str,
    pub timing: TimingClass,
    /* the bus produces transient zero readings for these */
    pub suppress_zero: bool,
}

fn instantaneous(register: u8, divisor: f64, unit: &'static str, timing: TimingClass, suppress_zero: bool) -> ChannelProfile {
    ChannelProfile {
        request: Request::Instantaneous(register),
        layout: ByteLayout::Instantaneous,
        divisor,
        unit,
        timing,
        suppress_zero,
    }
}

fn energy(tariff: u8, layout: ByteLayout, unit: &'static str) -> ChannelProfile {
    ChannelProfile {
        request: Request::Energy(tariff),
        layout,
        divisor: 1000.0,
        unit,
        timing: TimingClass::Sample,
        suppress_zero: false,
    }
}

impl MeterChannel {
    pub fn all() -> Vec<MeterChannel> {
        vec![
            MeterChannel::Voltage1,
            MeterChannel::Voltage2,
            MeterChannel::Voltage3,
            MeterChannel::Current1,
            MeterChannel::Current2,
            MeterChannel::Current3,
            MeterChannel::PowerTotal,
            MeterChannel::Power1,
            MeterChannel::Power2,
            MeterChannel::Power3,
            MeterChannel::Frequency,
            MeterChannel::EnergyActiveTotal,
            MeterChannel::Energy1,
            MeterChannel::Energy2,
            MeterChannel::Energy3,
            MeterChannel::EnergyReactiveTotal,
        ]
    }

    pub fn profile(&self) -> ChannelProfile {
        use TimingClass::{Power, Sample};
        match self {
            MeterChannel::Voltage1 => instantaneous(0x11, 100.0, "V", Sample, true),
            MeterChannel::Voltage2 => instantaneous(0x12, 100.0, "V", Sample, true),
            MeterChannel::Voltage3 => instantaneous(0x13, 100.0, "V", Sample, true),
            MeterChannel::Current1 => instantaneous(0x21, 1000.0, "A", Sample, true),
            MeterChannel::Current2 => instantaneous(0x22, 1000.0, "A", Sample, true),
            MeterChannel::Current3 => instantaneous(0x23, 1000.0, "A", Sample, true),
            MeterChannel::PowerTotal => instantaneous(0x00, 100.0, "W", Power, false),
            MeterChannel::Power1 => instantaneous(0x01, 100.0, "W", Power, false),
            MeterChannel::Power2 => instantaneous(0x02, 100.0, "W", Power, false),
            MeterChannel::Power3 => instantaneous(0x03, 100.0, "W", Power, false),
            MeterChannel::Frequency => instantaneous(0x40, 100.0, "Hz", Sample, false),
            MeterChannel::EnergyActiveTotal => energy(0, ACTIVE_ENERGY, "kWh"),
            MeterChannel::Energy1 => energy(1, ACTIVE_ENERGY, "kWh"),
            MeterChannel::Energy2 => energy(2, ACTIVE_ENERGY, "kWh"),
            MeterChannel::Energy3 => energy(3, ACTIVE_ENERGY, "kWh"),
            MeterChannel::EnergyReactiveTotal => energy(0, REACTIVE_ENERGY, "kvarh"),
        }
    }

    pub fn command(&self, address: u8) -> Command {
        match self.profile().request {
            Request::Instantaneous(register) => Command::Instantaneous { address, register },
            Request::Energy(tariff) => Command::Energy { address, tariff },
        }
    }

    /// Name used as key in the published readings.
    pub fn id(&self) -> &'static str {
        match self {
            MeterChannel::Voltage1 => "voltage1",
            MeterChannel::Voltage2 => "voltage2",
            MeterChannel::Voltage3 => "voltage3",
            MeterChannel::Current1 => "current1",
            MeterChannel::Current2 => "current2",
            MeterChannel::Current3 => "current3",
            MeterChannel::PowerTotal => "power_total",
            MeterChannel::Power1 => "power1",
            MeterChannel::Power2 => "power2",
            MeterChannel::Power3 => "power3",
            MeterChannel::Frequency => "frequency",
            MeterChannel::EnergyActiveTotal => "energy_active_total",
            MeterChannel::Energy1 => "energy1",
            MeterChannel::Energy2 => "energy2",
            MeterChannel::Energy3 => "energy3",
            MeterChannel::EnergyReactiveTotal => "energy_reactive_total",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metering_mercury::frame::{ENERGY_RESPONSE_LEN, INSTANT_RESPONSE_LEN};

    #[test]
    fn test_voltage_and_current_suppress_zero() {
        for channel in MeterChannel::all() {
            let expected = matches!(
                channel,
                MeterChannel::Voltage1 | MeterChannel::Voltage2 | MeterChannel::Voltage3
                    | MeterChannel::Current1 | MeterChannel::Current2 | MeterChannel::Current3
            );
            assert_eq!(channel.profile().suppress_zero, expected, "{:?}", channel);
        }
    }

    #[test]
    fn test_only_power_uses_power_timing() {
        let power: Vec<MeterChannel> = MeterChannel::all()
            .into_iter()
            .filter(|c| c.profile().timing == TimingClass::Power)
            .collect();
        assert_eq!(power, vec![MeterChannel::PowerTotal, MeterChannel::Power1, MeterChannel::Power2, MeterChannel::Power3]);
    }

    #[test]
    fn test_commands() {
        assert_eq!(MeterChannel::Voltage2.command(0x2A), Command::Instantaneous { address: 0x2A, register: 0x12 });
        assert_eq!(MeterChannel::Energy3.command(0x2A), Command::Energy { address: 0x2A, tariff: 3 });
        assert_eq!(MeterChannel::EnergyReactiveTotal.command(1), Command::Energy { address: 1, tariff: 0 });
        assert_eq!(MeterChannel::Current1.command(1).expected_len(), INSTANT_RESPONSE_LEN);
        assert_eq!(MeterChannel::EnergyActiveTotal.command(1).expected_len(), ENERGY_RESPONSE_LEN);
    }

    #[test]
    fn test_ids_match_serde_names() {
        for channel in MeterChannel::all() {
            let yaml = serde_yml::to_string(&channel).unwrap();
            assert_eq!(yaml.trim(), channel.id());
        }
    }
}
