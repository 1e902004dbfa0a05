use crc16::{State, MODBUS};

/// Running Modbus CRC-16 (poly 0xA001 reflected, seed 0xFFFF) as used by
/// the Mercury request frames.
pub struct Crc16Modbus {
    state: State<MODBUS>,
}

impl Crc16Modbus {
    pub fn new() -> Self {
        return Crc16Modbus { state: State::<MODBUS>::new() };
    }

    pub fn update(&mut self, byte: u8) {
        self.state.update(&[byte]);
    }

    pub fn update_all(&mut self, bytes: &[u8]) {
        self.state.update(bytes);
    }

    pub fn value(&self) -> u16 {
        return self.state.get();
    }

    /* low byte goes first on the wire */
    pub fn to_wire(&self) -> [u8; 2] {
        return self.value().to_le_bytes();
    }
}

pub fn checksum(bytes: &[u8]) -> u16 {
    let mut crc = Crc16Modbus::new();
    crc.update_all(bytes);
    return crc.value();
}
