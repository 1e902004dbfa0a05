use chrono::NaiveDate;

use super::crc::Crc16Modbus;

/* Answer lengths are fixed per command, the meter sends no length byte or terminator */
pub const TEST_CONNECTION_LEN: usize = 4;
pub const AUTH_RESPONSE_LEN: usize = 4;
pub const ADDRESS_RESPONSE_LEN: usize = 4;
pub const SERIAL_RESPONSE_LEN: usize = 10;
pub const INSTANT_RESPONSE_LEN: usize = 6;
pub const ENERGY_RESPONSE_LEN: usize = 19;

pub const BROADCAST_ADDRESS: u8 = 0x00;
pub const PASSWORD_LEN: usize = 6;

/// One request understood by the Mercury 2xx family.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    TestConnection,
    Authenticate([u8; PASSWORD_LEN]),
    GetAddress,
    SerialNumber { address: u8 },
    Instantaneous { address: u8, register: u8 },
    Energy { address: u8, tariff: u8 },
}

impl Command {
    /// The command words before the CRC is appended.
    pub fn words(&self) -> Vec<u8> {
        match self {
            Command::TestConnection => vec![BROADCAST_ADDRESS, 0x00],
            Command::Authenticate(digits) => {
                let mut w = vec![BROADCAST_ADDRESS, 0x01, 0x01];
                w.extend_from_slice(digits);
                w
            }
            Command::GetAddress => vec![BROADCAST_ADDRESS, 0x08, 0x05],
            Command::SerialNumber { address } => vec![*address, 0x08, 0x00],
            Command::Instantaneous { address, register } => vec![*address, 0x08, 0x11, *register],
            Command::Energy { address, tariff } => vec![*address, 0x05, 0x00, *tariff],
        }
    }

    pub fn expected_len(&self) -> usize {
        match self {
            Command::TestConnection => TEST_CONNECTION_LEN,
            Command::Authenticate(_) => AUTH_RESPONSE_LEN,
            Command::GetAddress => ADDRESS_RESPONSE_LEN,
            Command::SerialNumber { .. } => SERIAL_RESPONSE_LEN,
            Command::Instantaneous { .. } => INSTANT_RESPONSE_LEN,
            Command::Energy { .. } => ENERGY_RESPONSE_LEN,
        }
    }

    pub fn request(&self) -> Vec<u8> {
        return build_request(&self.words());
    }
}

/// Appends the CRC (low byte first) to the command words.
pub fn build_request(words: &[u8]) -> Vec<u8> {
    let mut crc = Crc16Modbus::new();
    crc.update_all(words);

    let mut frame = Vec::with_capacity(words.len() + 2);
    frame.extend_from_slice(words);
    frame.extend_from_slice(&crc.to_wire());
    return frame;
}

/// Splits a six digit password into one byte per digit, `None` for anything else.
pub fn password_digits(password: &str) -> Option<[u8; PASSWORD_LEN]> {
    let bytes = password.as_bytes();
    if bytes.len() != PASSWORD_LEN || !bytes.iter().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let mut digits = [0u8; PASSWORD_LEN];
    for (i, b) in bytes.iter().enumerate() {
        digits[i] = b - b'0';
    }
    return Some(digits);
}

/// How a multi byte field is laid out inside an answer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ByteLayout {
    /// Three bytes in the order {1, 3, 2} behind a zero pad byte.
    Instantaneous,
    /// Four bytes starting at `base` in the order {base+1, base, base+3, base+2}.
    Energy { base: usize },
}

pub const ACTIVE_ENERGY: ByteLayout = ByteLayout::Energy { base: 1 };
pub const REACTIVE_ENERGY: ByteLayout = ByteLayout::Energy { base: 9 };

#[derive(Debug, Clone, PartialEq)]
pub struct SerialInfo {
    pub serial_number: String,
    pub manufactured: Option<NaiveDate>,
}

/// A fixed length answer. Response CRCs are not checked, the meter family
/// only protects the request direction.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    bytes: Vec<u8>,
}

/// Cuts or zero pads the received bytes to the length the command expects.
pub fn parse_response(buffer: &[u8], expected_len: usize) -> Response {
    let mut bytes = vec![0u8; expected_len];
    let n = std::cmp::min(buffer.len(), expected_len);
    bytes[..n].copy_from_slice(&buffer[..n]);
    return Response { bytes };
}

impl Response {
    pub fn empty(expected_len: usize) -> Self {
        return Response { bytes: vec![0u8; expected_len] };
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True for the all zero "no data" answer.
    pub fn is_blank(&self) -> bool {
        self.bytes.iter().all(|b| *b == 0)
    }

    pub fn byte(&self, idx: usize) -> u8 {
        return self.bytes.get(idx).copied().unwrap_or(0);
    }

    /// Test connection and password answers carry the result code in byte 1.
    pub fn acknowledged(&self) -> bool {
        return self.byte(1) == 0x00;
    }

    pub fn network_address(&self) -> u8 {
        return self.byte(2);
    }

    pub fn reassemble(&self, layout: ByteLayout) -> u32 {
        let be = match layout {
            ByteLayout::Instantaneous => [0x00, self.byte(1), self.byte(3), self.byte(2)],
            ByteLayout::Energy { base } => [
                self.byte(base + 1),
                self.byte(base),
                self.byte(base + 3),
                self.byte(base + 2),
            ],
        };
        return u32::from_be_bytes(be);
    }

    /// Serial number (bytes 1..=4, two decimal digits each) and the
    /// manufacturing date (day, month, year since 2000) of a serial query.
    pub fn serial_info(&self) -> SerialInfo {
        let serial_number = format!(
            "{:02}{:02}{:02}{:02}",
            self.byte(1),
            self.byte(2),
            self.byte(3),
            self.byte(4)
        );
        let manufactured = NaiveDate::from_ymd_opt(
            2000 + self.byte(7) as i32,
            self.byte(6) as u32,
            self.byte(5) as u32,
        );
        return SerialInfo { serial_number, manufactured };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metering_mercury::crc::checksum;

    #[test]
    fn test_build_request_appends_crc() {
        let frame = build_request(&[0x00, 0x00]);
        assert_eq!(frame.len(), 4);
        let crc = checksum(&[0x00, 0x00]);
        assert_eq!(frame[2], (crc & 0xFF) as u8);
        assert_eq!(frame[3], (crc >> 8) as u8);
        assert_eq!(frame, vec![0x00, 0x00, 0x01, 0xB0]);
    }

    #[test]
    fn test_command_table() {
        assert_eq!(Command::TestConnection.words(), vec![0x00, 0x00]);
        assert_eq!(Command::GetAddress.words(), vec![0x00, 0x08, 0x05]);
        assert_eq!(
            Command::Instantaneous { address: 0x2A, register: 0x11 }.words(),
            vec![0x2A, 0x08, 0x11, 0x11]
        );
        assert_eq!(Command::Energy { address: 0x2A, tariff: 2 }.words(), vec![0x2A, 0x05, 0x00, 0x02]);
        assert_eq!(Command::SerialNumber { address: 7 }.words(), vec![0x07, 0x08, 0x00]);

        assert_eq!(Command::TestConnection.expected_len(), 4);
        assert_eq!(Command::Energy { address: 1, tariff: 0 }.expected_len(), 19);
        assert_eq!(Command::SerialNumber { address: 1 }.expected_len(), 10);
        assert_eq!(Command::Instantaneous { address: 1, register: 0 }.request().len(), 6);
    }

    #[test]
    fn test_authenticate_frame() {
        let digits = password_digits("123456").unwrap();
        let words = Command::Authenticate(digits).words();
        assert_eq!(words, vec![0x00, 0x01, 0x01, 1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_password_digits() {
        assert_eq!(password_digits("111111"), Some([1, 1, 1, 1, 1, 1]));
        assert_eq!(password_digits("000000"), Some([0; 6]));
        assert_eq!(password_digits("11111"), None);
        assert_eq!(password_digits("1111111"), None);
        assert_eq!(password_digits("11a111"), None);
        assert_eq!(password_digits(""), None);
    }

    #[test]
    fn test_parse_response_pads_and_truncates() {
        let short = parse_response(&[0x00, 0xFA, 0x00, 0x64, 0x00], 6);
        assert_eq!(short.as_bytes(), &[0x00, 0xFA, 0x00, 0x64, 0x00, 0x00]);

        let long = parse_response(&[1, 2, 3, 4, 5], 4);
        assert_eq!(long.as_bytes(), &[1, 2, 3, 4]);

        assert!(parse_response(&[], 4).is_blank());
    }

    #[test]
    fn test_instantaneous_reassembly() {
        let r = parse_response(&[0x00, 0xFA, 0x00, 0x64, 0x00], INSTANT_RESPONSE_LEN);
        assert_eq!(r.reassemble(ByteLayout::Instantaneous), 0x00FA_6400);

        /* 230.45 V as reported by a Mercury 230 */
        let r = parse_response(&[0x2A, 0x00, 0x05, 0x5A, 0x00, 0x00], INSTANT_RESPONSE_LEN);
        assert_eq!(r.reassemble(ByteLayout::Instantaneous), 23045);
    }

    #[test]
    fn test_energy_reassembly() {
        let mut buf = vec![0u8; ENERGY_RESPONSE_LEN];
        buf[1] = 0x00;
        buf[2] = 0x01;
        buf[3] = 0x34;
        buf[4] = 0x12;
        buf[9] = 0x02;
        buf[10] = 0x00;
        buf[11] = 0x10;
        buf[12] = 0x00;
        let r = parse_response(&buf, ENERGY_RESPONSE_LEN);
        assert_eq!(r.reassemble(ACTIVE_ENERGY), 0x0100_1234);
        assert_eq!(r.reassemble(REACTIVE_ENERGY), 0x0002_0010);
    }

    #[test]
    fn test_acknowledge_and_address() {
        let probe = parse_response(&[0x00, 0x00, 0x6B, 0x00], TEST_CONNECTION_LEN);
        assert!(probe.acknowledged());

        let denied = parse_response(&[0x00, 0x05, 0x00, 0x00], AUTH_RESPONSE_LEN);
        assert!(!denied.acknowledged());

        let addr = parse_response(&[0x00, 0x00, 0x2A, 0x11], ADDRESS_RESPONSE_LEN);
        assert_eq!(addr.network_address(), 0x2A);
    }

    #[test]
    fn test_serial_info() {
        let r = parse_response(&[0x2A, 12, 34, 56, 78, 15, 3, 21, 0xAA, 0xBB], SERIAL_RESPONSE_LEN);
        let info = r.serial_info();
        assert_eq!(info.serial_number, "12345678");
        assert_eq!(info.manufactured, NaiveDate::from_ymd_opt(2021, 3, 15));

        let blank = Response::empty(SERIAL_RESPONSE_LEN).serial_info();
        assert_eq!(blank.serial_number, "00000000");
        assert_eq!(blank.manufactured, None);
    }
}
