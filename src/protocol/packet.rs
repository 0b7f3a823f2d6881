use super::commands::CommandId;
use super::crc::crc16_xmodem;
use crate::error::InvalidParameter;

/// Magic bytes at the start of every MBB frame.
const MAGIC: [u8; 2] = [0x5A, 0x00];

/// Bytes before the TLV body: magic(2) + length(1) + reserved(1) + service(1) + command(1).
const HEADER_LEN: usize = 6;

/// Largest body whose `length` (body + 3) still fits the one-byte field.
const MAX_BODY_LEN: usize = u8::MAX as usize - 3;

/// A logical MBB command: routing ids plus ordered tagged parameters.
///
/// Wire format:
/// ```text
/// [0x5A 0x00] [length: 1] [0x00] [service_id] [command_id] [TLV params...] [CRC16: 2 bytes BE]
/// ```
///
/// `length` is the TLV body size + 3. The device firmware expects exactly
/// this value, so it is not derived from the real header size.
/// TLV param: [tag: 1 byte] [length: 1 byte] [value: `length` bytes]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    command_id: CommandId,
    parameters: Vec<(u8, Vec<u8>)>,
}

impl Command {
    /// Build a command, rejecting parameters whose lengths cannot be
    /// described by the one-byte length fields.
    pub fn new(
        command_id: CommandId,
        parameters: Vec<(u8, Vec<u8>)>,
    ) -> Result<Self, InvalidParameter> {
        if let Some((tag, value)) = parameters
            .iter()
            .find(|(_, value)| value.len() > u8::MAX as usize)
        {
            return Err(InvalidParameter::ValueTooLong {
                tag: *tag,
                len: value.len(),
            });
        }
        let body: usize = parameters.iter().map(|(_, v)| 2 + v.len()).sum();
        if body > MAX_BODY_LEN {
            return Err(InvalidParameter::BodyTooLong { body });
        }
        Ok(Self {
            command_id,
            parameters,
        })
    }

    /// Command carrying a single fixed-size parameter. A value too long to
    /// frame is rejected at compile time.
    pub fn with_param<const N: usize>(command_id: CommandId, tag: u8, value: [u8; N]) -> Self {
        const { assert!(N + 2 <= MAX_BODY_LEN, "parameter does not fit one frame") };
        Self {
            command_id,
            parameters: vec![(tag, value.to_vec())],
        }
    }

    pub fn service_id(&self) -> u8 {
        self.command_id[0]
    }

    pub fn command_id(&self) -> u8 {
        self.command_id[1]
    }

    pub fn parameters(&self) -> &[(u8, Vec<u8>)] {
        &self.parameters
    }

    /// Serialize this command to the exact bytes written to the stream.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut body = Vec::new();
        for (tag, value) in &self.parameters {
            body.push(*tag);
            body.push(value.len() as u8);
            body.extend_from_slice(value);
        }

        let length = (body.len() + 3) as u8;
        let mut result = Vec::with_capacity(HEADER_LEN + body.len() + 2);
        result.extend_from_slice(&MAGIC);
        result.push(length);
        result.push(0x00);
        result.extend_from_slice(&self.command_id);
        result.extend_from_slice(&body);

        let crc = crc16_xmodem(&result);
        result.extend_from_slice(&crc.to_be_bytes());
        result
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cmd={:02X}{:02X}", self.service_id(), self.command_id())?;
        for (t, v) in self.parameters() {
            write!(f, " p{}={}", t, hex(v))?;
        }
        Ok(())
    }
}

/// Lowercase hex without separators.
pub fn hex(data: &[u8]) -> String {
    data.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body_len(params: &[(u8, Vec<u8>)]) -> usize {
        params.iter().map(|(_, v)| 2 + v.len()).sum()
    }

    #[test]
    fn test_noise_cancel_frame() {
        let cmd = Command::new([43, 4], vec![(1, vec![0x01, 0xFF])]).unwrap();
        let bytes = cmd.to_bytes();

        let header = [0x5A, 0x00, 0x07, 0x00, 0x2B, 0x04, 0x01, 0x02, 0x01, 0xFF];
        assert_eq!(&bytes[..10], &header);
        assert_eq!(&bytes[10..], &crc16_xmodem(&header).to_be_bytes());
        assert_eq!(bytes.len(), 12);
    }

    #[test]
    fn test_length_field_and_total_size() {
        let cases: Vec<Vec<(u8, Vec<u8>)>> = vec![
            vec![],
            vec![(1, vec![])],
            vec![(1, vec![0x00, 0x00])],
            vec![(1, vec![0xAA; 10]), (2, vec![0x01]), (3, vec![])],
            vec![(7, vec![0x55; 250])],
        ];

        for params in cases {
            let body = body_len(&params);
            let bytes = Command::new([0x01, 0x08], params).unwrap().to_bytes();
            assert_eq!(bytes.len(), 6 + body + 2);
            assert_eq!(bytes[2], (body + 3) as u8);
            assert_eq!(&bytes[..2], &MAGIC);
            assert_eq!(bytes[3], 0x00);
        }
    }

    #[test]
    fn test_parameters_keep_input_order() {
        let cmd = Command::new([0x2B, 0x10], vec![(9, vec![0x01]), (2, vec![0x02])]).unwrap();
        let bytes = cmd.to_bytes();
        assert_eq!(&bytes[6..12], &[9, 1, 0x01, 2, 1, 0x02]);
    }

    #[test]
    fn test_oversized_parameter_rejected() {
        let err = Command::new([43, 4], vec![(1, vec![0x00]), (5, vec![0u8; 256])]).unwrap_err();
        assert_eq!(err, InvalidParameter::ValueTooLong { tag: 5, len: 256 });
    }

    #[test]
    fn test_oversized_body_rejected() {
        // 251 bytes of value + 2 TLV header bytes pushes length past 0xFF
        let err = Command::new([43, 4], vec![(1, vec![0u8; 251])]).unwrap_err();
        assert_eq!(err, InvalidParameter::BodyTooLong { body: 253 });

        assert!(Command::new([43, 4], vec![(1, vec![0u8; 250])]).is_ok());
    }

    #[test]
    fn test_checksum_covers_whole_header() {
        let cmd = Command::new([43, 4], vec![(1, vec![0x02, 0xFF])]).unwrap();
        let bytes = cmd.to_bytes();
        let split = bytes.len() - 2;
        let crc = u16::from_be_bytes([bytes[split], bytes[split + 1]]);
        assert_eq!(crc, crc16_xmodem(&bytes[..split]));
    }

    #[test]
    fn test_accessors_and_display() {
        let cmd = Command::new([43, 4], vec![(1, vec![0x01, 0xFF])]).unwrap();
        assert_eq!(cmd.service_id(), 43);
        assert_eq!(cmd.command_id(), 4);
        assert_eq!(cmd.parameters(), &[(1u8, vec![0x01, 0xFF])]);
        assert_eq!(cmd.to_string(), "cmd=2B04 p1=01ff");
    }

    #[test]
    fn test_with_param_matches_validated_command() {
        let fixed = Command::with_param([43, 4], 1, [0x02, 0xFF]);
        let checked = Command::new([43, 4], vec![(1, vec![0x02, 0xFF])]).unwrap();
        assert_eq!(fixed, checked);
        assert_eq!(fixed.to_bytes(), checked.to_bytes());
    }
}
