use crc::{Crc, CRC_16_XMODEM};

const CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

/// CRC-16/XMODEM: poly 0x1021, init 0, no reflection, no final XOR.
pub fn crc16_xmodem(data: &[u8]) -> u16 {
    CRC.checksum(data)
}
