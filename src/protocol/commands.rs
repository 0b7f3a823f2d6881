/// Routing ids for the Huawei MBB command set used over SPP.
/// Format: [service_id, command_id].

/// ANC mode write.
pub const CMD_ANC_WRITE: CommandId = [0x2B, 0x04];

/// Parameter tag carrying `[mode, level]` in an ANC write.
pub const PARAM_ANC_MODE: u8 = 1;

/// Well-known Serial Port Profile service class UUID.
pub const SPP_UUID: bluer::Uuid = bluer::Uuid::from_u128(0x00001101_0000_1000_8000_00805f9b34fb);

/// Helper type for command IDs
pub type CommandId = [u8; 2];
