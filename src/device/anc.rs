use crate::protocol::commands::{CMD_ANC_WRITE, PARAM_ANC_MODE};
use crate::protocol::Command;

/// ANC mode values, in toggle order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Off = 0,
    NoiseCancel = 1,
    Awareness = 2,
}

impl Mode {
    /// Next mode in the cycle Off -> NoiseCancel -> Awareness -> Off.
    pub fn next(self) -> Self {
        match self {
            Self::Off => Self::NoiseCancel,
            Self::NoiseCancel => Self::Awareness,
            Self::Awareness => Self::Off,
        }
    }

    /// `[mode, level]` payload written under the ANC mode tag.
    /// Off carries no level; the others ask for the device default (0xFF).
    pub fn payload(self) -> [u8; 2] {
        match self {
            Self::Off => [0x00, 0x00],
            Self::NoiseCancel => [0x01, 0xFF],
            Self::Awareness => [0x02, 0xFF],
        }
    }

    /// The fixed write command selecting this mode.
    pub fn command(self) -> Command {
        Command::with_param(CMD_ANC_WRITE, PARAM_ANC_MODE, self.payload())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::NoiseCancel => "noise-cancel",
            Self::Awareness => "awareness",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Off => "ANC Off",
            Self::NoiseCancel => "ANC On",
            Self::Awareness => "Awareness",
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "off" | "normal" => Ok(Self::Off),
            "noise-cancel" | "anc" | "on" | "cancellation" => Ok(Self::NoiseCancel),
            "awareness" | "transparency" => Ok(Self::Awareness),
            _ => Err(format!(
                "unknown ANC mode '{}' (expected off, noise-cancel or awareness)",
                s
            )),
        }
    }
}

/// Tracks the last requested ANC mode and produces the command for each change.
///
/// The mode here is what was asked for, not what the earbuds applied: the
/// link has no acknowledgement channel.
#[derive(Debug, Default)]
pub struct ModeController {
    current: Mode,
}

impl ModeController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Mode {
        self.current
    }

    /// Advance to the next mode and return the command that selects it.
    pub fn toggle(&mut self) -> Command {
        self.current = self.current.next();
        self.current.command()
    }

    /// Jump straight to `mode`.
    pub fn select(&mut self, mode: Mode) -> Command {
        self.current = mode;
        mode.command()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_mode_is_off() {
        assert_eq!(ModeController::new().current(), Mode::Off);
    }

    #[test]
    fn test_toggle_cycle_and_payloads() {
        let mut ctl = ModeController::new();

        let expected = [
            (Mode::NoiseCancel, [0x01, 0xFF]),
            (Mode::Awareness, [0x02, 0xFF]),
            (Mode::Off, [0x00, 0x00]),
        ];

        for (mode, payload) in expected {
            let cmd = ctl.toggle();
            assert_eq!(ctl.current(), mode);
            assert_eq!(cmd.service_id(), 43);
            assert_eq!(cmd.command_id(), 4);
            assert_eq!(cmd.parameters(), &[(1u8, payload.to_vec())]);
        }
    }

    #[test]
    fn test_select_sets_mode() {
        let mut ctl = ModeController::new();
        let cmd = ctl.select(Mode::Awareness);
        assert_eq!(ctl.current(), Mode::Awareness);
        assert_eq!(cmd.parameters(), &[(PARAM_ANC_MODE, vec![0x02, 0xFF])]);

        // Toggling continues from the selected mode
        ctl.toggle();
        assert_eq!(ctl.current(), Mode::Off);
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!("off".parse::<Mode>().unwrap(), Mode::Off);
        assert_eq!("Noise-Cancel".parse::<Mode>().unwrap(), Mode::NoiseCancel);
        assert_eq!("awareness".parse::<Mode>().unwrap(), Mode::Awareness);
        assert!("loud".parse::<Mode>().is_err());
    }

    #[test]
    fn test_off_frame_bytes() {
        let bytes = Mode::Off.command().to_bytes();
        assert_eq!(&bytes[..10], &[0x5A, 0x00, 0x07, 0x00, 0x2B, 0x04, 0x01, 0x02, 0x00, 0x00]);
    }
}
