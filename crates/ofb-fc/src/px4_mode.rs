//! PX4 flight mode names <-> HEARTBEAT `custom_mode`.
//!
//! PX4 packs the main mode into bits 16..24 and the sub mode into bits 24..32.

use crate::LinkError;

const MAIN_MANUAL: u8 = 1;
const MAIN_ALTCTL: u8 = 2;
const MAIN_POSCTL: u8 = 3;
const MAIN_AUTO: u8 = 4;
const MAIN_ACRO: u8 = 5;
const MAIN_OFFBOARD: u8 = 6;
const MAIN_STABILIZED: u8 = 7;
const MAIN_RATTITUDE: u8 = 8;

const MODES: &[(&str, u8, u8)] = &[
    ("MANUAL", MAIN_MANUAL, 0),
    ("ALTCTL", MAIN_ALTCTL, 0),
    ("POSCTL", MAIN_POSCTL, 0),
    ("ACRO", MAIN_ACRO, 0),
    ("OFFBOARD", MAIN_OFFBOARD, 0),
    ("STABILIZED", MAIN_STABILIZED, 0),
    ("RATTITUDE", MAIN_RATTITUDE, 0),
    ("AUTO.READY", MAIN_AUTO, 1),
    ("AUTO.TAKEOFF", MAIN_AUTO, 2),
    ("AUTO.LOITER", MAIN_AUTO, 3),
    ("AUTO.MISSION", MAIN_AUTO, 4),
    ("AUTO.RTL", MAIN_AUTO, 5),
    ("AUTO.LAND", MAIN_AUTO, 6),
    ("AUTO.RTGS", MAIN_AUTO, 7),
    ("AUTO.FOLLOW_TARGET", MAIN_AUTO, 8),
    ("AUTO.PRECLAND", MAIN_AUTO, 9),
];

/// (main_mode, sub_mode) for a mode name, as sent in MAV_CMD_DO_SET_MODE param2/param3.
pub fn encode(mode: &str) -> Result<(u8, u8), LinkError> {
    MODES
        .iter()
        .find(|(name, _, _)| *name == mode)
        .map(|&(_, main, sub)| (main, sub))
        .ok_or_else(|| LinkError::UnknownMode(mode.to_string()))
}

pub fn custom_mode(main: u8, sub: u8) -> u32 {
    ((main as u32) << 16) | ((sub as u32) << 24)
}

pub fn decode(custom_mode: u32) -> String {
    let main = ((custom_mode >> 16) & 0xff) as u8;
    let sub = ((custom_mode >> 24) & 0xff) as u8;
    // Sub mode only means something under AUTO.
    let sub = if main == MAIN_AUTO { sub } else { 0 };
    MODES
        .iter()
        .find(|&&(_, m, s)| m == main && s == sub)
        .map(|(name, _, _)| name.to_string())
        .unwrap_or_else(|| format!("CMODE({})", custom_mode))
}

pub fn is_known(mode: &str) -> bool {
    encode(mode).is_ok()
}
