//! Bit flag sets exchanged with clients and destination regions.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// How and why a teleport was requested. Values match the client protocol.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct TeleportFlags: u32 {
        const SET_HOME_TO_TARGET = 1 << 0;
        const SET_LAST_TO_TARGET = 1 << 1;
        const VIA_LURE = 1 << 2;
        const VIA_LANDMARK = 1 << 3;
        const VIA_LOCATION = 1 << 4;
        const VIA_HOME = 1 << 5;
        const VIA_TELEHUB = 1 << 6;
        const VIA_LOGIN = 1 << 7;
        const VIA_GODLIKE_LURE = 1 << 8;
        const GODLIKE = 1 << 9;
        const NINE_ONE_ONE = 1 << 10;
        const DISABLE_CANCEL = 1 << 11;
        const VIA_REGION_ID = 1 << 12;
        const IS_FLYING = 1 << 13;
        const RESET_HOME = 1 << 14;
        const FORCE_REDIRECT = 1 << 15;
    }
}

bitflags! {
    /// Agent movement control state.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct ControlFlags: u32 {
        const AT_POS = 1 << 0;
        const AT_NEG = 1 << 1;
        const LEFT_POS = 1 << 2;
        const LEFT_NEG = 1 << 3;
        const UP_POS = 1 << 4;
        const UP_NEG = 1 << 5;
        const FLY = 1 << 13;
        const STOP = 1 << 14;
        const STAND_UP = 1 << 16;
        const SIT_ON_GROUND = 1 << 17;
        const MOUSELOOK = 1 << 18;
    }
}

bitflags! {
    /// Directory flags attached to a region record.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct RegionFlags: u32 {
        const DEFAULT_REGION = 1 << 0;
        const FALLBACK_REGION = 1 << 1;
        const ONLINE = 1 << 2;
        const NO_DIRECT_LOGIN = 1 << 3;
        const PERSISTENT = 1 << 4;
        const LOCKED_OUT = 1 << 5;
        const HYPERLINK = 1 << 8;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_values() {
        assert_eq!(TeleportFlags::VIA_HOME.bits(), 32);
        assert_eq!(TeleportFlags::IS_FLYING.bits(), 0x2000);
        assert_eq!(ControlFlags::FLY.bits(), 0x2000);
        assert_eq!(RegionFlags::ONLINE.bits(), 4);
    }

    #[test]
    fn test_combination() {
        let flags = TeleportFlags::SET_LAST_TO_TARGET | TeleportFlags::VIA_LANDMARK;
        assert!(flags.contains(TeleportFlags::VIA_LANDMARK));
        assert!(!flags.contains(TeleportFlags::GODLIKE));
    }
}
