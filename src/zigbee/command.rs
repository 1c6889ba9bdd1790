//! Command payloads for the coordinator firmware and the inverters behind it.
//! Every builder returns the hex payload that `frame::encode` wraps.

use crate::inverter::{EcuAddress, PairId, Serial};

pub const PING: &str = "2101";
pub const PING_REPLY: &str = "FE026101";

pub const HEALTH_CHECK: &str = "2700";
/// Device type and state of a running coordinator, after its IEEE address.
pub const COORDINATOR_RUNNING: &str = "0709";

pub const AF_DATA_REQUEST_OK: &str = "FE01640100";
pub const AF_DATA_CONFIRM_OK: &str = "FE03448000";
pub const AF_INCOMING_MSG: &str = "4481";
/// Incoming message header including its two status bytes.
pub const AF_INCOMING_DATA: &str = "44810000";

pub const INITIALIZE_STEPS: usize = 8;
pub const PAIR_STEPS: usize = 4;

const PAIR_PREFIX: &str = "24020FFFFFFFFFFFFFFFFF14FFFF14";

/// Network setup, one command per step.
pub fn initialize(step: usize, ecu: &EcuAddress) -> Option<String> {
    let payload = match step {
        0 => "2605030103".to_string(),
        1 => "410000".to_string(),
        2 => format!("26050108FFFF{}", ecu.reversed()),
        3 => "2605870100".to_string(),
        4 => format!("26058302{}", ecu.short_address()),
        5 => "2605840400000100".to_string(),
        6 => "240014050F00010100020000150000".to_string(),
        7 => "2600".to_string(),
        _ => return None,
    };
    Some(payload)
}

pub fn normal_operation(ecu: &EcuAddress) -> String {
    format!(
        "2401FFFF1414060001000F1E{}FBFB1100000D6030FBD3000000000000000004010281FEFE",
        ecu.reversed()
    )
}

pub fn pair(step: usize, serial: &Serial, ecu: &EcuAddress) -> Option<String> {
    let payload = match step {
        0 => format!("{PAIR_PREFIX}0D0200000F1100{serial}FFFF10FFFF{}", ecu.reversed()),
        1 => format!("{PAIR_PREFIX}0C0201000F0600{serial}"),
        2 => format!(
            "{PAIR_PREFIX}0F0102000F1100{serial}{}10FFFF{}",
            ecu.short_address_swapped(),
            ecu.reversed()
        ),
        3 => format!("{PAIR_PREFIX}010103000F0600{}", ecu.reversed()),
        _ => return None,
    };
    Some(payload)
}

pub fn poll(pair_id: &PairId, ecu: &EcuAddress) -> String {
    format!(
        "2401{pair_id}1414060001000F13{}FBFB06BB000000000000C1FEFE",
        ecu.reversed()
    )
}

pub fn reboot(pair_id: &PairId, ecu: &EcuAddress) -> String {
    format!(
        "2401{pair_id}1414060001000F13{}FBFB06C1000000000000A6FEFE",
        ecu.reversed()
    )
}
