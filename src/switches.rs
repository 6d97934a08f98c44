//! Switch codes: which branches and sub-elements of the network exist.
//!
//! | bit | meaning when set      |
//! |-----|-----------------------|
//! | 0   | branch 1 disabled     |
//! | 1   | branch 2 disabled     |
//! | 2   | branch 3 disabled     |
//! | 3   | C1 bridged            |
//! | 4   | D1 bridged            |
//! | 5   | C3 bridged            |
//! | 6   | D3 bridged            |
//! | 7   | C2 bridged            |

use crate::config::Limits;
use crate::schematic::{ComponentId, Schematic};

const BRANCH_1: u8 = 1;
const BRANCH_2: u8 = 1 << 1;
const BRANCH_3: u8 = 1 << 2;
const C1_ABSENT: u8 = 1 << 3;
const D1_ABSENT: u8 = 1 << 4;
const C3_ABSENT: u8 = 1 << 5;
const D3_ABSENT: u8 = 1 << 6;
const C2_ABSENT: u8 = 1 << 7;

const ALL_BRANCHES: u8 = BRANCH_1 | BRANCH_2 | BRANCH_3;

/// Highest code enumerated; 255 disables every branch anyway.
pub const LAST_CODE: u8 = 254;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SwitchCode(u8);

impl SwitchCode {
    pub fn new(bits: u8) -> Self {
        SwitchCode(bits)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    fn has(self, mask: u8) -> bool {
        self.0 & mask != 0
    }

    /// A code is degenerate when no branch is left, or when it toggles a
    /// sub-element of a disabled branch (a duplicate of the code without
    /// that toggle).
    pub fn is_valid(self) -> bool {
        if self.0 & ALL_BRANCHES == ALL_BRANCHES {
            return false;
        }
        if self.has(BRANCH_1) && self.has(C1_ABSENT | D1_ABSENT) {
            return false;
        }
        if self.has(BRANCH_2) && self.has(C2_ABSENT) {
            return false;
        }
        if self.has(BRANCH_3) && self.has(C3_ABSENT | D3_ABSENT) {
            return false;
        }
        true
    }

    /// Set the structural slots of `sch` and return the components left
    /// free for the optimizer, in slot order.
    pub fn apply(self, sch: &mut Schematic, limits: &Limits) -> Vec<ComponentId> {
        let mut free = Vec::new();
        let switch = |absent: bool| {
            if absent {
                limits.null_resistance
            } else {
                limits.huge_resistance
            }
        };

        let branches = [
            (BRANCH_1, ComponentId::R1, ComponentId::C1, ComponentId::RC1, C1_ABSENT),
            (BRANCH_2, ComponentId::R2, ComponentId::C2, ComponentId::RC2, C2_ABSENT),
            (BRANCH_3, ComponentId::R3, ComponentId::C3, ComponentId::RC3, C3_ABSENT),
        ];
        for (branch, r, c, rc, c_absent) in branches {
            let enabled = !self.has(branch);
            if enabled {
                free.push(r);
            } else {
                sch[r] = limits.huge_resistance;
            }
            sch[rc] = switch(self.has(c_absent));
            if enabled && !self.has(c_absent) {
                free.push(c);
            }
        }
        sch[ComponentId::RD1] = switch(self.has(D1_ABSENT));
        sch[ComponentId::RD3] = switch(self.has(D3_ABSENT));

        free.sort();
        free
    }
}

impl std::fmt::Display for SwitchCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#010b}", self.0)
    }
}

/// Every non-degenerate code in ascending order.
pub fn valid_codes() -> impl Iterator<Item = SwitchCode> {
    (0..=LAST_CODE).map(SwitchCode).filter(|c| c.is_valid())
}
