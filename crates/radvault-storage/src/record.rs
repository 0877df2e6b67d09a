//! Record layout table and address resolution.

use std::fmt;
use std::str::FromStr;

/// How a record's bytes are protected at rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Policy {
    Plain,
    DeviceBound,
    PasscodeBound,
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Policy::Plain => "plain",
            Policy::DeviceBound => "device",
            Policy::PasscodeBound => "passcode",
        })
    }
}

/// Where a record's elements live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Allocation {
    /// A single element at `base`
    Fixed { base: u32 },
    /// `count` elements, `stride` bytes apart
    Linear { base: u32, count: u16, stride: u16 },
    /// `rows × cols` elements; the packed index carries the row in its
    /// high byte and the column in its low byte
    Grid {
        base: u32,
        rows: u16,
        row_stride: u16,
        cols: u16,
        col_stride: u16,
    },
}

const fn fixed(base: u32) -> Allocation {
    Allocation::Fixed { base }
}

const fn linear(base: u32, count: u16, stride: u16) -> Allocation {
    Allocation::Linear {
        base,
        count,
        stride,
    }
}

const fn grid(base: u32, rows: u16, row_stride: u16, cols: u16, col_stride: u16) -> Allocation {
    Allocation::Grid {
        base,
        rows,
        row_stride,
        cols,
        col_stride,
    }
}

/// Row/column pair for grid-allocated records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridIndex {
    pub row: u8,
    pub col: u8,
}

impl GridIndex {
    pub const fn pack(self) -> u16 {
        ((self.row as u16) << 8) | self.col as u16
    }

    pub const fn unpack(index: u16) -> Self {
        Self {
            row: (index >> 8) as u8,
            col: (index & 0xFF) as u8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordDescriptor {
    pub allocation: Allocation,
    /// Element size in bytes. Zero marks an unsized stream region.
    pub size: u16,
    pub policy: Policy,
}

impl RecordDescriptor {
    /// Flash address of element `index`, or `None` when out of range.
    pub const fn resolve(&self, index: u16) -> Option<u32> {
        match self.allocation {
            Allocation::Fixed { base } => {
                if index == 0 {
                    Some(base)
                } else {
                    None
                }
            }
            Allocation::Linear {
                base,
                count,
                stride,
            } => {
                if index < count {
                    Some(base + index as u32 * stride as u32)
                } else {
                    None
                }
            }
            Allocation::Grid {
                base,
                rows,
                row_stride,
                cols,
                col_stride,
            } => {
                let at = GridIndex::unpack(index);
                if (at.row as u16) < rows && (at.col as u16) < cols {
                    Some(base + at.row as u32 * row_stride as u32 + at.col as u32 * col_stride as u32)
                } else {
                    None
                }
            }
        }
    }

    /// Number of addressable elements.
    pub const fn count(&self) -> u32 {
        match self.allocation {
            Allocation::Fixed { .. } => 1,
            Allocation::Linear { count, .. } => count as u32,
            Allocation::Grid { rows, cols, .. } => rows as u32 * cols as u32,
        }
    }

    pub const fn base(&self) -> u32 {
        match self.allocation {
            Allocation::Fixed { base }
            | Allocation::Linear { base, .. }
            | Allocation::Grid { base, .. } => base,
        }
    }

    /// Every valid element index, in address order within each row.
    pub fn indices(&self) -> impl Iterator<Item = u16> {
        let (rows, cols) = match self.allocation {
            Allocation::Fixed { .. } => (1u16, 1u16),
            Allocation::Linear { count, .. } => (1, count),
            Allocation::Grid { rows, cols, .. } => (rows, cols),
        };
        let packed = matches!(self.allocation, Allocation::Grid { .. });
        (0..rows).flat_map(move |r| {
            (0..cols).map(move |c| {
                if packed {
                    GridIndex {
                        row: r as u8,
                        col: c as u8,
                    }
                    .pack()
                } else {
                    c
                }
            })
        })
    }
}

macro_rules! record_table {
    ($( $id:ident => $name:literal, $policy:ident, $size:literal, $alloc:expr; )*) => {
        /// Every persistent record the firmware stores in external flash.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum RecordId {
            $($id,)*
        }

        impl RecordId {
            pub const ALL: &'static [RecordId] = &[$(RecordId::$id,)*];

            pub const fn name(self) -> &'static str {
                match self {
                    $(RecordId::$id => $name,)*
                }
            }

            pub const fn descriptor(self) -> RecordDescriptor {
                match self {
                    $(RecordId::$id => RecordDescriptor {
                        allocation: $alloc,
                        size: $size,
                        policy: Policy::$policy,
                    },)*
                }
            }
        }
    };
}

record_table! {
    SettingsMain    => "settings-main",     DeviceBound,   16,  fixed(0x4000);
    VfoIndices      => "vfo-indices",       DeviceBound,   8,   fixed(0x5000);
    AudioSettings   => "audio-settings",    DeviceBound,   8,   fixed(0xA000);
    FmConfig        => "fm-config",         DeviceBound,   8,   fixed(0x6000);
    FmChannels      => "fm-channels",       DeviceBound,   80,  fixed(0x3000);
    SettingsExtra   => "settings-extra",    DeviceBound,   80,  fixed(0x7000);
    AniDtmfId       => "ani-dtmf-id",       DeviceBound,   8,   fixed(0x8000);
    KillCode        => "kill-code",         DeviceBound,   8,   fixed(0x8008);
    ReviveCode      => "revive-code",       DeviceBound,   8,   fixed(0x8010);
    DtmfUpCode      => "dtmf-up-code",      DeviceBound,   16,  fixed(0x8018);
    DtmfDownCode    => "dtmf-down-code",    DeviceBound,   16,  fixed(0x8028);
    ScanList        => "scan-list",         DeviceBound,   8,   fixed(0x9000);
    FLock           => "f-lock",            DeviceBound,   8,   fixed(0xB000);
    MrAttributes    => "mr-attributes",     PasscodeBound, 1,   linear(0x2000, 200, 1);
    CustomSettings  => "custom-settings",   DeviceBound,   8,   fixed(0xC000);
    ChannelData     => "channel-data",      PasscodeBound, 16,  linear(0x0000, 200, 16);
    ChannelNames    => "channel-names",     PasscodeBound, 16,  linear(0xE000, 200, 16);
    VfoData         => "vfo-data",          PasscodeBound, 16,  grid(0x1000, 8, 32, 2, 16);
    DtmfContacts    => "dtmf-contacts",     DeviceBound,   16,  linear(0xF000, 16, 16);
    CalibRssi3      => "calib-rssi3",       Plain,         8,   fixed(0x100C0);
    CalibRssi0      => "calib-rssi0",       Plain,         8,   fixed(0x100C8);
    CalibBattery    => "calib-battery",     Plain,         12,  fixed(0x10140);
    CalibVox1       => "calib-vox1",        Plain,         2,   linear(0x10150, 6, 2);
    CalibVox0       => "calib-vox0",        Plain,         2,   linear(0x10168, 6, 2);
    CalibMisc       => "calib-misc",        Plain,         8,   fixed(0x10188);
    CalibTxPower    => "calib-tx-power",    Plain,         3,   grid(0x100D0, 7, 16, 3, 3);
    CalibSquelch    => "calib-squelch",     Plain,         1,   grid(0x10000, 2, 0x60, 10, 1);
    VoicePromptData => "voice-prompt-data", Plain,         0,   linear(0x14C000, 2, 0x800);
    VoiceClipData   => "voice-clip-data",   Plain,         0,   linear(0x14D000, 0xFFFF, 1);
    Passcode        => "passcode",          Plain,         128, fixed(0x7100);
}

impl RecordId {
    pub const fn policy(self) -> Policy {
        self.descriptor().policy
    }

    pub const fn resolve(self, index: u16) -> Option<u32> {
        self.descriptor().resolve(index)
    }

    pub const fn count(self) -> u32 {
        self.descriptor().count()
    }

    pub const fn element_size(self) -> u16 {
        self.descriptor().size
    }

    /// Position of this record's bit in the migration mask.
    pub const fn ordinal(self) -> u8 {
        self as u8
    }

    pub fn from_ordinal(ordinal: u8) -> Option<Self> {
        Self::ALL.get(ordinal as usize).copied()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownRecord(pub String);

impl fmt::Display for UnknownRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown record: {}", self.0)
    }
}

impl std::error::Error for UnknownRecord {}

impl FromStr for RecordId {
    type Err = UnknownRecord;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|r| r.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownRecord(s.to_string()))
    }
}
