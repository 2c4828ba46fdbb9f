//! Commands that can be sent to the module.
//!
//! Every command is an ASCII string starting with `AT`:
//! - `AT` liveness probe
//! - `AT+<NAME><VALUE>` configuration writes
//! - `AT+<NAME>?` configuration queries
//! - `AT+RESET`, `AT+RENEW` and similar bare actions

use crate::codec::CommandCodec;
use crate::hex::u16_to_hex;

/// UART bit rates supported by the module, in probing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BaudRate {
    /// 9600 baud (factory default).
    B9600,
    /// 19200 baud.
    B19200,
    /// 38400 baud.
    B38400,
    /// 57600 baud.
    B57600,
    /// 115200 baud.
    B115200,
}

impl BaudRate {
    /// All supported rates in ascending order.
    pub const ALL: [BaudRate; 5] = [
        BaudRate::B9600,
        BaudRate::B19200,
        BaudRate::B38400,
        BaudRate::B57600,
        BaudRate::B115200,
    ];

    /// The rate a module uses after a factory renew.
    pub const FACTORY_DEFAULT: BaudRate = BaudRate::B9600;

    /// Bits per second.
    pub fn bits_per_second(&self) -> u32 {
        match self {
            BaudRate::B9600 => 9600,
            BaudRate::B19200 => 19200,
            BaudRate::B38400 => 38400,
            BaudRate::B57600 => 57600,
            BaudRate::B115200 => 115200,
        }
    }

    /// Index used by `AT+BAUD<n>` and reported by `AT+BAUD?`.
    pub fn index(&self) -> u8 {
        match self {
            BaudRate::B9600 => 0,
            BaudRate::B19200 => 1,
            BaudRate::B38400 => 2,
            BaudRate::B57600 => 3,
            BaudRate::B115200 => 4,
        }
    }

    /// Look up a rate by its module-side index.
    pub fn from_index(index: u8) -> Option<BaudRate> {
        BaudRate::ALL.get(usize::from(index)).copied()
    }

    /// Look up a rate by bits per second.
    pub fn from_bits_per_second(bps: u32) -> Option<BaudRate> {
        BaudRate::ALL.into_iter().find(|b| b.bits_per_second() == bps)
    }
}

impl Default for BaudRate {
    fn default() -> Self {
        BaudRate::FACTORY_DEFAULT
    }
}

impl std::fmt::Display for BaudRate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.bits_per_second())
    }
}

/// iBeacon advertising interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdvertInterval {
    /// 100 ms.
    Ms100,
    /// 150 ms.
    Ms150,
    /// 210 ms.
    Ms210,
    /// 320 ms.
    Ms320,
    /// 420 ms.
    Ms420,
    /// 550 ms.
    Ms550,
    /// 760 ms.
    Ms760,
    /// 850 ms.
    Ms850,
    /// 1020 ms.
    Ms1020,
    /// 1285 ms (factory default).
    #[default]
    Ms1285,
}

impl AdvertInterval {
    /// Highest valid index.
    pub const MAX_INDEX: u8 = 9;

    const ALL: [AdvertInterval; 10] = [
        AdvertInterval::Ms100,
        AdvertInterval::Ms150,
        AdvertInterval::Ms210,
        AdvertInterval::Ms320,
        AdvertInterval::Ms420,
        AdvertInterval::Ms550,
        AdvertInterval::Ms760,
        AdvertInterval::Ms850,
        AdvertInterval::Ms1020,
        AdvertInterval::Ms1285,
    ];

    /// Index used by `AT+ADVI<n>`.
    pub fn index(&self) -> u8 {
        *self as u8
    }

    /// Look up an interval by index.
    pub fn from_index(index: u8) -> Option<AdvertInterval> {
        Self::ALL.get(usize::from(index)).copied()
    }

    /// Interval length in milliseconds.
    pub fn millis(&self) -> u32 {
        match self {
            AdvertInterval::Ms100 => 100,
            AdvertInterval::Ms150 => 150,
            AdvertInterval::Ms210 => 210,
            AdvertInterval::Ms320 => 320,
            AdvertInterval::Ms420 => 420,
            AdvertInterval::Ms550 => 550,
            AdvertInterval::Ms760 => 760,
            AdvertInterval::Ms850 => 850,
            AdvertInterval::Ms1020 => 1020,
            AdvertInterval::Ms1285 => 1285,
        }
    }
}

/// Radio transmit power.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TxPower {
    /// -23 dBm.
    Minus23Dbm,
    /// -6 dBm.
    Minus6Dbm,
    /// 0 dBm (factory default).
    #[default]
    ZeroDbm,
    /// +6 dBm.
    Plus6Dbm,
}

impl TxPower {
    /// Index used by `AT+POWE<n>`.
    pub fn index(&self) -> u8 {
        match self {
            TxPower::Minus23Dbm => 0,
            TxPower::Minus6Dbm => 1,
            TxPower::ZeroDbm => 2,
            TxPower::Plus6Dbm => 3,
        }
    }

    /// Look up a power level by index.
    pub fn from_index(index: u8) -> Option<TxPower> {
        match index {
            0 => Some(TxPower::Minus23Dbm),
            1 => Some(TxPower::Minus6Dbm),
            2 => Some(TxPower::ZeroDbm),
            3 => Some(TxPower::Plus6Dbm),
            _ => None,
        }
    }

    /// Output power in dBm.
    pub fn dbm(&self) -> i8 {
        match self {
            TxPower::Minus23Dbm => -23,
            TxPower::Minus6Dbm => -6,
            TxPower::ZeroDbm => 0,
            TxPower::Plus6Dbm => 6,
        }
    }
}

/// Module role (`AT+ROLE`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Peripheral (slave).
    Peripheral,
    /// Central (master).
    Central,
}

/// Configuration names understood by the module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigKey {
    /// UART bit rate (`BAUD`)
    Baud,
    /// iBeacon major (`MARJ`)
    Major,
    /// iBeacon minor (`MINO`)
    Minor,
    /// iBeacon UUID segment 0..=3 (`IBE0`..`IBE3`)
    UuidSegment(u8),
    /// Advertised device name (`NAME`)
    Name,
    /// Advertising interval (`ADVI`)
    AdvertInterval,
    /// Advertising type (`ADTY`)
    AdvertType,
    /// iBeacon mode switch (`IBEA`)
    IBeacon,
    /// iBeacon deploy mode (`DELO`)
    DeployMode,
    /// Auto sleep (`PWRM`)
    PowerMode,
    /// Work type, immediate or AT-only (`IMME`)
    WorkType,
    /// Central/peripheral role (`ROLE`)
    Role,
    /// Transmit power (`POWE`)
    TxPower,
    /// Module MAC address (`ADDR`)
    Address,
    /// iBeacon discovery scan (`DISI`)
    Discovery,
    /// Connect to a MAC address (`CON`)
    Connect,
    /// Software reset (`RESET`)
    Reset,
    /// Restore factory defaults (`RENEW`)
    Renew,
}

impl ConfigKey {
    /// Get the name used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigKey::Baud => "BAUD",
            ConfigKey::Major => "MARJ",
            ConfigKey::Minor => "MINO",
            ConfigKey::UuidSegment(0) => "IBE0",
            ConfigKey::UuidSegment(1) => "IBE1",
            ConfigKey::UuidSegment(2) => "IBE2",
            ConfigKey::UuidSegment(_) => "IBE3",
            ConfigKey::Name => "NAME",
            ConfigKey::AdvertInterval => "ADVI",
            ConfigKey::AdvertType => "ADTY",
            ConfigKey::IBeacon => "IBEA",
            ConfigKey::DeployMode => "DELO",
            ConfigKey::PowerMode => "PWRM",
            ConfigKey::WorkType => "IMME",
            ConfigKey::Role => "ROLE",
            ConfigKey::TxPower => "POWE",
            ConfigKey::Address => "ADDR",
            ConfigKey::Discovery => "DISI",
            ConfigKey::Connect => "CON",
            ConfigKey::Reset => "RESET",
            ConfigKey::Renew => "RENEW",
        }
    }

    /// Parse a key from its wire name.
    pub fn from_str(s: &str) -> Option<ConfigKey> {
        match s {
            "BAUD" => Some(ConfigKey::Baud),
            "MARJ" => Some(ConfigKey::Major),
            "MINO" => Some(ConfigKey::Minor),
            "IBE0" => Some(ConfigKey::UuidSegment(0)),
            "IBE1" => Some(ConfigKey::UuidSegment(1)),
            "IBE2" => Some(ConfigKey::UuidSegment(2)),
            "IBE3" => Some(ConfigKey::UuidSegment(3)),
            "NAME" => Some(ConfigKey::Name),
            "ADVI" => Some(ConfigKey::AdvertInterval),
            "ADTY" => Some(ConfigKey::AdvertType),
            "IBEA" => Some(ConfigKey::IBeacon),
            "DELO" => Some(ConfigKey::DeployMode),
            "PWRM" => Some(ConfigKey::PowerMode),
            "IMME" => Some(ConfigKey::WorkType),
            "ROLE" => Some(ConfigKey::Role),
            "POWE" => Some(ConfigKey::TxPower),
            "ADDR" => Some(ConfigKey::Address),
            "DISI" => Some(ConfigKey::Discovery),
            "CON" => Some(ConfigKey::Connect),
            "RESET" => Some(ConfigKey::Reset),
            "RENEW" => Some(ConfigKey::Renew),
            _ => None,
        }
    }

    /// Split the payload of an `AT+...` command into its key and value.
    ///
    /// Keys are matched longest first so `RENEW` is not mistaken for a value of
    /// some shorter key. Returns `None` for unknown names.
    pub fn split_payload(payload: &str) -> Option<(ConfigKey, &str)> {
        for len in (3..=5).rev() {
            if let Some(head) = payload.get(..len) {
                if let Some(key) = ConfigKey::from_str(head) {
                    return Some((key, &payload[len..]));
                }
            }
        }
        None
    }
}

/// Commands that can be sent to the module.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    // ========== Liveness ==========
    /// Bare `AT` probe.
    Probe,

    // ========== Actions ==========
    /// Software reset.
    Reset,

    /// Restore all settings to factory defaults.
    Renew,

    /// Start an iBeacon discovery scan.
    StartDiscovery,

    /// Connect to the given MAC address (12 hex characters).
    Connect {
        /// Target MAC address.
        mac: String,
    },

    // ========== Baud ==========
    /// Switch the module UART to the given rate (takes effect after reset).
    SetBaud {
        /// New rate.
        baud: BaudRate,
    },

    // ========== iBeacon ==========
    /// Set the iBeacon major value.
    SetMajor {
        /// Major identifier.
        major: u16,
    },

    /// Set the iBeacon minor value.
    SetMinor {
        /// Minor identifier.
        minor: u16,
    },

    /// Set one 8-hex-digit quarter of the iBeacon UUID.
    SetUuidSegment {
        /// Segment index 0..=3.
        index: u8,
        /// Eight uppercase hex characters.
        segment: String,
    },

    /// Set the advertised name.
    SetName {
        /// Name, at most 12 characters.
        name: String,
    },

    /// Set the advertising interval.
    SetAdvertInterval {
        /// Interval.
        interval: AdvertInterval,
    },

    /// Restrict advertising to advertisement packets only (`ADTY3`).
    SetAdvertisingOnly,

    /// Enable or disable iBeacon mode.
    SetIBeacon {
        /// Whether iBeacon mode is on.
        enabled: bool,
    },

    /// Deploy iBeacon as broadcast only (`DELO2`).
    SetBroadcastOnly,

    /// Turn auto sleep on or off.
    SetAutoSleep {
        /// Whether the module may sleep on its own.
        enabled: bool,
    },

    // ========== Role ==========
    /// Make the module respond to AT commands only (`IMME1`).
    SetAtCommandsOnly,

    /// Set the central/peripheral role.
    SetRole {
        /// Role.
        role: Role,
    },

    // ========== Radio ==========
    /// Set the transmit power.
    SetTxPower {
        /// Power level.
        power: TxPower,
    },

    // ========== Queries ==========
    /// Query a configuration value (`AT+<NAME>?`).
    Query {
        /// Configuration key.
        key: ConfigKey,
    },

    // ========== Raw ==========
    /// Send a raw command string.
    Raw {
        /// The raw command text.
        command: String,
    },
}

impl Command {
    /// Encode the command as the bytes to write to the UART.
    pub fn encode(&self) -> Vec<u8> {
        CommandCodec::encode_command(&self.to_command_string())
    }

    /// Get the command string.
    pub fn to_command_string(&self) -> String {
        match self {
            Command::Probe => "AT".to_string(),

            Command::Reset => set(ConfigKey::Reset, ""),
            Command::Renew => set(ConfigKey::Renew, ""),
            Command::StartDiscovery => query(ConfigKey::Discovery),
            Command::Connect { mac } => set(ConfigKey::Connect, mac),

            Command::SetBaud { baud } => set(ConfigKey::Baud, &baud.index().to_string()),

            Command::SetMajor { major } => {
                set(ConfigKey::Major, &format!("0x{}", u16_to_hex(*major)))
            }
            Command::SetMinor { minor } => {
                set(ConfigKey::Minor, &format!("0x{}", u16_to_hex(*minor)))
            }
            Command::SetUuidSegment { index, segment } => {
                set(ConfigKey::UuidSegment(*index), segment)
            }
            Command::SetName { name } => set(ConfigKey::Name, name),
            Command::SetAdvertInterval { interval } => {
                set(ConfigKey::AdvertInterval, &interval.index().to_string())
            }
            Command::SetAdvertisingOnly => set(ConfigKey::AdvertType, "3"),
            Command::SetIBeacon { enabled } => set(ConfigKey::IBeacon, flag(*enabled)),
            Command::SetBroadcastOnly => set(ConfigKey::DeployMode, "2"),
            // PWRM1 keeps the module awake, PWRM0 lets it sleep.
            Command::SetAutoSleep { enabled } => set(ConfigKey::PowerMode, flag(!*enabled)),

            Command::SetAtCommandsOnly => set(ConfigKey::WorkType, "1"),
            Command::SetRole { role } => set(
                ConfigKey::Role,
                match role {
                    Role::Peripheral => "0",
                    Role::Central => "1",
                },
            ),

            Command::SetTxPower { power } => set(ConfigKey::TxPower, &power.index().to_string()),

            Command::Query { key } => query(*key),

            Command::Raw { command } => command.clone(),
        }
    }

    /// Whether the module answers this command with a structured `OK+...` reply.
    pub fn expects_structured_reply(&self) -> bool {
        self.to_command_string().contains('+')
    }
}

fn set(key: ConfigKey, value: &str) -> String {
    format!("AT+{}{}", key.as_str(), value)
}

fn query(key: ConfigKey) -> String {
    format!("AT+{}?", key.as_str())
}

fn flag(on: bool) -> &'static str {
    if on {
        "1"
    } else {
        "0"
    }
}
