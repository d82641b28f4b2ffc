//! Severity levels and the bidirectional level translator.
//!
//! Three closed scales meet here:
//! - [`HostLevel`]: the database server's own message levels
//! - [`Severity`]: the common scale both sides are projected onto
//! - [`ManagedLevel`]: the levels routines log at through the guest ABI
//!
//! Every level carries a rank on the common scale. [`LevelMap`] derives the
//! projection tables from those ranks by rounding up: a level maps to the
//! lowest target whose rank is at least its own, the more severe target wins
//! a tie, and anything above the top of the target scale clamps to the top.
//! Tables are checked for monotonicity and for never demoting a message when
//! the map is built.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A closed, ordered level scale.
pub trait Level: Copy + Ord + fmt::Debug + 'static {
    /// Every level, least severe first.
    const ALL: &'static [Self];
    /// The most severe level.
    const TOP: Self;

    /// Position on the common scale.
    fn rank(self) -> u8;

    /// Index into [`Self::ALL`].
    fn index(self) -> usize;
}

/// The common severity scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Diagnostic detail.
    Debug,
    /// Routine information.
    Info,
    /// Something unexpected but handled.
    Warning,
    /// An operation failed.
    Error,
    /// The process cannot continue.
    Fatal,
}

impl Severity {
    /// Number of severity levels.
    pub const COUNT: usize = 5;

    /// Look up a severity by its index.
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }
}

impl Level for Severity {
    const ALL: &'static [Self] = &[
        Self::Debug,
        Self::Info,
        Self::Warning,
        Self::Error,
        Self::Fatal,
    ];
    const TOP: Self = Self::Fatal;

    fn rank(self) -> u8 {
        match self {
            Self::Debug => 10,
            Self::Info => 20,
            Self::Warning => 30,
            Self::Error => 40,
            Self::Fatal => 50,
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
            Self::Fatal => "FATAL",
        };
        f.write_str(name)
    }
}

/// Message levels of the host database server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HostLevel {
    Debug5,
    Debug4,
    Debug3,
    Debug2,
    Debug1,
    /// Server log only.
    Log,
    Info,
    Notice,
    Warning,
    Error,
    Fatal,
    Panic,
}

impl HostLevel {
    /// Number of host levels.
    pub const COUNT: usize = 12;

    /// Host name of the level, as used in configuration.
    pub fn name(self) -> &'static str {
        match self {
            Self::Debug5 => "debug5",
            Self::Debug4 => "debug4",
            Self::Debug3 => "debug3",
            Self::Debug2 => "debug2",
            Self::Debug1 => "debug1",
            Self::Log => "log",
            Self::Info => "info",
            Self::Notice => "notice",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Fatal => "fatal",
            Self::Panic => "panic",
        }
    }
}

impl Level for HostLevel {
    const ALL: &'static [Self] = &[
        Self::Debug5,
        Self::Debug4,
        Self::Debug3,
        Self::Debug2,
        Self::Debug1,
        Self::Log,
        Self::Info,
        Self::Notice,
        Self::Warning,
        Self::Error,
        Self::Fatal,
        Self::Panic,
    ];
    const TOP: Self = Self::Panic;

    fn rank(self) -> u8 {
        match self {
            Self::Debug5 => 2,
            Self::Debug4 => 4,
            Self::Debug3 => 6,
            Self::Debug2 => 8,
            Self::Debug1 => 10,
            Self::Log => 15,
            Self::Info | Self::Notice => 20,
            Self::Warning => 30,
            Self::Error => 40,
            Self::Fatal => 50,
            Self::Panic => 55,
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for HostLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name().to_ascii_uppercase())
    }
}

/// Error returned when a level name is not recognised.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown level name: {0}")]
pub struct UnknownLevel(pub String);

impl FromStr for HostLevel {
    type Err = UnknownLevel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        // The host treats bare "debug" as debug2.
        if lowered == "debug" {
            return Ok(Self::Debug2);
        }
        Self::ALL
            .iter()
            .copied()
            .find(|level| level.name() == lowered)
            .ok_or_else(|| UnknownLevel(s.to_string()))
    }
}

/// Levels available to routines running in the embedded runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ManagedLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl ManagedLevel {
    /// Number of managed levels.
    pub const COUNT: usize = 6;

    /// Convert the numeric level a guest passes through the ABI.
    ///
    /// Codes are 0 (trace) through 5 (fatal). Out-of-range codes round
    /// outward: negative is trace, above 5 is fatal.
    pub fn from_code(code: i32) -> Self {
        match code {
            i32::MIN..=0 => Self::Trace,
            1 => Self::Debug,
            2 => Self::Info,
            3 => Self::Warn,
            4 => Self::Error,
            _ => Self::Fatal,
        }
    }

    /// The numeric ABI code of this level.
    pub fn code(self) -> i32 {
        match self {
            Self::Trace => 0,
            Self::Debug => 1,
            Self::Info => 2,
            Self::Warn => 3,
            Self::Error => 4,
            Self::Fatal => 5,
        }
    }
}

impl Level for ManagedLevel {
    const ALL: &'static [Self] = &[
        Self::Trace,
        Self::Debug,
        Self::Info,
        Self::Warn,
        Self::Error,
        Self::Fatal,
    ];
    const TOP: Self = Self::Fatal;

    fn rank(self) -> u8 {
        match self {
            Self::Trace => 5,
            Self::Debug => 10,
            Self::Info => 20,
            Self::Warn => 30,
            Self::Error => 40,
            Self::Fatal => 50,
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for ManagedLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Trace => "TRACE",
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
            Self::Fatal => "FATAL",
        };
        f.write_str(name)
    }
}

/// A projection table failed validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LevelMapError {
    /// A more severe input maps to a less severe output.
    #[error("{table}: {higher} maps below {lower}")]
    NotMonotonic {
        /// Which table failed.
        table: &'static str,
        /// The less severe input level.
        lower: String,
        /// The more severe input level.
        higher: String,
    },

    /// An input maps to an output ranked below it.
    #[error("{table}: {level} is demoted to {mapped}")]
    Demotes {
        /// Which table failed.
        table: &'static str,
        /// The input level.
        level: String,
        /// The output it was mapped to.
        mapped: String,
    },
}

/// Round a rank up onto scale `T`.
fn ceiling<T: Level>(rank: u8) -> T {
    T::ALL
        .iter()
        .copied()
        .filter(|level| level.rank() >= rank)
        .min_by(|a, b| a.rank().cmp(&b.rank()).then(b.cmp(a)))
        .unwrap_or(T::TOP)
}

fn derive_table<S: Level, T: Level, const N: usize>() -> [T; N] {
    std::array::from_fn(|i| ceiling::<T>(S::ALL[i].rank()))
}

fn validate_table<S: Level, T: Level>(
    table: &'static str,
    entries: &[T],
) -> Result<(), LevelMapError> {
    for (pair, inputs) in entries.windows(2).zip(S::ALL.windows(2)) {
        if pair[1] < pair[0] {
            return Err(LevelMapError::NotMonotonic {
                table,
                lower: format!("{:?}", inputs[0]),
                higher: format!("{:?}", inputs[1]),
            });
        }
    }

    for (&mapped, &level) in entries.iter().zip(S::ALL) {
        if mapped.rank() < level.rank() && mapped != T::TOP {
            return Err(LevelMapError::Demotes {
                table,
                level: format!("{level:?}"),
                mapped: format!("{mapped:?}"),
            });
        }
    }

    Ok(())
}

/// Validated projection tables between the host, common and managed scales.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelMap {
    host_to_common: [Severity; HostLevel::COUNT],
    common_to_host: [HostLevel; Severity::COUNT],
    managed_to_common: [Severity; ManagedLevel::COUNT],
    common_to_managed: [ManagedLevel; Severity::COUNT],
}

impl LevelMap {
    /// Build the standard tables from the level ranks.
    pub fn standard() -> Result<Self, LevelMapError> {
        Self::from_tables(
            derive_table::<HostLevel, Severity, { HostLevel::COUNT }>(),
            derive_table::<Severity, HostLevel, { Severity::COUNT }>(),
            derive_table::<ManagedLevel, Severity, { ManagedLevel::COUNT }>(),
            derive_table::<Severity, ManagedLevel, { Severity::COUNT }>(),
        )
    }

    /// Build a map from explicit tables, indexed by source level.
    pub fn from_tables(
        host_to_common: [Severity; HostLevel::COUNT],
        common_to_host: [HostLevel; Severity::COUNT],
        managed_to_common: [Severity; ManagedLevel::COUNT],
        common_to_managed: [ManagedLevel; Severity::COUNT],
    ) -> Result<Self, LevelMapError> {
        validate_table::<HostLevel, Severity>("host_to_common", &host_to_common)?;
        validate_table::<Severity, HostLevel>("common_to_host", &common_to_host)?;
        validate_table::<ManagedLevel, Severity>("managed_to_common", &managed_to_common)?;
        validate_table::<Severity, ManagedLevel>("common_to_managed", &common_to_managed)?;

        Ok(Self {
            host_to_common,
            common_to_host,
            managed_to_common,
            common_to_managed,
        })
    }

    pub fn host_to_common(&self, level: HostLevel) -> Severity {
        self.host_to_common[level.index()]
    }

    pub fn common_to_host(&self, level: Severity) -> HostLevel {
        self.common_to_host[level.index()]
    }

    pub fn managed_to_common(&self, level: ManagedLevel) -> Severity {
        self.managed_to_common[level.index()]
    }

    pub fn common_to_managed(&self, level: Severity) -> ManagedLevel {
        self.common_to_managed[level.index()]
    }

    /// Translate a routine's level all the way to the host's level.
    pub fn managed_to_host(&self, level: ManagedLevel) -> HostLevel {
        self.common_to_host(self.managed_to_common(level))
    }
}
