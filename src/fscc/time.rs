//! Windows FILETIME timestamps and the "do not update" marker used by SET_INFO.

use std::ops::Add;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Windows FILETIME epoch offset from Unix epoch (100-ns intervals).
pub const FILETIME_UNIX_DIFF: u64 = 116_444_736_000_000_000;

const TICKS_PER_MILLI: i128 = 10_000;
const NANOS_PER_TICK: u128 = 100;

/// A point in time as 100-nanosecond ticks since 1601-01-01 UTC.
///
/// Equality is exact tick equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FileTime(u64);

impl FileTime {
    /// 1601-01-01, tick zero. On the wire this value doubles as the SET_INFO
    /// "do not update" sentinel.
    pub const ZERO: FileTime = FileTime(0);

    pub const fn from_ticks(ticks: u64) -> Self {
        FileTime(ticks)
    }

    pub const fn ticks(self) -> u64 {
        self.0
    }

    pub fn now() -> Self {
        Self::from_system_time(SystemTime::now())
    }

    /// Convert a `SystemTime`, clamping anything before 1601 to tick zero.
    pub fn from_system_time(t: SystemTime) -> Self {
        let ticks = match t.duration_since(UNIX_EPOCH) {
            Ok(d) => (d.as_nanos() / NANOS_PER_TICK) as i128 + FILETIME_UNIX_DIFF as i128,
            Err(e) => FILETIME_UNIX_DIFF as i128 - (e.duration().as_nanos() / NANOS_PER_TICK) as i128,
        };
        FileTime(ticks.clamp(0, u64::MAX as i128) as u64)
    }

    pub fn to_system_time(self) -> SystemTime {
        if self.0 >= FILETIME_UNIX_DIFF {
            UNIX_EPOCH + Duration::from_nanos((self.0 - FILETIME_UNIX_DIFF).saturating_mul(100))
        } else {
            UNIX_EPOCH - Duration::from_nanos((FILETIME_UNIX_DIFF - self.0) * 100)
        }
    }

    /// Milliseconds since the Unix epoch. Sub-millisecond ticks are dropped
    /// (rounding towards negative infinity).
    pub fn from_epoch_millis(millis: i64) -> Self {
        let ticks = millis as i128 * TICKS_PER_MILLI + FILETIME_UNIX_DIFF as i128;
        FileTime(ticks.clamp(0, u64::MAX as i128) as u64)
    }

    pub fn to_epoch_millis(self) -> i64 {
        (self.0 as i128 - FILETIME_UNIX_DIFF as i128).div_euclid(TICKS_PER_MILLI) as i64
    }

    pub fn checked_add(self, d: Duration) -> Option<Self> {
        let ticks = u64::try_from(d.as_nanos() / NANOS_PER_TICK).ok()?;
        self.0.checked_add(ticks).map(FileTime)
    }
}

impl Add<Duration> for FileTime {
    type Output = FileTime;

    /// Panics on overflow, like `SystemTime + Duration`.
    fn add(self, d: Duration) -> FileTime {
        self.checked_add(d).expect("FileTime overflow")
    }
}

impl From<SystemTime> for FileTime {
    fn from(t: SystemTime) -> Self {
        FileTime::from_system_time(t)
    }
}

/// One timestamp slot of a SET_INFO patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeField {
    /// Leave the server's value as it is.
    #[default]
    DontUpdate,
    Set(FileTime),
}

impl TimeField {
    /// Wire value of `DontUpdate`.
    pub const DONT_UPDATE_TICKS: u64 = 0;

    pub fn value(self) -> Option<FileTime> {
        match self {
            TimeField::DontUpdate => None,
            TimeField::Set(t) => Some(t),
        }
    }

    pub fn is_set(self) -> bool {
        matches!(self, TimeField::Set(_))
    }

    pub(crate) fn to_wire(self) -> u64 {
        match self {
            TimeField::DontUpdate => Self::DONT_UPDATE_TICKS,
            TimeField::Set(t) => t.ticks(),
        }
    }

    pub(crate) fn from_wire(ticks: u64) -> Self {
        if ticks == Self::DONT_UPDATE_TICKS {
            TimeField::DontUpdate
        } else {
            TimeField::Set(FileTime::from_ticks(ticks))
        }
    }
}

impl From<FileTime> for TimeField {
    fn from(t: FileTime) -> Self {
        TimeField::Set(t)
    }
}
