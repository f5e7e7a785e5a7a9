//! NT_STATUS codes carried in SMB2 response headers.
//! Reference: [MS-ERREF] Section 2.3

use std::fmt;

macro_rules! nt_status {
    ($($(#[$doc:meta])* $name:ident = $code:literal,)*) => {
        /// NT Status codes the client reacts to. Anything else is kept verbatim in `Other`.
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum NtStatus {
            $($(#[$doc])* $name,)*
            Other(u32),
        }

        impl NtStatus {
            pub fn as_u32(&self) -> u32 {
                match self {
                    $(Self::$name => $code,)*
                    Self::Other(v) => *v,
                }
            }

            pub fn from_u32(v: u32) -> Self {
                match v {
                    $($code => Self::$name,)*
                    v => Self::Other(v),
                }
            }
        }
    };
}

nt_status! {
    Success = 0x0000_0000,
    /// Interim reply; the final one follows with the same MessageId.
    Pending = 0x0000_0103,
    BufferOverflow = 0x8000_0005,
    NoMoreFiles = 0x8000_0006,
    InfoLengthMismatch = 0xC000_0004,
    InvalidHandle = 0xC000_0008,
    InvalidParameter = 0xC000_000D,
    NoSuchFile = 0xC000_000F,
    InvalidDeviceRequest = 0xC000_0010,
    EndOfFile = 0xC000_0011,
    MoreProcessingRequired = 0xC000_0016,
    AccessDenied = 0xC000_0022,
    ObjectNameInvalid = 0xC000_0033,
    ObjectNameNotFound = 0xC000_0034,
    ObjectNameCollision = 0xC000_0035,
    ObjectPathNotFound = 0xC000_003A,
    ObjectPathSyntaxBad = 0xC000_003B,
    SharingViolation = 0xC000_0043,
    LogonFailure = 0xC000_006D,
    FileIsADirectory = 0xC000_00BA,
    NotSupported = 0xC000_00BB,
    NetworkNameDeleted = 0xC000_00C9,
    BadNetworkName = 0xC000_00CC,
    DirectoryNotEmpty = 0xC000_0101,
    NotADirectory = 0xC000_0103,
    FileClosed = 0xC000_0128,
    UserSessionDeleted = 0xC000_0203,
}

impl NtStatus {
    /// Severity bits 11 (STATUS_SEVERITY_ERROR).
    pub fn is_error(&self) -> bool {
        (self.as_u32() >> 30) == 3
    }
}

impl fmt::Display for NtStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Other(v) => write!(f, "0x{:08X}", v),
            s => write!(f, "{:?} (0x{:08X})", s, s.as_u32()),
        }
    }
}
