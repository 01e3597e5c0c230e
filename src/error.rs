use thiserror::Error;

/// Result type alias for disk operations
pub type Result<T> = std::result::Result<T, DiskError>;

/// Errors that can occur when decoding, building or accessing disk media
#[derive(Debug, Error)]
pub enum DiskError {
    /// I/O error occurred while reading or writing
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Input is not a recognized disk image
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// Recognized container but unsupported variant or encoding
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Structured input ended early
    #[error("Unexpected end of data")]
    UnexpectedEof,

    /// Declared payload length does not match the decoded content
    #[error("Length mismatch in sector data (cylinder {cylinder}, head {head}, sector {sector})")]
    LengthMismatch {
        /// Cylinder of the sector record
        cylinder: u8,
        /// Head of the sector record
        head: u8,
        /// Sector number of the sector record
        sector: u8,
    },

    /// Tracks disagree on their first sector number
    #[error("Irregular sector numbering: {0}")]
    IrregularSectorNumbering(String),

    /// No free directory entry left
    #[error("Directory full")]
    DirectoryFull,

    /// Disk is full, no free space
    #[error("Disk full: no free space available")]
    DiskFull,

    /// File needs more blocks or extents than the format can address
    #[error("{0}: file too big")]
    FileTooBig(String),

    /// Boot data does not fit into the system tracks
    #[error("System track data too large ({size} bytes, {capacity} available)")]
    SystemTracksTooLarge {
        /// Size of the supplied data
        size: usize,
        /// Capacity of the system track area
        capacity: usize,
    },

    /// File name reserved for internal use
    #[error("File name {0} is reserved for the DateStamper timestamp file")]
    ReservedFileName(String),

    /// Geometry parameters are inconsistent
    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    /// Requested sector does not exist
    #[error("Sector not found: cylinder {cylinder}, head {head}, sector {sector}")]
    SectorNotFound {
        /// Cylinder number
        cylinder: u8,
        /// Head number
        head: u8,
        /// Sector number
        sector: u8,
    },

    /// File not present in the directory
    #[error("File not found: {0}")]
    FileNotFound(String),
}

impl DiskError {
    /// Create an invalid format error
    pub fn invalid_format<S: Into<String>>(message: S) -> Self {
        DiskError::InvalidFormat(message.into())
    }

    /// Create an unsupported format error
    pub fn unsupported<S: Into<String>>(message: S) -> Self {
        DiskError::UnsupportedFormat(message.into())
    }

    /// Create an invalid geometry error
    pub fn geometry<S: Into<String>>(message: S) -> Self {
        DiskError::InvalidGeometry(message.into())
    }
}
