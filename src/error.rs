use thiserror::Error;

/// Errors that can occur during store operations. Marked as non-exhaustive to allow for future
/// additions without breaking the API. A caller would usually only need to handle `KeyNotFound`,
/// `LowVoltage` and `FlashFull` as the other errors are static.
///
/// Checksum failures never show up here: a corrupt record is counted, reported to the
/// corruption handler and then treated as if it had never been written.
#[derive(Error, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum Error {
    /// The partition offset has to be aligned to the erase size of the flash
    #[error("invalid partition offset")]
    InvalidPartitionOffset,

    /// The partition size has to be a non-zero multiple of two erase units, one per page
    #[error("invalid partition size")]
    InvalidPartitionSize,

    /// The internal error value is returned from the provided `&mut impl NorFlash`. The store
    /// refuses further writes until it is initialized again.
    #[error("internal flash error")]
    FlashError,

    /// Key not found. Either no value has been written yet, it was deleted or its record
    /// failed the checksum.
    #[error("key not found")]
    KeyNotFound,

    /// The registered voltage check rejected an erase or program. Nothing was changed on flash,
    /// retry once the supply is stable.
    #[error("supply voltage too low")]
    LowVoltage,

    /// A single record has to fit into one page, and the length is stored as u16
    #[error("value too long")]
    ValueTooLong,

    /// The stored value has a different length than the requested type. The found length is
    /// reported.
    #[error("length mismatch: {0}")]
    LengthMismatch(usize),

    /// Stored data passed the checksum but can't be interpreted as the requested type
    #[error("corrupted data")]
    CorruptedData,

    /// A partial read reached past the end of the stored value
    #[error("out of bounds")]
    OutOfBounds,

    /// The key is used by the store itself
    #[error("reserved key")]
    ReservedKey,

    /// The live data plus the new record exceed one page, compaction doesn't help.
    #[error("flash full")]
    FlashFull,

    /// Used internally to indicate that the active page has to be compacted.
    #[error("page full")]
    PageFull,
}
