use demandpage_shared::paging::PageFlag;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagingError {
    /// A descriptor table, or the process's page quota, is full
    CapacityExceeded,
    /// The swap file is missing or a read or write on it fell short
    BackingStoreFailure,
    /// No free frame for a user page
    FrameExhausted,
    /// No free frame for a page table
    OutOfMemory,
    /// No translation for the address
    NotMapped(usize),
    /// The address already has a translation
    AlreadyMapped(usize),
    /// The page is mapped but lives in the swap file
    NotPresent(usize),
    /// The flag cannot be changed directly, or its precondition does not hold
    InvalidFlag(PageFlag),
    /// No page descriptor tracks the address
    NoDescriptor(usize),
    /// A fault was raised for a page that is not in the swap file
    NotEvicted(usize),
    /// Access to an address the process does not own
    SegmentationFault(usize),
    /// Access that the page's permission bits forbid
    ProtectionFault(usize),
    /// The requested size runs into kernel space
    AddressOutOfRange,
    /// The address is not page-aligned
    Misaligned(usize),
    /// An eviction found nowhere to put its victim
    DoubleOverflow,
    /// The eviction policy had no page to choose from
    NoVictim,
    /// The executable image could not be read
    ImageLoad,
    /// The process table is full
    NoProcessSlot,
}

impl core::fmt::Display for PagingError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::CapacityExceeded => write!(f, "page capacity exceeded"),
            Self::BackingStoreFailure => write!(f, "swap file I/O failed"),
            Self::FrameExhausted => write!(f, "out of physical frames"),
            Self::OutOfMemory => write!(f, "out of memory for page tables"),
            Self::NotMapped(va) => write!(f, "{va:#X} is not mapped"),
            Self::AlreadyMapped(va) => write!(f, "{va:#X} is already mapped"),
            Self::NotPresent(va) => write!(f, "{va:#X} is not present"),
            Self::InvalidFlag(flag) => write!(f, "cannot change the {flag} flag here"),
            Self::NoDescriptor(va) => write!(f, "no page descriptor for {va:#X}"),
            Self::NotEvicted(va) => write!(f, "{va:#X} is not in the swap file"),
            Self::SegmentationFault(va) => write!(f, "segmentation fault at {va:#X}"),
            Self::ProtectionFault(va) => write!(f, "protection fault at {va:#X}"),
            Self::AddressOutOfRange => write!(f, "address out of range"),
            Self::Misaligned(va) => write!(f, "{va:#X} is not page-aligned"),
            Self::DoubleOverflow => write!(f, "eviction overflow already pending"),
            Self::NoVictim => write!(f, "no page to evict"),
            Self::ImageLoad => write!(f, "failed to load executable image"),
            Self::NoProcessSlot => write!(f, "process table full"),
        }
    }
}

impl core::error::Error for PagingError {}

pub type Result<T> = core::result::Result<T, PagingError>;
